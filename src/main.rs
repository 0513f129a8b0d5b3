use anyhow::Result;
use tracing::{info, warn};

mod app;
mod config;
mod conversation;
mod gemini;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use config::Config;
use tui::{EventHandler, Tui};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging is best-effort: the chat still works without a log file
    match logging::init() {
        Ok(path) => info!(path = %path.display(), "gemini-chat starting"),
        Err(err) => eprintln!("warning: logging disabled: {err:#}"),
    }

    let config_path = match Config::config_path() {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(error = %err, "no config location, API keys can't be saved");
            None
        }
    };
    let config = match config_path.as_deref().map(Config::load_from).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            // A typed key is refused later rather than replacing this file
            warn!(error = %format!("{err:#}"), "config file unreadable, using defaults");
            Config::default()
        }
    };
    let mut app = App::new(config, config_path);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let result = run(&mut terminal, &mut app).await;

    tui::restore()?;
    terminal.show_cursor()?;

    if let Some(handle) = app.in_flight.take() {
        info!("quitting with a request still in flight");
        handle.abort();
    }
    info!("gemini-chat exiting");
    result
}

async fn run(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await,
            None => break,
        }
    }

    Ok(())
}
