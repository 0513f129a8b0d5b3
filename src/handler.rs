use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::app::{App, Popup};
use crate::tui::AppEvent;

const WHEEL_STEP: u16 = 3;

pub async fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        // The next draw re-measures the chat viewport
        AppEvent::Resize(width, height) => tracing::debug!(width, height, "terminal resized"),
        AppEvent::Tick => {
            app.tick();
            app.reap_finished_request().await;
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work under any popup
    if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
        app.should_quit = true;
        return;
    }

    match app.popup {
        Popup::MissingCredential => handle_notice(app, key),
        Popup::ApiKeyEntry { .. } => handle_api_key_entry(app, key),
        Popup::None => handle_chat(app, key),
    }
}

/// The missing-key notice swallows everything else until it is handled.
fn handle_notice(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.open_api_key_entry(),
        KeyCode::Esc => app.dismiss_popup(),
        _ => {}
    }
}

fn handle_api_key_entry(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.dismiss_popup(),
        KeyCode::Enter => {
            if let Err(err) = app.save_api_key() {
                tracing::error!(error = %err, "could not save API key");
                app.status_message = Some(format!("No se pudo guardar la API Key: {err}"));
                app.dismiss_popup();
            }
        }
        KeyCode::Backspace => app.api_key_backspace(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => app.api_key_insert(c),
        _ => {}
    }
}

fn handle_chat(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if key.code == KeyCode::Char('k') {
            app.open_api_key_entry();
        }
        return;
    }

    match key.code {
        KeyCode::Enter => app.submit(),
        KeyCode::Esc => app.clear_draft(),
        KeyCode::Backspace => app.delete_before_cursor(),
        KeyCode::Delete => app.delete_at_cursor(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_home(),
        KeyCode::End => app.cursor_end(),
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => {
            let step = app.half_page();
            app.scroll_up(step);
        }
        KeyCode::PageDown => {
            let step = app.half_page();
            app.scroll_down(step);
        }
        KeyCode::Char(c) => app.insert_char(c),
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(WHEEL_STEP),
        MouseEventKind::ScrollUp => app.scroll_up(WHEEL_STEP),
        _ => {}
    }
}
