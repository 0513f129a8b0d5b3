use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::{Conversation, Resolution};
use crate::gemini::{CompletionClient, CompletionError, CompletionResult, ErrorKind, GeminiClient, DEFAULT_MODEL};

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    None,
    /// Blocking notice: no credential, nothing can be sent successfully.
    MissingCredential,
    ApiKeyEntry { input: String, cursor: usize },
}

pub struct App {
    pub should_quit: bool,
    pub conversation: Conversation,
    pub popup: Popup,
    pub status_message: Option<String>,

    // Remote side
    pub config: Config,
    /// Where a typed API key gets written. `None` disables saving.
    pub config_path: Option<PathBuf>,
    /// `GEMINI_API_KEY` as seen at startup. It outranks a saved key.
    env_api_key: Option<String>,
    pub client: Arc<dyn CompletionClient>,
    pub model: String,
    pub key_source: Option<&'static str>,
    pub in_flight: Option<JoinHandle<CompletionResult<String>>>,

    // Draft cursor, in characters
    pub cursor: usize,

    // Chat viewport, updated during render
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_total_lines: u16,
    seen_entries: usize,

    pub spinner_frame: usize,
}

impl App {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        let env_api_key = Config::env_api_key();
        let api_key = config.resolve_api_key(env_api_key.as_deref());
        let key_source = config.api_key_source(env_api_key.as_deref());
        let client = gemini_client(&config, api_key);
        let has_credential = client.has_credential();
        let model = client.model().to_string();

        let mut app = Self::with_client(config, Arc::new(client), has_credential);
        app.model = model;
        app.key_source = key_source;
        app.env_api_key = env_api_key;
        app.config_path = config_path;
        app
    }

    pub fn with_client(config: Config, client: Arc<dyn CompletionClient>, has_credential: bool) -> Self {
        let popup = if has_credential {
            Popup::None
        } else {
            warn!("no API key found in {} or the config file", crate::config::API_KEY_ENV);
            Popup::MissingCredential
        };
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            should_quit: false,
            conversation: Conversation::new(),
            popup,
            status_message: None,

            config,
            config_path: None,
            env_api_key: None,
            client,
            model,
            key_source: None,
            in_flight: None,

            cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_total_lines: 0,
            seen_entries: 0,

            spinner_frame: 0,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.conversation.is_sending()
    }

    /// Commit the draft and fire off the request.
    pub fn submit(&mut self) {
        let Some(prompt) = self.conversation.submit_draft() else {
            return;
        };
        self.cursor = 0;
        self.status_message = None;

        // The controller's guard already makes this impossible; keep the old
        // handle from being silently dropped if that ever changes.
        if let Some(stale) = self.in_flight.take() {
            warn!("replacing an unfinished request handle");
            stale.abort();
        }
        self.in_flight = Some(tokio::spawn(self.client.complete(&prompt)));
    }

    /// Hand a finished request's outcome to the conversation.
    pub async fn reap_finished_request(&mut self) {
        let finished = self
            .in_flight
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if !finished {
            return;
        }
        let Some(handle) = self.in_flight.take() else {
            return;
        };

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(source) => Err(CompletionError::Aborted { source }),
        };

        if let Some(Resolution::Failed(ErrorKind::Configuration)) = self.conversation.finish(outcome) {
            self.popup = Popup::MissingCredential;
        }
    }

    pub fn tick(&mut self) {
        if self.is_sending() {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }
    }

    // Draft editing. All of these are no-ops while a reply is outstanding.

    pub fn insert_char(&mut self, c: char) {
        let mut draft = self.conversation.draft().to_string();
        let byte_pos = char_to_byte_index(&draft, self.cursor);
        draft.insert(byte_pos, c);
        if self.conversation.update_draft(draft) {
            self.cursor += 1;
        }
    }

    pub fn delete_before_cursor(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let mut draft = self.conversation.draft().to_string();
        let byte_pos = char_to_byte_index(&draft, self.cursor - 1);
        draft.remove(byte_pos);
        if self.conversation.update_draft(draft) {
            self.cursor -= 1;
        }
    }

    pub fn delete_at_cursor(&mut self) {
        let mut draft = self.conversation.draft().to_string();
        if self.cursor >= draft.chars().count() {
            return;
        }
        let byte_pos = char_to_byte_index(&draft, self.cursor);
        draft.remove(byte_pos);
        self.conversation.update_draft(draft);
    }

    pub fn clear_draft(&mut self) {
        if self.conversation.update_draft(String::new()) {
            self.cursor = 0;
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        let char_count = self.conversation.draft().chars().count();
        self.cursor = (self.cursor + 1).min(char_count);
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.conversation.draft().chars().count();
    }

    // Chat scrolling

    fn max_scroll(&self) -> u16 {
        self.chat_total_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll());
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.max_scroll();
    }

    /// Record the rendered chat size. Jumps to the newest entry whenever the
    /// number of entries changed since the last frame.
    pub fn update_chat_metrics(&mut self, total_lines: u16, height: u16) {
        self.chat_total_lines = total_lines;
        self.chat_height = height;

        let len = self.conversation.entries().len();
        if len != self.seen_entries {
            self.seen_entries = len;
            self.scroll_to_bottom();
        } else {
            self.chat_scroll = self.chat_scroll.min(self.max_scroll());
        }
    }

    // Credential popups

    pub fn open_api_key_entry(&mut self) {
        self.popup = Popup::ApiKeyEntry {
            input: String::new(),
            cursor: 0,
        };
    }

    pub fn dismiss_popup(&mut self) {
        self.popup = Popup::None;
    }

    pub fn api_key_insert(&mut self, c: char) {
        if let Popup::ApiKeyEntry { input, cursor } = &mut self.popup {
            let byte_pos = char_to_byte_index(input, *cursor);
            input.insert(byte_pos, c);
            *cursor += 1;
        }
    }

    pub fn api_key_backspace(&mut self) {
        if let Popup::ApiKeyEntry { input, cursor } = &mut self.popup {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(input, *cursor);
                input.remove(byte_pos);
            }
        }
    }

    /// Persist the typed key and rebuild the client from the resolved key.
    ///
    /// `GEMINI_API_KEY` still wins over the saved key, same as at startup.
    pub fn save_api_key(&mut self) -> Result<()> {
        let Popup::ApiKeyEntry { input, .. } = &self.popup else {
            return Ok(());
        };
        let key = input.trim().to_string();
        if key.is_empty() {
            return Ok(());
        }
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| anyhow!("no config file location on this system"))?;

        if let Err(err) = Config::store_api_key(&path, &key) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "API key not saved");
            return Err(err);
        }
        self.config.api_key = Some(key);
        info!(path = %path.display(), "API key saved to config file");

        self.reload_client();
        self.popup = Popup::None;
        self.status_message = Some(match self.key_source {
            Some("env") => format!("API Key guardada ({} tiene prioridad)", crate::config::API_KEY_ENV),
            _ => "API Key guardada".to_string(),
        });
        Ok(())
    }

    fn reload_client(&mut self) {
        let env = self.env_api_key.as_deref();
        let client = gemini_client(&self.config, self.config.resolve_api_key(env));
        self.key_source = self.config.api_key_source(env);
        self.model = client.model().to_string();
        self.client = Arc::new(client);
        debug!(model = %self.model, source = ?self.key_source, "completion client rebuilt");
    }
}

fn gemini_client(config: &Config, api_key: Option<String>) -> GeminiClient {
    let mut client = GeminiClient::new(api_key);
    if let Some(model) = config.model.as_deref().filter(|m| !m.trim().is_empty()) {
        client = client.with_model(model.trim());
    }
    if let Some(base_url) = config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        client = client.with_base_url(base_url.trim());
    }
    client
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Author, APOLOGY, GREETING};
    use futures_util::future::{BoxFuture, FutureExt};
    use std::sync::Mutex;

    struct FakeClient {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeClient {
        fn replying() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl CompletionClient for FakeClient {
        fn complete(&self, prompt: &str) -> BoxFuture<'static, CompletionResult<String>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let fail = self.fail;
            async move {
                if fail {
                    Err(CompletionError::Status {
                        status: 503,
                        body: "overloaded".to_string(),
                    })
                } else {
                    Ok("Hi there!".to_string())
                }
            }
            .boxed()
        }
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    /// No credential anywhere, saving into `path`.
    fn keyless_app(path: &std::path::Path) -> App {
        let config = Config {
            base_url: Some(closed_port_url()),
            ..Config::default()
        };
        let client = Arc::new(gemini_client(&config, None));
        let mut app = App::with_client(config, client, false);
        app.config_path = Some(path.to_path_buf());
        app
    }

    fn enter_key(app: &mut App, key: &str) {
        app.open_api_key_entry();
        for c in key.chars() {
            app.api_key_insert(c);
        }
    }

    fn app_with(client: Arc<FakeClient>) -> App {
        App::with_client(Config::default(), client, true)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.insert_char(c);
        }
    }

    async fn settle(app: &mut App) {
        for _ in 0..100 {
            if !app.is_sending() {
                return;
            }
            tokio::task::yield_now().await;
            app.reap_finished_request().await;
        }
        panic!("request never finished");
    }

    fn summary(app: &App) -> Vec<(Author, String, bool)> {
        app.conversation
            .entries()
            .iter()
            .map(|e| (e.author, e.text.clone(), e.pending))
            .collect()
    }

    #[test]
    fn draft_editing_is_utf8_safe() {
        let mut app = app_with(FakeClient::replying());
        type_text(&mut app, "añadir");
        app.cursor_home();
        app.cursor_right();
        app.cursor_right();
        app.delete_before_cursor();
        assert_eq!(app.conversation.draft(), "aadir");
        assert_eq!(app.cursor, 1);
        app.delete_at_cursor();
        assert_eq!(app.conversation.draft(), "adir");
        app.cursor_end();
        app.insert_char('é');
        assert_eq!(app.conversation.draft(), "adiré");
        assert_eq!(app.cursor, 5);
    }

    #[tokio::test]
    async fn reply_flows_into_conversation() {
        let client = FakeClient::replying();
        let mut app = app_with(client.clone());
        type_text(&mut app, "Hello");

        app.submit();

        assert_eq!(client.prompts(), vec!["Hello".to_string()]);
        assert!(app.is_sending());
        assert_eq!(app.cursor, 0);
        assert_eq!(
            summary(&app),
            vec![
                (Author::Assistant, GREETING.to_string(), false),
                (Author::User, "Hello".to_string(), false),
                (Author::Assistant, String::new(), true),
            ]
        );

        settle(&mut app).await;

        assert!(app.in_flight.is_none());
        assert_eq!(
            summary(&app),
            vec![
                (Author::Assistant, GREETING.to_string(), false),
                (Author::User, "Hello".to_string(), false),
                (Author::Assistant, "Hi there!".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn failure_shows_apology() {
        let mut app = app_with(FakeClient::failing());
        type_text(&mut app, "Hello");
        app.submit();
        settle(&mut app).await;

        let last = app.conversation.entries().last().unwrap();
        assert_eq!(last.text, APOLOGY);
        assert!(!last.pending);
        assert_eq!(app.popup, Popup::None);
    }

    #[tokio::test]
    async fn typing_and_sending_are_blocked_mid_flight() {
        let client = FakeClient::replying();
        let mut app = app_with(client.clone());
        type_text(&mut app, "first");
        app.submit();

        type_text(&mut app, "second");
        app.submit();

        assert_eq!(app.conversation.draft(), "");
        assert_eq!(client.prompts().len(), 1);
        assert_eq!(app.conversation.entries().len(), 3);

        settle(&mut app).await;
        type_text(&mut app, "second");
        app.submit();
        assert_eq!(client.prompts().len(), 2);
    }

    #[tokio::test]
    async fn blank_draft_sends_nothing() {
        let client = FakeClient::replying();
        let mut app = app_with(client.clone());
        type_text(&mut app, "   ");
        app.submit();

        assert!(client.prompts().is_empty());
        assert!(!app.is_sending());
        assert_eq!(app.conversation.entries().len(), 1);
    }

    #[test]
    fn missing_credential_raises_notice_at_start() {
        let app = App::with_client(Config::default(), FakeClient::replying(), false);
        assert_eq!(app.popup, Popup::MissingCredential);
    }

    #[tokio::test]
    async fn missing_credential_during_send_raises_notice_again() {
        let client = Arc::new(GeminiClient::new(None).with_base_url("http://127.0.0.1:9"));
        let mut app = App::with_client(Config::default(), client, false);
        app.dismiss_popup();

        type_text(&mut app, "Hello");
        app.submit();
        settle(&mut app).await;

        assert_eq!(app.popup, Popup::MissingCredential);
        assert_eq!(app.conversation.entries().last().map(|e| e.text.as_str()), Some(APOLOGY));
    }

    #[test]
    fn new_entries_scroll_to_bottom() {
        let mut app = app_with(FakeClient::replying());
        app.update_chat_metrics(40, 10);
        assert_eq!(app.chat_scroll, 30);

        app.scroll_up(12);
        app.update_chat_metrics(40, 10);
        assert_eq!(app.chat_scroll, 18);

        app.scroll_down(100);
        assert_eq!(app.chat_scroll, 30);
    }

    #[test]
    fn api_key_entry_edits_only_the_popup() {
        let mut app = app_with(FakeClient::replying());
        app.api_key_insert('x');
        assert_eq!(app.popup, Popup::None);

        app.open_api_key_entry();
        app.api_key_insert('a');
        app.api_key_insert('b');
        app.api_key_backspace();
        assert_eq!(
            app.popup,
            Popup::ApiKeyEntry {
                input: "a".to_string(),
                cursor: 1
            }
        );
        assert_eq!(app.conversation.draft(), "");
    }

    #[tokio::test]
    async fn saved_key_is_written_and_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemini-chat").join("config.json");
        let mut app = keyless_app(&path);
        assert_eq!(app.popup, Popup::MissingCredential);

        enter_key(&mut app, " test-key ");
        app.save_api_key().unwrap();

        assert_eq!(app.popup, Popup::None);
        assert_eq!(app.key_source, Some("config"));
        assert_eq!(app.status_message.as_deref(), Some("API Key guardada"));
        let saved = Config::load_from(&path).unwrap();
        assert_eq!(saved.api_key.as_deref(), Some("test-key"));

        // The rebuilt client gets past the credential check and fails on the wire
        let err = app.client.complete("Hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport, "{err}");
    }

    #[tokio::test]
    async fn environment_key_still_wins_after_saving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut app = keyless_app(&path);
        app.env_api_key = Some("from-env".to_string());

        enter_key(&mut app, "typed-key");
        app.save_api_key().unwrap();

        assert_eq!(app.key_source, Some("env"));
        assert!(app
            .status_message
            .as_deref()
            .is_some_and(|m| m.contains("GEMINI_API_KEY tiene prioridad")));
        assert_eq!(Config::load_from(&path).unwrap().api_key.as_deref(), Some("typed-key"));
    }

    #[test]
    fn unreadable_config_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ broken").unwrap();
        let mut app = keyless_app(&path);

        enter_key(&mut app, "test-key");
        assert!(app.save_api_key().is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ broken");
        assert!(app.config.api_key.is_none());
        assert_eq!(app.key_source, None);
    }

    #[test]
    fn saving_without_a_config_location_fails() {
        let mut app = app_with(FakeClient::replying());
        enter_key(&mut app, "test-key");
        assert!(app.save_api_key().is_err());
        assert!(matches!(app.popup, Popup::ApiKeyEntry { .. }));
    }
}
