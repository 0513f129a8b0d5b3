//! Conversation state and the send cycle that drives it.
//!
//! Nothing in here touches the terminal or the network. The controller hands
//! out the prompt to send and is later told how the request ended; the UI only
//! ever reads `entries()`.

use tracing::{debug, error, info, warn};

use crate::gemini::{CompletionError, ErrorKind};

pub const GREETING: &str = "¡Hola! Soy tu asistente con Gemini. ¿En qué te ayudo?";
pub const APOLOGY: &str =
    "Lo siento, no pude conectarme con Gemini. Revisa tu conexión o API Key.";
pub const PENDING_CAPTION: &str = "Gemini está pensando...";

pub type EntryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Assistant,
}

/// One bubble's worth of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub id: EntryId,
    pub text: String,
    pub author: Author,
    /// Only set on the "assistant is responding" placeholder.
    pub pending: bool,
}

impl ChatEntry {
    fn user(id: EntryId, text: String) -> Self {
        Self {
            id,
            text,
            author: Author::User,
            pending: false,
        }
    }

    fn assistant(id: EntryId, text: String) -> Self {
        Self {
            id,
            text,
            author: Author::Assistant,
            pending: false,
        }
    }

    fn placeholder(id: EntryId) -> Self {
        Self {
            id,
            text: String::new(),
            author: Author::Assistant,
            pending: true,
        }
    }
}

/// Ordered, in-memory list of entries. Insertion order is display order.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<ChatEntry>,
}

impl MessageStore {
    pub fn append(&mut self, entry: ChatEntry) {
        debug_assert!(
            !self.contains(entry.id),
            "duplicate entry id {}",
            entry.id
        );
        self.entries.push(entry);
    }

    /// Removes the entry with `id`, if there is one.
    pub fn remove_by_id(&mut self, id: EntryId) -> Option<ChatEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    pub fn all(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}

/// How a send cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Replied,
    Failed(ErrorKind),
}

/// The conversation plus the controller that mutates it.
///
/// A send cycle is `submit_draft` followed by exactly one `finish`. While a
/// cycle is open the placeholder id is held in `pending`, so "sending" and
/// "a placeholder exists" cannot disagree.
#[derive(Debug)]
pub struct Conversation {
    store: MessageStore,
    draft: String,
    pending: Option<EntryId>,
    next_id: EntryId,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// A fresh conversation seeded with the assistant greeting.
    pub fn new() -> Self {
        let mut conversation = Self {
            store: MessageStore::default(),
            draft: String::new(),
            pending: None,
            next_id: 1,
        };
        let id = conversation.allocate_id();
        conversation
            .store
            .append(ChatEntry::assistant(id, GREETING.to_string()));
        conversation
    }

    pub fn entries(&self) -> &[ChatEntry] {
        self.store.all()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_sending(&self) -> bool {
        self.pending.is_some()
    }

    /// Replace the draft. Ignored while a reply is outstanding.
    pub fn update_draft(&mut self, text: impl Into<String>) -> bool {
        if self.is_sending() {
            return false;
        }
        self.draft = text.into();
        true
    }

    /// Start a send cycle from the current draft.
    ///
    /// Returns the prompt to hand to the completion client, or `None` when the
    /// draft is blank or another reply is still outstanding. In both of those
    /// cases nothing changes.
    pub fn submit_draft(&mut self) -> Option<String> {
        if self.is_sending() {
            debug!("send ignored: a reply is already outstanding");
            return None;
        }

        let prompt = self.draft.trim();
        if prompt.is_empty() {
            return None;
        }
        let prompt = prompt.to_string();

        let user_id = self.allocate_id();
        self.store.append(ChatEntry::user(user_id, prompt.clone()));
        self.draft.clear();

        let placeholder_id = self.allocate_id();
        self.store.append(ChatEntry::placeholder(placeholder_id));
        self.pending = Some(placeholder_id);

        info!(chars = prompt.chars().count(), "send accepted");
        Some(prompt)
    }

    /// Close the open send cycle with the client's outcome.
    ///
    /// The placeholder always goes away. A reply becomes an assistant entry;
    /// any error becomes the fixed apology and is only logged in full.
    pub fn finish(&mut self, outcome: Result<String, CompletionError>) -> Option<Resolution> {
        let Some(placeholder_id) = self.pending.take() else {
            warn!("completion arrived with no send in flight, dropping it");
            return None;
        };
        self.store.remove_by_id(placeholder_id);

        let id = self.allocate_id();
        match outcome {
            Ok(reply) => {
                info!(chars = reply.chars().count(), "reply received");
                self.store.append(ChatEntry::assistant(id, reply));
                Some(Resolution::Replied)
            }
            Err(err) => {
                let kind = err.kind();
                error!(?kind, error = %err, "completion failed");
                self.store.append(ChatEntry::assistant(id, APOLOGY.to_string()));
                Some(Resolution::Failed(kind))
            }
        }
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
