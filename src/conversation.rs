use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{AssistantReply, ChatRequest, HistoryMessage};
use crate::sources::{FormattedCitation, SearchResult};
use crate::storage::{
    LocalStore, KEY_CHAT_MODE, KEY_CONVERSATIONS, KEY_SELECTED_DOMAINS, KEY_SELECTED_MODEL,
};

/// Sentinel content of the assistant placeholder that stands in for a
/// reply between send and resolution.
pub const PLACEHOLDER_CONTENT: &str = "…";

const TITLE_MAX_CHARS: usize = 50;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Normal,
    Documents,
    Internet,
}

impl ChatMode {
    pub const ALL: [ChatMode; 3] = [ChatMode::Normal, ChatMode::Documents, ChatMode::Internet];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Normal => "normal",
            ChatMode::Documents => "documents",
            ChatMode::Internet => "internet",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(ChatMode::Normal),
            "documents" => Some(ChatMode::Documents),
            "internet" => Some(ChatMode::Internet),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChatMode::Normal => "Chat",
            ChatMode::Documents => "Documents",
            ChatMode::Internet => "Internet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formatted_citations: Vec<FormattedCitation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default)]
    pub context_used: bool,
}

impl Message {
    fn user(content: &str) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.to_string(),
            html_content: None,
            timestamp: now_secs(),
            model: None,
            search_results: Vec::new(),
            formatted_citations: Vec::new(),
            citations: Vec::new(),
            context_used: false,
        }
    }

    fn placeholder() -> Self {
        Message {
            role: Role::Assistant,
            content: PLACEHOLDER_CONTENT.to_string(),
            ..Message::user("")
        }
    }

    fn from_reply(reply: AssistantReply) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: reply.content,
            html_content: reply.html_content,
            timestamp: now_secs(),
            model: reply.model,
            search_results: reply.search_results,
            formatted_citations: reply.formatted_citations,
            citations: reply.citations,
            context_used: reply.context_used,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.content == PLACEHOLDER_CONTENT
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub model_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub selected_workspaces: Vec<String>,
    #[serde(default)]
    pub selected_documents: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub chat_mode: Option<ChatMode>,
    #[serde(default)]
    pub mode_locked: bool,
    /// Never serialized: temporary conversations do not reach storage, and
    /// anything rehydrated is persistent by definition.
    #[serde(skip)]
    pub temporary: bool,
    #[serde(default)]
    pub selected_domains: Vec<String>,
}

impl Conversation {
    pub fn new(title: Option<&str>, model_id: &str, temporary: bool) -> Self {
        let now = now_secs();
        Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.unwrap_or("New conversation").to_string(),
            messages: Vec::new(),
            model_id: model_id.to_string(),
            created_at: now,
            updated_at: now,
            selected_workspaces: Vec::new(),
            selected_documents: HashMap::new(),
            chat_mode: None,
            mode_locked: false,
            temporary,
            selected_domains: Vec::new(),
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_placeholder()).count()
    }
}

/// How one chat turn resolved.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Success(AssistantReply),
    /// Network failure, backend error or client timeout. Carries the
    /// user-visible message for the store error slot.
    Failed(String),
    /// Superseded or explicitly aborted. Never surfaced.
    Cancelled,
}

/// Everything the caller needs to run the network half of a send.
#[derive(Debug)]
pub struct PreparedSend {
    pub conversation_id: String,
    pub request_id: String,
    pub token: CancellationToken,
    pub request: ChatRequest,
}

struct InFlight {
    request_id: String,
    placeholder_id: String,
    token: CancellationToken,
}

/// Single source of truth for conversations and the in-flight request
/// bookkeeping. Constructed once at startup and handed to the UI; all
/// mutation goes through it.
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    pub selected_model: String,
    pub chat_mode: Option<ChatMode>,
    pub selected_domains: Vec<String>,
    in_flight: HashMap<String, InFlight>,
    pub last_error: Option<String>,
    storage: LocalStore,
}

impl ConversationStore {
    pub fn new(storage: LocalStore, default_model: &str) -> Self {
        ConversationStore {
            conversations: Vec::new(),
            current_id: None,
            selected_model: default_model.to_string(),
            chat_mode: None,
            selected_domains: Vec::new(),
            in_flight: HashMap::new(),
            last_error: None,
            storage,
        }
    }

    /// Restore everything persisted by a previous run.
    pub fn hydrate(&mut self) {
        match self.storage.get(KEY_CONVERSATIONS) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<Conversation>>(&json) {
                Ok(conversations) => self.conversations = conversations,
                Err(e) => log::warn!("stored conversations unreadable, starting empty: {}", e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("could not read stored conversations: {}", e),
        }
        match self.storage.get(KEY_SELECTED_MODEL) {
            Ok(Some(model)) if !model.is_empty() => self.selected_model = model,
            Ok(_) => {}
            Err(e) => log::warn!("could not read stored model: {}", e),
        }
        if let Ok(Some(mode)) = self.storage.get(KEY_CHAT_MODE) {
            self.chat_mode = ChatMode::from_str(&mode);
        }
        if let Ok(Some(domains)) = self.storage.get(KEY_SELECTED_DOMAINS) {
            match serde_json::from_str(&domains) {
                Ok(domains) => self.selected_domains = domains,
                Err(e) => log::warn!("stored domains unreadable: {}", e),
            }
        }
        self.current_id = self
            .conversations
            .iter()
            .max_by_key(|c| c.updated_at)
            .map(|c| c.id.clone());
    }

    /// Best-effort synchronous write-through; storage errors are logged,
    /// never surfaced.
    fn persist(&self) {
        // Placeholders exist only between send and resolution; a restarted
        // process has no in-flight entry left to remove them, so they must
        // never reach disk.
        let non_temporary: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| !c.temporary)
            .map(|c| {
                let mut snapshot = c.clone();
                snapshot.messages.retain(|m| !m.is_placeholder());
                snapshot
            })
            .collect();
        match serde_json::to_string(&non_temporary) {
            Ok(json) => {
                if let Err(e) = self.storage.put(KEY_CONVERSATIONS, &json) {
                    log::warn!("failed to persist conversations: {}", e);
                }
            }
            Err(e) => log::warn!("failed to serialize conversations: {}", e),
        }
        if let Err(e) = self.storage.put(KEY_SELECTED_MODEL, &self.selected_model) {
            log::warn!("failed to persist model selection: {}", e);
        }
        let mode_result = match self.chat_mode {
            Some(mode) => self.storage.put(KEY_CHAT_MODE, mode.as_str()),
            None => self.storage.delete(KEY_CHAT_MODE),
        };
        if let Err(e) = mode_result {
            log::warn!("failed to persist chat mode: {}", e);
        }
        match serde_json::to_string(&self.selected_domains) {
            Ok(json) => {
                if let Err(e) = self.storage.put(KEY_SELECTED_DOMAINS, &json) {
                    log::warn!("failed to persist domain selection: {}", e);
                }
            }
            Err(e) => log::warn!("failed to serialize domain selection: {}", e),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Conversation> {
        let id = self.current_id.clone()?;
        self.conversation_mut(&id)
    }

    pub fn is_loading(&self, conversation_id: &str) -> bool {
        self.in_flight.contains_key(conversation_id)
    }

    pub fn any_loading(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Create a conversation and make it current. A new temporary
    /// conversation first prunes any empty temporary ones, so at most one
    /// empty temporary conversation exists at a time.
    pub fn create_conversation(&mut self, title: Option<&str>, temporary: bool) -> String {
        if temporary {
            self.conversations
                .retain(|c| !(c.temporary && c.messages.is_empty()));
        }
        let mut conversation = Conversation::new(title, &self.selected_model, temporary);
        conversation.selected_domains = self.selected_domains.clone();
        let id = conversation.id.clone();
        self.conversations.push(conversation);
        self.current_id = Some(id.clone());
        if !temporary {
            self.persist();
        }
        id
    }

    /// No-op when the id is unknown. Restores the conversation's model and
    /// domain selections into the store-global slots.
    pub fn select_conversation(&mut self, id: &str) {
        let Some(conversation) = self.conversation(id) else {
            log::warn!("select_conversation: unknown id {}", id);
            return;
        };
        let model_id = conversation.model_id.clone();
        let selected_domains = conversation.selected_domains.clone();
        self.selected_model = model_id;
        self.selected_domains = selected_domains;
        self.current_id = Some(id.to_string());
    }

    pub fn delete_conversation(&mut self, id: &str) {
        if let Some(inflight) = self.in_flight.remove(id) {
            inflight.token.cancel();
        }
        self.conversations.retain(|c| c.id != id);
        if self.current_id.as_deref() == Some(id) {
            self.current_id = self
                .conversations
                .iter()
                .max_by_key(|c| c.updated_at)
                .map(|c| c.id.clone());
        }
        self.persist();
    }

    /// Synchronous half of the send protocol: optimistic user message,
    /// placeholder, first-message bookkeeping, supersede-and-cancel, and
    /// the request payload. Returns `None` for blank input.
    pub fn prepare_send(&mut self, text: &str) -> Option<PreparedSend> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if self.current().is_none() {
            self.create_conversation(None, false);
        }
        let conversation_id = self.current_id.clone()?;
        let request_id = Uuid::new_v4().to_string();

        // At most one in-flight request per conversation, newest wins. The
        // superseded request's placeholder goes away right here so the
        // conversation never shows two pending replies.
        if let Some(prior) = self.in_flight.remove(&conversation_id) {
            prior.token.cancel();
            if let Some(conversation) = self.conversation_mut(&conversation_id) {
                conversation
                    .messages
                    .retain(|m| m.id != prior.placeholder_id);
            }
        }

        let model_id = self.selected_model.clone();
        let global_mode = self.chat_mode;

        let conversation = self.conversation_mut(&conversation_id)?;
        let first_message = conversation.messages.is_empty();
        conversation.messages.push(Message::user(text));

        if first_message {
            conversation.title = text.chars().take(TITLE_MAX_CHARS).collect();
            conversation.chat_mode = global_mode;
            conversation.mode_locked = true;
            // First message converts a temporary conversation to a
            // persistent one.
            conversation.temporary = false;
        }

        // Prior turns only; the just-appended user message and the
        // placeholder are not replayed.
        let history: Vec<HistoryMessage> = conversation.messages
            [..conversation.messages.len() - 1]
            .iter()
            .map(|m| HistoryMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        conversation.messages.push(placeholder);
        conversation.updated_at = now_secs();

        let request = ChatRequest {
            message: text.to_string(),
            model_id,
            request_id: request_id.clone(),
            conversation_history: history,
            chat_mode: conversation.chat_mode.unwrap_or(ChatMode::Normal),
            selected_workspaces: conversation.selected_workspaces.clone(),
            selected_documents: conversation.selected_documents.clone(),
            selected_domains: conversation.selected_domains.clone(),
        };
        let temporary = conversation.temporary;

        let token = CancellationToken::new();
        self.in_flight.insert(
            conversation_id.clone(),
            InFlight {
                request_id: request_id.clone(),
                placeholder_id,
                token: token.clone(),
            },
        );
        if !temporary {
            self.persist();
        }

        Some(PreparedSend {
            conversation_id,
            request_id,
            token,
            request,
        })
    }

    /// Asynchronous half: reconcile one turn's outcome. Stale completions
    /// (superseded request ids) are dropped on the floor — their
    /// placeholder was already removed when the newer send took over.
    pub fn finish_send(&mut self, conversation_id: &str, request_id: &str, outcome: SendOutcome) {
        match self.in_flight.get(conversation_id) {
            Some(inflight) if inflight.request_id == request_id => {}
            _ => return,
        }
        let Some(inflight) = self.in_flight.remove(conversation_id) else {
            return;
        };

        let mut temporary = false;
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            conversation
                .messages
                .retain(|m| m.id != inflight.placeholder_id);
            temporary = conversation.temporary;
        }

        match outcome {
            SendOutcome::Success(reply) => {
                if let Some(conversation) = self.conversation_mut(conversation_id) {
                    conversation.messages.push(Message::from_reply(reply));
                    conversation.updated_at = now_secs();
                }
            }
            SendOutcome::Failed(message) => {
                self.last_error = Some(message);
            }
            SendOutcome::Cancelled => {}
        }

        if !temporary {
            self.persist();
        }
    }

    /// Abort every in-flight request across all conversations and drop
    /// their placeholders. Used on navigation away / shutdown.
    pub fn cancel_active_requests(&mut self) {
        let entries: Vec<(String, InFlight)> = self.in_flight.drain().collect();
        for (conversation_id, inflight) in entries {
            inflight.token.cancel();
            if let Some(conversation) = self.conversation_mut(&conversation_id) {
                conversation
                    .messages
                    .retain(|m| m.id != inflight.placeholder_id);
            }
        }
    }

    pub fn set_model(&mut self, model_id: &str) {
        self.selected_model = model_id.to_string();
        if let Some(conversation) = self.current_mut() {
            conversation.model_id = model_id.to_string();
        }
        self.persist();
    }

    /// Set the store-global mode. A conversation whose mode is locked is
    /// unaffected; the global mode only matters at first-message time.
    pub fn set_mode(&mut self, mode: ChatMode) {
        self.chat_mode = Some(mode);
        self.persist();
    }

    pub fn set_domains(&mut self, domains: Vec<String>) {
        self.selected_domains = domains;
        self.persist();
    }

    #[cfg(test)]
    fn storage(&self) -> &LocalStore {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(LocalStore::in_memory().unwrap(), "gpt-4o-mini")
    }

    fn reply(content: &str) -> AssistantReply {
        AssistantReply {
            content: content.to_string(),
            html_content: None,
            timestamp: None,
            model: Some("gpt-4o-mini".to_string()),
            search_results: Vec::new(),
            formatted_citations: Vec::new(),
            citations: Vec::new(),
            context_used: false,
        }
    }

    #[test]
    fn send_appends_user_and_placeholder() {
        let mut store = store();
        let prepared = store.prepare_send("hello there").unwrap();
        let conversation = store.current().unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.placeholder_count(), 1);
        assert!(store.is_loading(&prepared.conversation_id));
        assert!(prepared.request.conversation_history.is_empty());
    }

    #[test]
    fn success_replaces_placeholder() {
        let mut store = store();
        let prepared = store.prepare_send("hello").unwrap();
        store.finish_send(
            &prepared.conversation_id,
            &prepared.request_id,
            SendOutcome::Success(reply("hi!")),
        );
        let conversation = store.current().unwrap();
        assert_eq!(conversation.placeholder_count(), 0);
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].content, "hi!");
        assert!(!store.is_loading(&prepared.conversation_id));
        assert!(store.last_error.is_none());
    }

    #[test]
    fn failure_removes_placeholder_and_sets_error() {
        let mut store = store();
        let prepared = store.prepare_send("hello").unwrap();
        store.finish_send(
            &prepared.conversation_id,
            &prepared.request_id,
            SendOutcome::Failed("Request timed out after 120 seconds".to_string()),
        );
        let conversation = store.current().unwrap();
        assert_eq!(conversation.placeholder_count(), 0);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(
            store.last_error.as_deref(),
            Some("Request timed out after 120 seconds")
        );
    }

    #[test]
    fn cancellation_is_silent() {
        let mut store = store();
        let prepared = store.prepare_send("hello").unwrap();
        store.finish_send(
            &prepared.conversation_id,
            &prepared.request_id,
            SendOutcome::Cancelled,
        );
        assert_eq!(store.current().unwrap().messages.len(), 1);
        assert!(store.last_error.is_none());
    }

    #[test]
    fn second_send_supersedes_first() {
        let mut store = store();
        let first = store.prepare_send("first question").unwrap();
        let second = store.prepare_send("second question").unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);
        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());

        // One placeholder only, belonging to the second request.
        assert_eq!(store.current().unwrap().placeholder_count(), 1);

        // The first request's eventual completion is stale and ignored.
        store.finish_send(
            &first.conversation_id,
            &first.request_id,
            SendOutcome::Cancelled,
        );
        assert_eq!(store.current().unwrap().placeholder_count(), 1);

        store.finish_send(
            &second.conversation_id,
            &second.request_id,
            SendOutcome::Success(reply("answer")),
        );
        let conversation = store.current().unwrap();
        assert_eq!(conversation.placeholder_count(), 0);
        let replies: Vec<&Message> = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "answer");
    }

    #[test]
    fn stale_success_after_supersede_is_dropped() {
        let mut store = store();
        let first = store.prepare_send("first").unwrap();
        let _second = store.prepare_send("second").unwrap();
        store.finish_send(
            &first.conversation_id,
            &first.request_id,
            SendOutcome::Success(reply("late answer")),
        );
        let conversation = store.current().unwrap();
        assert!(conversation.messages.iter().all(|m| m.content != "late answer"));
        assert_eq!(conversation.placeholder_count(), 1);
    }

    #[test]
    fn first_message_locks_mode_and_titles() {
        let mut store = store();
        store.set_mode(ChatMode::Internet);
        let long_text = "x".repeat(80);
        store.prepare_send(&long_text).unwrap();
        let conversation = store.current().unwrap();
        assert_eq!(conversation.title.chars().count(), 50);
        assert_eq!(conversation.chat_mode, Some(ChatMode::Internet));
        assert!(conversation.mode_locked);
        assert!(!conversation.temporary);
    }

    #[test]
    fn first_message_persists_temporary_conversation() {
        let mut store = store();
        store.create_conversation(None, true);
        store.prepare_send("make me permanent").unwrap();
        assert!(!store.current().unwrap().temporary);
        let json = store.storage().get(KEY_CONVERSATIONS).unwrap().unwrap();
        let persisted: Vec<Conversation> = serde_json::from_str(&json).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn at_most_one_empty_temporary_conversation() {
        let mut store = store();
        store.create_conversation(Some("draft a"), true);
        store.create_conversation(Some("draft b"), true);
        let temporaries: Vec<&Conversation> = store
            .conversations()
            .iter()
            .filter(|c| c.temporary)
            .collect();
        assert_eq!(temporaries.len(), 1);
        assert_eq!(temporaries[0].title, "draft b");
    }

    #[test]
    fn placeholders_never_reach_storage() {
        let mut store = store();
        store.prepare_send("pending question").unwrap();
        // In memory the placeholder is live...
        assert_eq!(store.current().unwrap().placeholder_count(), 1);
        // ...but the stored snapshot only carries the user turn.
        let json = store.storage().get(KEY_CONVERSATIONS).unwrap().unwrap();
        let persisted: Vec<Conversation> = serde_json::from_str(&json).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].placeholder_count(), 0);
        assert_eq!(persisted[0].messages.len(), 1);
        assert_eq!(persisted[0].messages[0].role, Role::User);
    }

    #[test]
    fn temporary_conversations_are_not_persisted() {
        let mut store = store();
        store.create_conversation(None, false);
        store.create_conversation(None, true);
        store.set_mode(ChatMode::Normal); // triggers a persist
        let json = store.storage().get(KEY_CONVERSATIONS).unwrap().unwrap();
        let persisted: Vec<Conversation> = serde_json::from_str(&json).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn history_excludes_current_turn() {
        let mut store = store();
        let first = store.prepare_send("one").unwrap();
        store.finish_send(
            &first.conversation_id,
            &first.request_id,
            SendOutcome::Success(reply("two")),
        );
        let second = store.prepare_send("three").unwrap();
        let history = &second.request.conversation_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "one");
        assert_eq!(history[1].content, "two");
    }

    #[test]
    fn cancel_active_requests_covers_all_conversations() {
        let mut store = store();
        store.create_conversation(None, false);
        let first = store.prepare_send("question in a").unwrap();
        store.create_conversation(None, false);
        let second = store.prepare_send("question in b").unwrap();
        assert!(store.is_loading(&first.conversation_id));
        assert!(store.is_loading(&second.conversation_id));

        store.cancel_active_requests();
        assert!(!store.any_loading());
        assert!(first.token.is_cancelled());
        assert!(second.token.is_cancelled());
        for id in [&first.conversation_id, &second.conversation_id] {
            let conversation = store.conversation(id).unwrap();
            assert_eq!(conversation.placeholder_count(), 0);
            assert!(conversation.messages.iter().all(|m| m.role == Role::User));
        }
    }

    #[test]
    fn delete_current_falls_back_to_most_recent() {
        let mut store = store();
        let a = store.create_conversation(Some("a"), false);
        let b = store.create_conversation(Some("b"), false);
        if let Some(conversation) = store.conversation_mut(&a) {
            conversation.updated_at += 10;
        }
        store.delete_conversation(&b);
        assert_eq!(store.current_id(), Some(a.as_str()));
        store.delete_conversation(&a);
        assert!(store.current().is_none());
    }

    #[test]
    fn select_unknown_conversation_is_noop() {
        let mut store = store();
        let id = store.create_conversation(None, false);
        store.select_conversation("nope");
        assert_eq!(store.current_id(), Some(id.as_str()));
    }

    #[test]
    fn select_restores_model_and_domains() {
        let mut store = store();
        let a = store.create_conversation(None, false);
        if let Some(conversation) = store.conversation_mut(&a) {
            conversation.model_id = "sonar-pro".to_string();
            conversation.selected_domains = vec!["arxiv.org".to_string()];
        }
        store.create_conversation(None, false);
        store.selected_model = "gpt-4o".to_string();

        store.select_conversation(&a);
        assert_eq!(store.selected_model, "sonar-pro");
        assert_eq!(store.selected_domains, vec!["arxiv.org"]);
    }

    #[test]
    fn clear_error_empties_the_slot() {
        let mut store = store();
        let prepared = store.prepare_send("q").unwrap();
        store.finish_send(
            &prepared.conversation_id,
            &prepared.request_id,
            SendOutcome::Failed("boom".to_string()),
        );
        assert!(store.last_error.is_some());
        store.clear_error();
        assert!(store.last_error.is_none());
    }

    #[test]
    fn blank_input_is_rejected() {
        let mut store = store();
        assert!(store.prepare_send("   ").is_none());
        assert!(store.current().is_none());
    }
}
