//! Core chat session management.
//!
//! A `ChatSession` owns one conversation: its history, the files attached to
//! it, and (optionally) the database row it is mirrored into. Two versions of
//! each user turn exist. The stored history keeps only what the user typed;
//! the copy sent to the backend also carries the attached files' content.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use tracing::{debug, info, warn};

use crate::attachments::{AttachmentReader, normalize_file_path};
use crate::chat::config::ChatConfig;
use crate::client::ChatBackend;
use crate::error::{Error, Result};
use crate::observability::{SESSION_MESSAGES, SESSION_TRIMMED_MESSAGES};
use crate::store::ConversationDatabase;
use crate::tokens::{Cl100kCounter, TokenCounter, count_history};
use crate::types::{ChatMessage, Role};

/// Titles with this prefix are placeholders and get replaced after the first reply.
pub const PLACEHOLDER_TITLE_PREFIX: &str = "Conversation";

/// Number of words of the first user message used as an automatic title.
const AUTO_TITLE_WORDS: usize = 7;

const SUMMARY_PROMPT: &str = "Summarize the following conversation in seven words or less:\n";

/// A chat session that manages conversation state and API interactions.
pub struct ChatSession<B: ChatBackend> {
    backend: B,
    config: ChatConfig,
    counter: Arc<dyn TokenCounter>,
    reader: AttachmentReader,
    history: Vec<ChatMessage>,
    last_total_tokens: u64,
    store: Option<Arc<ConversationDatabase>>,
    conversation_id: Option<i64>,
    attached_files: Vec<String>,
}

/// Snapshot of a session for `/stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The deployment the session talks to.
    pub deployment: String,
    /// The number of messages in the history, seed prompt included.
    pub message_count: usize,
    /// Tokens currently held by the history.
    pub context_tokens: usize,
    /// `total_tokens` reported by the last successful request.
    pub last_total_tokens: u64,
    /// Token budget for the history.
    pub max_context_tokens: usize,
    /// Database id of the conversation, if persisted.
    pub conversation_id: Option<i64>,
    /// Files sent along with every message.
    pub attached_files: Vec<String>,
}

impl<B: ChatBackend> ChatSession<B> {
    /// Creates a session counting tokens with `cl100k_base`.
    pub fn new(backend: B, config: ChatConfig) -> Result<Self> {
        let counter = Cl100kCounter::new()?;
        Ok(Self::with_counter(backend, config, Arc::new(counter)))
    }

    /// Creates a session with a caller-supplied token counter.
    pub fn with_counter(backend: B, config: ChatConfig, counter: Arc<dyn TokenCounter>) -> Self {
        let history = vec![ChatMessage::system(config.system_prompt.clone())];
        info!(
            "Initialized new chat session with deployment: {}",
            config.deployment.deployment_name
        );
        Self {
            backend,
            config,
            counter,
            reader: AttachmentReader::new(),
            history,
            last_total_tokens: 0,
            store: None,
            conversation_id: None,
            attached_files: Vec::new(),
        }
    }

    /// Mirrors this session into `conversation_id` of `store`.
    ///
    /// Files previously attached to the conversation are restored.
    pub fn with_store(
        mut self,
        store: Arc<ConversationDatabase>,
        conversation_id: i64,
    ) -> Result<Self> {
        self.attached_files = store.attachments(conversation_id)?;
        if let Some(tokens) = store.conversation_tokens(conversation_id)? {
            self.last_total_tokens = u64::try_from(tokens).unwrap_or(0);
        }
        info!(
            conversation_id,
            attached = self.attached_files.len(),
            "attached session to conversation"
        );
        self.store = Some(store);
        self.conversation_id = Some(conversation_id);
        Ok(self)
    }

    /// Replaces the history with one loaded from storage.
    pub fn load_history(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages;
        info!("Loaded existing conversation history into session");
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn deployment_name(&self) -> &str {
        &self.config.deployment.deployment_name
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.conversation_id
    }

    pub fn last_total_tokens(&self) -> u64 {
        self.last_total_tokens
    }

    /// Tokens held by the history's message contents.
    pub fn count_tokens(&self) -> usize {
        count_history(self.counter.as_ref(), &self.history)
    }

    /// Drops the oldest messages after the seed prompt until the history fits.
    ///
    /// At least two messages always remain. Returns how many were removed.
    pub fn trim_history(&mut self) -> usize {
        let mut history = std::mem::take(&mut self.history);
        let removed = self.trim(&mut history);
        self.history = history;
        removed
    }

    fn trim(&self, messages: &mut Vec<ChatMessage>) -> usize {
        let counter = self.counter.as_ref();
        let mut removed = 0;
        while count_history(counter, messages) > self.config.max_context_tokens
            && messages.len() > 2
        {
            let dropped = messages.remove(1);
            debug!(role = %dropped.role, "removed oldest message to trim tokens");
            removed += 1;
        }
        if removed > 0 {
            SESSION_TRIMMED_MESSAGES.count(removed as u64);
            info!(removed, "trimmed conversation history");
        }
        removed
    }

    /// Sends `text` together with the content of the session's attached files.
    pub async fn send(&mut self, text: &str) -> Result<String> {
        let attachments = self.attached_files.clone();
        self.send_message(text, &attachments).await
    }

    /// Sends `text` with the content of `attachments` and returns the reply.
    ///
    /// The history only changes once a reply has arrived, so on failure (or
    /// when the returned future is dropped) it is left as it was.
    pub async fn send_message<S: AsRef<str>>(
        &mut self,
        text: &str,
        attachments: &[S],
    ) -> Result<String> {
        SESSION_MESSAGES.click();
        let attachment_content = if attachments.is_empty() {
            String::new()
        } else {
            let paths: Vec<&str> = attachments.iter().map(|path| path.as_ref()).collect();
            self.reader.read_paths(&paths)
        };

        let redacted = text.trim().to_string();
        let mut full = redacted.clone();
        let attachment_content = attachment_content.trim();
        if !attachment_content.is_empty() {
            full.push('\n');
            full.push_str(attachment_content);
        }

        let mut history = self.history.clone();
        history.push(ChatMessage::user(redacted));
        self.trim(&mut history);
        info!(
            "Current token count (before API call): {}",
            count_history(self.counter.as_ref(), &history)
        );

        let mut request = history.clone();
        if let Some(last) = request.last_mut() {
            last.content = full;
        }

        let completion = match self
            .backend
            .complete(&self.config.deployment.deployment_name, &request)
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                warn!(error = %err, "chat completion failed");
                return Err(err);
            }
        };
        let Some(reply) = completion.reply().map(str::to_string) else {
            return Err(Error::api(
                200,
                Some("empty_response".to_string()),
                "chat completion returned no choices".to_string(),
                completion.id.clone(),
            ));
        };

        if let Some(usage) = completion.usage {
            self.last_total_tokens = usage.total_tokens;
            self.persist(|store, id| store.update_tokens(id, to_i64(usage.total_tokens)));
        }
        info!(
            "Received reply. Total tokens used: {}",
            self.last_total_tokens
        );

        history.push(ChatMessage::assistant(reply.clone()));
        self.trim(&mut history);
        self.history = history;
        let tokens = self.count_tokens();
        info!("Current token count (after API call): {tokens}");
        self.persist(|store, id| store.update_tokens(id, to_i64(tokens as u64)));
        self.persist_history();
        self.retitle_placeholder();
        Ok(reply)
    }

    /// The first message sent by the user, trimmed.
    ///
    /// Index 0 is always the seed prompt, whatever role it was stored with.
    pub fn first_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .skip(1)
            .find(|message| message.role == Role::User)
            .map(|message| message.content.trim())
    }

    /// All message contents joined by newlines.
    pub fn conversation_text(&self) -> String {
        self.history
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Asks the backend for a short summary of the conversation.
    pub async fn generate_summary(&self) -> Result<String> {
        let prompt = format!("{SUMMARY_PROMPT}{}", self.conversation_text());
        let completion = self
            .backend
            .complete(
                &self.config.deployment.deployment_name,
                &[ChatMessage::user(prompt)],
            )
            .await?;
        match completion.reply().map(str::trim) {
            Some(summary) if !summary.is_empty() => Ok(summary.to_string()),
            _ => Err(Error::api(
                200,
                Some("empty_response".to_string()),
                "summary request returned no text".to_string(),
                completion.id.clone(),
            )),
        }
    }

    /// Renames the stored conversation. Blank titles are rejected.
    pub fn rename(&self, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation(
                "conversation title cannot be empty",
                Some("title".to_string()),
            ));
        }
        match (&self.store, self.conversation_id) {
            (Some(store), Some(id)) => store.update_title(id, title),
            _ => Err(Error::validation(
                "session is not attached to a stored conversation",
                None,
            )),
        }
    }

    /// Resets the history to the seed prompt. Attached files are kept.
    pub fn clear(&mut self) {
        self.history = vec![ChatMessage::system(self.config.system_prompt.clone())];
        self.last_total_tokens = 0;
        self.persist(|store, id| store.update_tokens(id, 0));
        self.persist_history();
    }

    /// Attaches files or directories; returns the newly attached normalized paths.
    ///
    /// Every path must exist. Paths already attached are skipped.
    pub fn attach<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for path in paths {
            let path = path.as_ref().trim();
            if path.is_empty() {
                continue;
            }
            let normalized = normalize_file_path(path);
            if !normalized.exists() {
                return Err(Error::attachment(
                    "file or directory does not exist",
                    path.to_string(),
                ));
            }
            let normalized = normalized.to_string_lossy().into_owned();
            if self.attached_files.contains(&normalized) || added.contains(&normalized) {
                info!("File already attached: {normalized}");
                continue;
            }
            added.push(normalized);
        }
        if let (Some(store), Some(id)) = (&self.store, self.conversation_id) {
            store.record_attachments(id, &added)?;
        }
        self.attached_files.extend(added.iter().cloned());
        Ok(added)
    }

    /// Detaches one file; returns whether it was attached.
    pub fn detach(&mut self, path: &str) -> Result<bool> {
        let normalized = normalize_file_path(path.trim())
            .to_string_lossy()
            .into_owned();
        let Some(position) = self
            .attached_files
            .iter()
            .position(|attached| *attached == normalized || attached.as_str() == path.trim())
        else {
            warn!("File '{normalized}' not found in attached files");
            return Ok(false);
        };
        let removed = self.attached_files.remove(position);
        if let (Some(store), Some(id)) = (&self.store, self.conversation_id) {
            store.remove_attachment(id, &removed)?;
        }
        info!("Removed '{removed}' from attached files");
        Ok(true)
    }

    pub fn attached_files(&self) -> &[String] {
        &self.attached_files
    }

    /// Saves the history to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile::new(&self.history);
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    /// Loads a transcript from disk, replacing the current history.
    pub fn load_transcript_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())
            .map_err(|err| Error::io("failed to open transcript file", err))?;
        let reader = BufReader::new(file);
        let transcript: TranscriptFile = from_reader(reader).map_err(|err| {
            Error::serialization("failed to parse transcript", Some(Box::new(err)))
        })?;
        if transcript.version != TRANSCRIPT_VERSION {
            return Err(Error::validation(
                format!("unsupported transcript version {}", transcript.version),
                Some("version".to_string()),
            ));
        }
        self.history = transcript.messages;
        self.persist_history();
        Ok(())
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            deployment: self.config.deployment.deployment_name.clone(),
            message_count: self.message_count(),
            context_tokens: self.count_tokens(),
            last_total_tokens: self.last_total_tokens,
            max_context_tokens: self.config.max_context_tokens,
            conversation_id: self.conversation_id,
            attached_files: self.attached_files.clone(),
        }
    }

    fn persist<F>(&self, write: F)
    where
        F: FnOnce(&ConversationDatabase, i64) -> Result<()>,
    {
        if let (Some(store), Some(id)) = (&self.store, self.conversation_id)
            && let Err(err) = write(store, id)
        {
            warn!(conversation_id = id, error = %err, "failed to persist conversation");
        }
    }

    fn persist_history(&self) {
        self.persist(|store, id| store.update_history(id, &self.history));
    }

    fn retitle_placeholder(&self) {
        let Some(title) = self.first_user_message().map(auto_title) else {
            return;
        };
        if title.is_empty() {
            return;
        }
        self.persist(|store, id| {
            let Some(record) = store.conversation(id)? else {
                return Ok(());
            };
            if record.title.starts_with(PLACEHOLDER_TITLE_PREFIX) {
                store.update_title(id, &title)?;
            }
            Ok(())
        });
    }
}

/// The first seven words of `message`.
pub fn auto_title(message: &str) -> String {
    message
        .split_whitespace()
        .take(AUTO_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

const TRANSCRIPT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct TranscriptFile {
    version: u8,
    messages: Vec<ChatMessage>,
}

impl TranscriptFile {
    fn new(messages: &[ChatMessage]) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            messages: messages.to_vec(),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::types::{ChatCompletion, Usage};

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    #[derive(Default)]
    struct MockBackend {
        replies: Mutex<VecDeque<Result<ChatCompletion>>>,
        requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl MockBackend {
        fn replying(replies: Vec<Result<ChatCompletion>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for MockBackend {
        async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion> {
            self.requests
                .lock()
                .unwrap()
                .push((model.to_string(), messages.to_vec()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatCompletion::from_reply("ok", None)))
        }
    }

    fn reply(text: &str, total: u64) -> Result<ChatCompletion> {
        Ok(ChatCompletion::from_reply(
            text,
            Some(Usage {
                prompt_tokens: total / 2,
                completion_tokens: total - total / 2,
                total_tokens: total,
            }),
        ))
    }

    fn session(backend: MockBackend, max_context_tokens: usize) -> ChatSession<MockBackend> {
        let config = ChatConfig::new()
            .with_system_prompt("be helpful")
            .with_max_context_tokens(max_context_tokens);
        ChatSession::with_counter(backend, config, Arc::new(WordCounter))
    }

    fn stored(
        session: ChatSession<MockBackend>,
    ) -> (ChatSession<MockBackend>, Arc<ConversationDatabase>, i64) {
        let db = Arc::new(ConversationDatabase::open_in_memory().unwrap());
        let id = db
            .add_conversation("Conversation 1", session.deployment_name(), session.history(), 0)
            .unwrap();
        let session = session.with_store(db.clone(), id).unwrap();
        (session, db, id)
    }

    #[test]
    fn new_session_is_seeded() {
        let session = session(MockBackend::default(), 100);
        assert_eq!(session.history(), &[ChatMessage::system("be helpful")]);
        assert_eq!(session.count_tokens(), 2);
        assert_eq!(session.first_user_message(), None);
    }

    #[test]
    fn trim_keeps_seed_and_latest() {
        let mut session = session(MockBackend::default(), 5);
        session.load_history(vec![
            ChatMessage::system("seed prompt"),
            ChatMessage::user("one two three"),
            ChatMessage::assistant("four five six"),
            ChatMessage::user("seven eight nine ten"),
        ]);
        let removed = session.trim_history();
        assert_eq!(removed, 2);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].content, "seed prompt");
        // Still over budget, but two messages are the floor.
        assert_eq!(session.count_tokens(), 6);
        assert_eq!(session.history()[1].content, "seven eight nine ten");
    }

    #[tokio::test]
    async fn send_message_stores_redacted_and_sends_full() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "secret notes").unwrap();
        let path = file.to_string_lossy().into_owned();

        let mut session = session(MockBackend::replying(vec![reply("Sure.", 42)]), 1000);
        let answer = session.send_message("  summarize this  ", &[path.as_str()]).await.unwrap();
        assert_eq!(answer, "Sure.");

        assert_eq!(
            session.history(),
            &[
                ChatMessage::system("be helpful"),
                ChatMessage::user("summarize this"),
                ChatMessage::assistant("Sure."),
            ]
        );
        assert_eq!(session.last_total_tokens(), 42);

        let requests = session.backend().requests();
        assert_eq!(requests.len(), 1);
        let (model, sent) = &requests[0];
        assert_eq!(model, "gpt-3.5-turbo");
        assert_eq!(sent.len(), 2);
        let content = &sent[1].content;
        assert!(content.starts_with("summarize this\n<|file|>[Content from "));
        assert!(content.contains("secret notes"));
        assert!(content.ends_with("<|/file|>"));
    }

    #[tokio::test]
    async fn failed_send_leaves_history_untouched() {
        let backend = MockBackend::replying(vec![Err(Error::rate_limit("slow down", Some(3)))]);
        let mut session = session(backend, 1000);
        let err = session.send_message::<&str>("hello", &[]).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.last_total_tokens(), 0);
    }

    #[tokio::test]
    async fn failed_send_restores_trimmed_messages() {
        let backend = MockBackend::replying(vec![Err(Error::timeout("too slow", Some(60.0)))]);
        let mut session = session(backend, 4);
        let before = vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("a b"),
            ChatMessage::assistant("c"),
        ];
        session.load_history(before.clone());
        assert!(session.send_message::<&str>("d e", &[]).await.is_err());
        let requests = session.backend().requests();
        assert_eq!(requests[0].1.len(), 2);
        assert_eq!(session.history(), before.as_slice());
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let empty = ChatCompletion {
            id: Some("cmpl-1".to_string()),
            model: None,
            choices: Vec::new(),
            usage: None,
        };
        let mut session = session(MockBackend::replying(vec![Ok(empty)]), 1000);
        let err = session.send_message::<&str>("hello", &[]).await.unwrap_err();
        assert_eq!(err.request_id(), Some("cmpl-1"));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn reply_is_persisted_and_placeholder_title_replaced() {
        let backend = MockBackend::replying(vec![reply("Paris.", 17), reply("Yes.", 30)]);
        let (mut session, db, id) = stored(session(backend, 1000));

        session
            .send("what is the capital of France, in one word please?")
            .await
            .unwrap();
        let record = db.conversation(id).unwrap().unwrap();
        assert_eq!(record.title, "what is the capital of France, in");
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.history[2].content, "Paris.");
        assert_eq!(
            db.conversation_tokens(id).unwrap(),
            Some(session.count_tokens() as i64)
        );

        db.update_title(id, "Geography").unwrap();
        session.send("sure?").await.unwrap();
        let record = db.conversation(id).unwrap().unwrap();
        assert_eq!(record.title, "Geography");
        assert_eq!(record.history.len(), 5);
    }

    #[tokio::test]
    async fn summary_uses_conversation_text() {
        let backend = MockBackend::replying(vec![reply("  Capital cities  ", 5)]);
        let mut session = session(backend, 1000);
        session.load_history(vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("capital of France?"),
            ChatMessage::assistant("Paris."),
        ]);
        assert_eq!(session.generate_summary().await.unwrap(), "Capital cities");
        let requests = session.backend().requests();
        let (_, sent) = &requests[0];
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].role, Role::User);
        assert_eq!(
            sent[0].content,
            "Summarize the following conversation in seven words or less:\n\
             be helpful\ncapital of France?\nParis."
        );
        // Summaries do not touch the history.
        assert_eq!(session.history().len(), 3);
    }

    #[test]
    fn attach_dedups_and_mirrors_store() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        let a = a.to_string_lossy().into_owned();
        let b = b.to_string_lossy().into_owned();

        let (mut session, db, id) = stored(session(MockBackend::default(), 100));
        let added = session.attach(&[a.as_str(), b.as_str(), a.as_str()]).unwrap();
        assert_eq!(added.len(), 2);
        assert!(session.attach(&[a.as_str()]).unwrap().is_empty());
        assert_eq!(db.attachments(id).unwrap(), session.attached_files());

        assert!(session.detach(&a).unwrap());
        assert!(!session.detach(&a).unwrap());
        assert_eq!(session.attached_files().len(), 1);
        assert_eq!(db.attachments(id).unwrap(), session.attached_files());

        let missing = dir.path().join("missing.txt").to_string_lossy().into_owned();
        let err = session.attach(&[missing.as_str()]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn reopened_session_restores_attachments() {
        let db = Arc::new(ConversationDatabase::open_in_memory().unwrap());
        let id = db.add_conversation("Conversation 1", "gpt", &[], 9).unwrap();
        db.record_attachments(id, &["/tmp/one.txt"]).unwrap();
        let session = session(MockBackend::default(), 100)
            .with_store(db, id)
            .unwrap();
        assert_eq!(session.attached_files(), &["/tmp/one.txt".to_string()]);
        assert_eq!(session.last_total_tokens(), 9);
        assert_eq!(session.stats().conversation_id, Some(id));
    }

    #[test]
    fn rename_requires_store() {
        let session = session(MockBackend::default(), 100);
        assert!(session.rename("x").unwrap_err().is_validation());
    }

    #[test]
    fn rename_rejects_blank_titles() {
        let (session, db, id) = stored(session(MockBackend::default(), 100));
        assert!(session.rename("   ").unwrap_err().is_validation());
        assert_eq!(db.conversation(id).unwrap().unwrap().title, "Conversation 1");
        session.rename("  Borrow checker  ").unwrap();
        assert_eq!(db.conversation(id).unwrap().unwrap().title, "Borrow checker");
    }

    #[tokio::test]
    async fn blank_summary_is_an_error() {
        let backend = MockBackend::replying(vec![reply("   ", 5)]);
        let mut session = session(backend, 1000);
        session.load_history(vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("hi"),
        ]);
        let err = session.generate_summary().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Api { error_type: Some(ref kind), .. } if kind == "empty_response"
        ));
    }

    #[tokio::test]
    async fn user_role_seed_is_not_used_as_title() {
        let backend = MockBackend::replying(vec![reply("Sure.", 10)]);
        let (mut session, db, id) = stored(session(backend, 1000));
        session.load_history(vec![ChatMessage::user(
            "You are Obelisca Divergencia da Silva, a helpful programming assistant.",
        )]);
        assert_eq!(session.first_user_message(), None);

        session.send("explain lifetimes in Rust briefly").await.unwrap();
        assert_eq!(
            session.first_user_message(),
            Some("explain lifetimes in Rust briefly")
        );
        let record = db.conversation(id).unwrap().unwrap();
        assert_eq!(record.title, "explain lifetimes in Rust briefly");
    }

    #[test]
    fn clear_resets_to_seed() {
        let mut session = session(MockBackend::default(), 100);
        session.load_history(vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("hi"),
        ]);
        session.clear();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.stats().message_count, 1);
    }

    #[test]
    fn transcript_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let mut session = session(MockBackend::default(), 100);
        session.load_history(vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        session.save_transcript_to(&path).unwrap();

        let mut other = self::session(MockBackend::default(), 100);
        other.load_transcript_from(&path).unwrap();
        assert_eq!(other.history(), session.history());

        std::fs::write(&path, r#"{"version": 9, "messages": []}"#).unwrap();
        assert!(other.load_transcript_from(&path).unwrap_err().is_validation());
    }

    #[test]
    fn auto_title_takes_seven_words() {
        assert_eq!(
            auto_title("one two  three\nfour five six seven eight"),
            "one two three four five six seven"
        );
        assert_eq!(auto_title("short"), "short");
    }
}
