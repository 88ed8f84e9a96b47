use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hostelhub_types::models::{Conversation, Message};

use crate::api::MessagingApi;
use crate::error::{ClientError, Result};

/// Where a thread entry is in its send lifecycle. A failed send is removed
/// from the thread rather than kept in a third state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Shown optimistically; `message.id` is a temporary id.
    Pending,
    /// Carries the server id.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub message: Message,
    pub delivery: Delivery,
}

impl ThreadEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Confirmed,
        }
    }
}

#[derive(Default)]
struct StoreState {
    /// Most recently active first, one entry per counterpart.
    conversations: Vec<Conversation>,
    open: Option<String>,
    thread: Vec<ThreadEntry>,
    online: HashSet<String>,
    /// Server ids folded into previews and unread counts since the last
    /// successful refresh.
    seen: HashSet<String>,
    last_error: Option<ClientError>,
}

impl StoreState {
    fn thread_contains(&self, id: &str) -> bool {
        self.thread.iter().any(|e| e.message.id == id)
    }

    /// Move the counterpart's conversation to the head and fold `message` into
    /// its preview. No-op for a server id that was already applied.
    fn touch(&mut self, counterpart: &str, message: &Message, count_unread: bool) {
        if !self.seen.insert(message.id.clone()) {
            return;
        }

        let mut conversation = match self
            .conversations
            .iter()
            .position(|c| c.counterpart_id == counterpart)
        {
            Some(idx) => self.conversations.remove(idx),
            None => {
                debug!("New conversation with {}", counterpart);
                Conversation::new(counterpart)
            }
        };

        conversation.last_message = message.content.clone();
        conversation.last_message_time = Some(message.created_at);
        if count_unread {
            conversation.unread_count += 1;
        }
        self.conversations.insert(0, conversation);
    }
}

/// Per-session cache of conversations and the open thread, reconciling REST
/// history, optimistic sends and realtime pushes.
pub struct ConversationStore {
    api: Arc<dyn MessagingApi>,
    me: String,
    state: RwLock<StoreState>,
}

impl ConversationStore {
    pub fn new(api: Arc<dyn MessagingApi>, me: impl Into<String>) -> Self {
        Self {
            api,
            me: me.into(),
            state: RwLock::new(StoreState::default()),
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn conversation(&self, counterpart: &str) -> Option<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .iter()
            .find(|c| c.counterpart_id == counterpart)
            .cloned()
    }

    pub async fn thread(&self) -> Vec<ThreadEntry> {
        self.state.read().await.thread.clone()
    }

    pub async fn open_counterpart(&self) -> Option<String> {
        self.state.read().await.open.clone()
    }

    /// Last fetch or send failure, cleared by the next successful fetch.
    pub async fn last_error(&self) -> Option<ClientError> {
        self.state.read().await.last_error.clone()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state.read().await.online.contains(user_id)
    }

    pub async fn set_presence(&self, user_id: &str, online: bool) {
        let mut state = self.state.write().await;
        if online {
            state.online.insert(user_id.to_string());
        } else {
            state.online.remove(user_id);
        }
    }

    /// Reload the conversation list. A failure leaves an empty list and sets
    /// [`last_error`](Self::last_error) instead of propagating.
    pub async fn refresh_conversations(&self) -> Vec<Conversation> {
        let result = self.api.conversations().await;

        let mut state = self.state.write().await;
        match result {
            Ok(mut list) => {
                list.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
                let mut ids = HashSet::new();
                list.retain(|c| ids.insert(c.counterpart_id.clone()));

                if let Some(open) = state.open.clone() {
                    if let Some(c) = list.iter_mut().find(|c| c.counterpart_id == open) {
                        c.unread_count = 0;
                    }
                }

                info!("Loaded {} conversations", list.len());
                state.conversations = list;
                // The fetched previews already account for everything seen so far.
                state.seen.clear();
                state.last_error = None;
            }
            Err(e) => {
                warn!("Loading conversations failed: {}", e);
                state.conversations.clear();
                state.last_error = Some(e);
            }
        }
        state.conversations.clone()
    }

    /// Make `counterpart` the viewed conversation: clears its unread count and
    /// loads its history. Re-opening the current conversation reloads history
    /// and keeps pending sends. On failure the thread holds only what is
    /// already local.
    pub async fn open_conversation(&self, counterpart: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.open.as_deref() != Some(counterpart) {
                state.open = Some(counterpart.to_string());
                state.thread.clear();
            }
            if let Some(c) = state
                .conversations
                .iter_mut()
                .find(|c| c.counterpart_id == counterpart)
            {
                c.unread_count = 0;
            }
        }

        let result = self.api.messages_with(counterpart).await;

        let mut state = self.state.write().await;
        if state.open.as_deref() != Some(counterpart) {
            // Switched away while loading.
            return Ok(());
        }

        match result {
            Ok(history) => {
                let local = std::mem::take(&mut state.thread);
                let mut thread: Vec<ThreadEntry> = Vec::with_capacity(history.len() + local.len());
                for message in history {
                    state.seen.insert(message.id.clone());
                    if !thread.iter().any(|e| e.message.id == message.id) {
                        thread.push(ThreadEntry::confirmed(message));
                    }
                }
                for entry in local {
                    if !thread.iter().any(|e| e.message.id == entry.message.id) {
                        thread.push(entry);
                    }
                }
                debug!("Opened conversation with {} ({} messages)", counterpart, thread.len());
                state.thread = thread;
                Ok(())
            }
            Err(e) => {
                warn!("Loading messages with {} failed: {}", counterpart, e);
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    pub async fn close_conversation(&self) {
        let mut state = self.state.write().await;
        state.open = None;
        state.thread.clear();
    }

    /// Send with an optimistic placeholder. On success the placeholder becomes
    /// the server message; on failure it is removed and the error returned.
    pub async fn send_message(&self, to: &str, content: &str) -> Result<Message> {
        let temp_id = format!("temp-{}", Uuid::new_v4());

        {
            let mut state = self.state.write().await;
            if state.open.as_deref() == Some(to) {
                state.thread.push(ThreadEntry {
                    message: Message {
                        id: temp_id.clone(),
                        sender: self.me.clone(),
                        recipient: to.to_string(),
                        content: content.to_string(),
                        created_at: Utc::now(),
                        read: false,
                    },
                    delivery: Delivery::Pending,
                });
            }
        }

        let result = self.api.send_message(to, content).await;

        let mut state = self.state.write().await;
        let slot = state.thread.iter().position(|e| e.message.id == temp_id);

        match result {
            Ok(message) => {
                if let Some(idx) = slot {
                    let echo = state.thread.iter().position(|e| e.message.id == message.id);
                    state.thread[idx] = ThreadEntry::confirmed(message.clone());
                    if let Some(echo) = echo {
                        // The realtime echo won the race; keep the placeholder's slot.
                        state.thread.remove(echo);
                    }
                }
                state.touch(to, &message, false);
                Ok(message)
            }
            Err(e) => {
                warn!("Sending message to {} failed: {}", to, e);
                if let Some(idx) = slot {
                    state.thread.remove(idx);
                }
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Fold a pushed message into the store. Returns false for a server id
    /// that was already applied.
    pub async fn apply_inbound(&self, message: Message) -> bool {
        let mut state = self.state.write().await;

        if state.seen.contains(&message.id) || state.thread_contains(&message.id) {
            debug!("Dropping duplicate message {}", message.id);
            return false;
        }

        let counterpart = message.counterpart(&self.me).to_string();
        let is_open = state.open.as_deref() == Some(counterpart.as_str());
        let from_me = message.sender == self.me;

        state.touch(&counterpart, &message, !is_open && !from_me);
        if is_open {
            state.thread.push(ThreadEntry::confirmed(message));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeMessaging {
        conversations: Mutex<Option<Vec<Conversation>>>,
        history: Mutex<Vec<Message>>,
        fail_send: Mutex<bool>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        next_id: Mutex<u32>,
    }

    #[async_trait]
    impl MessagingApi for FakeMessaging {
        async fn send_message(&self, to: &str, content: &str) -> Result<Message> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if *self.fail_send.lock().unwrap() {
                return Err(ClientError::Network("connection reset".into()));
            }
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                format!("m{}", *next)
            };
            Ok(msg(&id, "me", to, content, 100))
        }

        async fn conversations(&self) -> Result<Vec<Conversation>> {
            self.conversations
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ClientError::Network("offline".into()))
        }

        async fn messages_with(&self, _counterpart: &str) -> Result<Vec<Message>> {
            Ok(self.history.lock().unwrap().clone())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_790_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, sender: &str, recipient: &str, content: &str, secs: i64) -> Message {
        Message {
            id: id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            created_at: at(secs),
            read: false,
        }
    }

    fn conversation(counterpart: &str, secs: i64, unread: u32) -> Conversation {
        Conversation {
            counterpart_id: counterpart.into(),
            name: None,
            last_message: format!("hello from {}", counterpart),
            last_message_time: Some(at(secs)),
            unread_count: unread,
        }
    }

    fn store(api: Arc<FakeMessaging>) -> ConversationStore {
        ConversationStore::new(api, "me")
    }

    #[tokio::test]
    async fn refresh_orders_by_recency() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![
            conversation("u1", 10, 0),
            conversation("u3", 30, 2),
            conversation("u2", 20, 1),
        ]);
        let store = store(api);

        let list = store.refresh_conversations().await;
        let order: Vec<_> = list.iter().map(|c| c.counterpart_id.as_str()).collect();
        assert_eq!(order, vec!["u3", "u2", "u1"]);
        assert!(store.last_error().await.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_yields_empty_list_and_error() {
        let api = Arc::new(FakeMessaging::default());
        let store = store(api);

        assert!(store.refresh_conversations().await.is_empty());
        assert!(matches!(store.last_error().await, Some(ClientError::Network(_))));
    }

    #[tokio::test]
    async fn failed_send_restores_previous_state() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![conversation("u2", 10, 0)]);
        *api.history.lock().unwrap() = vec![msg("m0", "u2", "me", "is the room free?", 5)];
        *api.fail_send.lock().unwrap() = true;
        let store = store(api);
        store.refresh_conversations().await;
        store.open_conversation("u2").await.unwrap();

        let thread_before = store.thread().await;
        let list_before = store.conversations().await;

        let err = store.send_message("u2", "yes it is").await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert_eq!(store.thread().await, thread_before);
        assert_eq!(store.conversations().await, list_before);
    }

    #[tokio::test]
    async fn placeholder_is_replaced_in_place() {
        let api = Arc::new(FakeMessaging::default());
        let store = store(api);
        store.open_conversation("u2").await.unwrap();
        store.apply_inbound(msg("m0", "u2", "me", "hi", 1)).await;

        let sent = store.send_message("u2", "hello").await.unwrap();
        store.apply_inbound(msg("m9", "u2", "me", "how far?", 200)).await;

        let thread = store.thread().await;
        let ids: Vec<_> = thread.iter().map(|e| e.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", sent.id.as_str(), "m9"]);
        assert!(thread.iter().all(|e| e.delivery == Delivery::Confirmed));
    }

    #[tokio::test]
    async fn realtime_echo_before_rest_response_is_not_duplicated() {
        let api = Arc::new(FakeMessaging::default());
        let (release, gate) = oneshot::channel();
        *api.gate.lock().unwrap() = Some(gate);
        let store = store(api);
        store.open_conversation("u2").await.unwrap();
        let echo_store = &store;

        let (sent, _) = tokio::join!(store.send_message("u2", "on my way"), async move {
            let thread = echo_store.thread().await;
            assert_eq!(thread.len(), 1);
            assert_eq!(thread[0].delivery, Delivery::Pending);

            // Server id the fake will assign to this send.
            echo_store.apply_inbound(msg("m1", "me", "u2", "on my way", 100)).await;
            let _ = release.send(());
        });

        let sent = sent.unwrap();
        let thread = store.thread().await;
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].message.id, sent.id);
        assert_eq!(thread[0].delivery, Delivery::Confirmed);
    }

    #[tokio::test]
    async fn early_echo_keeps_the_placeholder_position() {
        let api = Arc::new(FakeMessaging::default());
        let (release, gate) = oneshot::channel();
        *api.gate.lock().unwrap() = Some(gate);
        let store = store(api);
        store.open_conversation("u2").await.unwrap();
        let live_store = &store;

        let (sent, _) = tokio::join!(store.send_message("u2", "mine"), async move {
            live_store.apply_inbound(msg("m50", "u2", "me", "also, rent is due", 90)).await;
            live_store.apply_inbound(msg("m1", "me", "u2", "mine", 100)).await;
            let _ = release.send(());
        });

        assert_eq!(sent.unwrap().id, "m1");
        let ids: Vec<_> = store.thread().await.iter().map(|e| e.message.id.clone()).collect();
        assert_eq!(ids, vec!["m1".to_string(), "m50".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_delivery_appears_once() {
        let api = Arc::new(FakeMessaging::default());
        let store = store(api);
        store.open_conversation("u2").await.unwrap();

        let m = msg("m7", "u2", "me", "see you", 50);
        assert!(store.apply_inbound(m.clone()).await);
        assert!(!store.apply_inbound(m).await);

        let thread = store.thread().await;
        assert_eq!(thread.iter().filter(|e| e.message.id == "m7").count(), 1);
    }

    #[tokio::test]
    async fn open_conversation_does_not_count_unread() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![conversation("u2", 50, 0), conversation("u3", 10, 0)]);
        let store = store(api);
        store.refresh_conversations().await;
        store.open_conversation("u2").await.unwrap();

        store.apply_inbound(msg("m5", "u2", "me", "rent is due", 60)).await;

        let head = store.conversations().await[0].clone();
        assert_eq!(head.counterpart_id, "u2");
        assert_eq!(head.unread_count, 0);
        assert_eq!(head.last_message, "rent is due");
        assert_eq!(head.last_message_time, Some(at(60)));
    }

    #[tokio::test]
    async fn closed_conversation_counts_each_message_once() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![conversation("u2", 50, 0), conversation("u3", 10, 0)]);
        let store = store(api);
        store.refresh_conversations().await;

        let m = msg("m8", "u3", "me", "any rooms left?", 70);
        store.apply_inbound(m.clone()).await;
        store.apply_inbound(m).await;

        let list = store.conversations().await;
        assert_eq!(list[0].counterpart_id, "u3");
        assert_eq!(list[0].unread_count, 1);
        assert!(store.thread().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_forgets_applied_ids() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![conversation("u3", 70, 1)]);
        let store = store(api);

        for i in 0..5 {
            store.apply_inbound(msg(&format!("m{}", i), "u3", "me", "ping", 60 + i)).await;
        }
        assert_eq!(store.state.read().await.seen.len(), 5);

        store.refresh_conversations().await;
        assert!(store.state.read().await.seen.is_empty());
        assert_eq!(store.conversation("u3").await.unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn first_message_creates_conversation() {
        let api = Arc::new(FakeMessaging::default());
        let store = store(api);

        store.apply_inbound(msg("m1", "u4", "me", "hello", 5)).await;

        let c = store.conversation("u4").await.unwrap();
        assert_eq!(c.unread_count, 1);
        assert_eq!(store.conversations().await.len(), 1);
    }

    #[tokio::test]
    async fn opening_resets_unread() {
        let api = Arc::new(FakeMessaging::default());
        *api.conversations.lock().unwrap() = Some(vec![conversation("u2", 50, 4)]);
        let store = store(api);
        store.refresh_conversations().await;

        store.open_conversation("u2").await.unwrap();
        assert_eq!(store.conversation("u2").await.unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn reopening_keeps_pending_send() {
        let api = Arc::new(FakeMessaging::default());
        *api.history.lock().unwrap() = vec![msg("m0", "u2", "me", "hi", 1)];
        let (release, gate) = oneshot::channel();
        *api.gate.lock().unwrap() = Some(gate);
        let store = store(api);
        store.open_conversation("u2").await.unwrap();
        let reopen_store = &store;

        let (sent, _) = tokio::join!(store.send_message("u2", "still there?"), async move {
            reopen_store.open_conversation("u2").await.unwrap();
            let thread = reopen_store.thread().await;
            assert_eq!(thread.len(), 2);
            assert_eq!(thread[1].delivery, Delivery::Pending);
            let _ = release.send(());
        });

        let sent = sent.unwrap();
        let ids: Vec<_> = store.thread().await.iter().map(|e| e.message.id.clone()).collect();
        assert_eq!(ids, vec!["m0".to_string(), sent.id]);
    }

    #[tokio::test]
    async fn presence_tracking() {
        let store = store(Arc::new(FakeMessaging::default()));
        store.set_presence("u2", true).await;
        assert!(store.is_online("u2").await);
        store.set_presence("u2", false).await;
        assert!(!store.is_online("u2").await);
    }
}
