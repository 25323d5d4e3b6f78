use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::client::Backend;
use crate::api::events::{ChatLogUpdate, ServerEvent, Topic};
use crate::api::models::ChatLog;
use crate::error::Result;
use crate::live::router::{ListenerId, LiveRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Replaced(usize),
    Appended,
}

#[derive(Debug, Clone, Default)]
pub struct ChatLogState {
    pub contact_id: Option<String>,
    pub logs: Vec<ChatLog>,
    pub loading: bool,
    pub error: Option<String>,
    /// Set when the subscription could not be sent; retried on the next connect.
    pub subscription_pending: bool,
    generation: u64,
}

impl ChatLogState {
    /// Replace the entry with the same id in place, otherwise append.
    pub fn upsert(&mut self, log: ChatLog) -> Upsert {
        match self.logs.iter().position(|l| l.id == log.id) {
            Some(idx) => {
                self.logs[idx] = log;
                Upsert::Replaced(idx)
            }
            None => {
                self.logs.push(log);
                Upsert::Appended
            }
        }
    }

    fn is_current(&self, contact_id: &str, generation: u64) -> bool {
        self.generation == generation && self.contact_id.as_deref() == Some(contact_id)
    }
}

struct Shared<B> {
    backend: Arc<B>,
    router: LiveRouter,
    state: Mutex<ChatLogState>,
    revision: watch::Sender<u64>,
}

impl<B: Backend> Shared<B> {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn on_push(&self, update: &ChatLogUpdate) {
        let applied = {
            let mut st = self.state.lock();
            if st.loading || st.contact_id.as_deref() != Some(update.contact_id.as_str()) {
                None
            } else {
                Some(st.upsert(ChatLog::from(update.clone())))
            }
        };
        match applied {
            Some(outcome) => {
                log::trace!("chat log {} {:?}", update.id, outcome);
                self.bump();
            }
            None => log::debug!("dropping chat log {} for contact {}", update.id, update.contact_id),
        }
    }

    fn on_connect(&self) {
        let target = {
            let st = self.state.lock();
            match &st.contact_id {
                Some(id) if !st.loading && st.error.is_none() => Some(id.clone()),
                _ => None,
            }
        };
        let Some(contact_id) = target else {
            return;
        };
        let sent = self.router.subscribe_to_contact(&contact_id);
        let changed = {
            let mut st = self.state.lock();
            let current = st.contact_id.as_deref() == Some(contact_id.as_str());
            let changed = current && st.subscription_pending == sent;
            if current {
                st.subscription_pending = !sent;
            }
            changed
        };
        if changed {
            self.bump();
        }
    }
}

/// Chat log of one contact at a time, kept current by `chatlog_update` pushes.
pub struct ChatLogFeed<B: Backend> {
    shared: Arc<Shared<B>>,
    push_listener: ListenerId,
    connect_listener: ListenerId,
}

impl<B: Backend> ChatLogFeed<B> {
    pub fn new(backend: Arc<B>, router: LiveRouter) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            backend,
            router: router.clone(),
            state: Mutex::new(ChatLogState::default()),
            revision,
        });

        let weak = Arc::downgrade(&shared);
        let push_listener = router.add_listener(Topic::ChatLogUpdate, move |event| {
            let ServerEvent::ChatLogUpdate(update) = event else {
                return;
            };
            if let Some(shared) = weak.upgrade() {
                shared.on_push(update);
            }
        });
        let weak = Arc::downgrade(&shared);
        let connect_listener = router.add_connect_listener(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_connect();
            }
        });

        Self { shared, push_listener, connect_listener }
    }

    /// Switch to `contact_id`.
    ///
    /// Releases the previous scope, clears the displayed log, fetches the new
    /// snapshot and only then subscribes. A snapshot that resolves after the
    /// feed moved on to another contact is discarded.
    pub async fn watch(&self, contact_id: &str) -> Result<()> {
        let shared = &self.shared;
        let previous = shared.state.lock().contact_id.clone();
        if let Some(prev) = previous.as_deref().filter(|p| *p != contact_id) {
            shared.router.release_scope(prev);
        }

        let generation = {
            let mut st = shared.state.lock();
            st.generation += 1;
            st.contact_id = Some(contact_id.to_string());
            st.logs.clear();
            st.loading = true;
            st.error = None;
            st.subscription_pending = false;
            st.generation
        };
        shared.bump();

        let result = shared.backend.chat_logs(contact_id).await;

        let outcome = {
            let mut st = shared.state.lock();
            if !st.is_current(contact_id, generation) {
                log::debug!("discarding chat logs for {contact_id}; feed moved on");
                return Ok(());
            }
            st.loading = false;
            match result {
                Ok(logs) => {
                    st.logs = logs;
                    Ok(())
                }
                Err(e) => {
                    st.error = Some(e.to_string());
                    Err(e)
                }
            }
        };

        if outcome.is_ok() {
            let sent = shared.router.subscribe_to_contact(contact_id);
            if !sent {
                log::debug!("push socket offline, subscription to {contact_id} pending");
            }
            let mut st = shared.state.lock();
            if st.is_current(contact_id, generation) {
                st.subscription_pending = !sent;
            }
        }
        shared.bump();
        outcome
    }

    /// Fetch the current contact again, e.g. after an error.
    pub async fn reload(&self) -> Result<()> {
        let current = self.shared.state.lock().contact_id.clone();
        match current {
            Some(id) => self.watch(&id).await,
            None => Ok(()),
        }
    }

    /// Stop watching: release the scope and clear the log.
    pub fn unwatch(&self) {
        let previous = {
            let mut st = self.shared.state.lock();
            let previous = st.contact_id.take();
            st.generation += 1;
            st.logs.clear();
            st.loading = false;
            st.error = None;
            st.subscription_pending = false;
            previous
        };
        if let Some(prev) = previous {
            self.shared.router.release_scope(&prev);
        }
        self.shared.bump();
    }

    pub fn contact_id(&self) -> Option<String> {
        self.shared.state.lock().contact_id.clone()
    }

    pub fn snapshot(&self) -> ChatLogState {
        self.shared.state.lock().clone()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

impl<B: Backend> Drop for ChatLogFeed<B> {
    fn drop(&mut self) {
        let router = &self.shared.router;
        router.remove_listener(Topic::ChatLogUpdate, self.push_listener);
        router.remove_connect_listener(self.connect_listener);
        let current = self.shared.state.lock().contact_id.take();
        if let Some(id) = current {
            router.release_scope(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn log(id: &str, message: &str) -> ChatLog {
        ChatLog {
            id: id.into(),
            id_contact: "1".into(),
            message: message.into(),
            kind: "text".into(),
            media: None,
            from_me: false,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut st = ChatLogState::default();
        st.upsert(log("a", "one"));
        st.upsert(log("b", "two"));
        st.upsert(log("c", "three"));

        assert_eq!(st.upsert(log("b", "two, edited")), Upsert::Replaced(1));
        assert_eq!(st.logs.len(), 3);
        assert_eq!(st.logs[1].message, "two, edited");
    }

    #[test]
    fn upsert_appends_new_ids_once() {
        let mut st = ChatLogState::default();
        assert_eq!(st.upsert(log("a", "one")), Upsert::Appended);
        assert_eq!(st.upsert(log("a", "one")), Upsert::Replaced(0));
        assert_eq!(st.logs.len(), 1);
    }
}
