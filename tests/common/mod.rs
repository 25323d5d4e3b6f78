#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use engage_live::api::models::{ChatLog, Contact, ContactPage, LeadStatus};
use engage_live::{Backend, Error, LiveRouter, ReconnectPolicy, Result};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::timeout;

/// In-memory stand-in for the REST API.
#[derive(Default)]
pub struct MockBackend {
    pub contacts: Mutex<Vec<Contact>>,
    pub logs: Mutex<HashMap<String, Vec<ChatLog>>>,
    pub fail_contacts: AtomicBool,
    pub contact_fetches: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    contacts_gate: Mutex<Option<Arc<Notify>>>,
    fetched: Mutex<Option<mpsc::UnboundedSender<u32>>>,
}

impl MockBackend {
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let backend = Self::default();
        *backend.contacts.lock() = contacts;
        backend
    }

    pub fn set_logs(&self, contact_id: &str, logs: Vec<ChatLog>) {
        self.logs.lock().insert(contact_id.to_string(), logs);
    }

    /// Hold chat log fetches for `contact_id` until the returned gate is notified.
    pub fn gate(&self, contact_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(contact_id.to_string(), Arc::clone(&gate));
        gate
    }

    /// Hold the next contact fetch until the returned gate is notified.
    /// The held fetch answers with the contacts as they were when it started.
    pub fn gate_next_contacts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.contacts_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Report every contact fetch (its page number) on the returned channel.
    pub fn track_fetches(&self) -> mpsc::UnboundedReceiver<u32> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.fetched.lock() = Some(tx);
        rx
    }
}

impl Backend for MockBackend {
    async fn contacts(&self, page: u32, _per_page: u32) -> Result<ContactPage> {
        self.contact_fetches.fetch_add(1, Ordering::SeqCst);
        let tracker = self.fetched.lock().clone();
        if let Some(tx) = tracker {
            let _ = tx.send(page);
        }
        if self.fail_contacts.load(Ordering::SeqCst) {
            return Err(Error::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        }
        let items = self.contacts.lock().clone();
        let gate = self.contacts_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(ContactPage { total_count: items.len() as u64, items })
    }

    async fn chat_logs(&self, contact_id: &str) -> Result<Vec<ChatLog>> {
        let gate = self.gates.lock().get(contact_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.logs.lock().get(contact_id).cloned().unwrap_or_default())
    }
}

pub fn contact(id: &str, status: LeadStatus) -> Contact {
    Contact {
        id: id.into(),
        push_name: Some(format!("Contact {id}")),
        contact_identifier: format!("551190000{id}"),
        lead_status: status,
        last_message: None,
        last_message_at: None,
        unread_messages: 0,
        agent_name: None,
    }
}

pub fn chat_log(id: &str, contact_id: &str, message: &str) -> ChatLog {
    ChatLog {
        id: id.into(),
        id_contact: contact_id.into(),
        message: message.into(),
        kind: "text".into(),
        media: None,
        from_me: false,
        sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

pub fn chatlog_push(id: &str, contact_id: &str, message: &str) -> String {
    serde_json::json!({
        "type": "chatlog_update",
        "data": {
            "id": id,
            "contact_id": contact_id,
            "message": message,
            "type": "text",
            "from_me": false,
            "sent_at": "2024-05-01T10:05:00Z"
        }
    })
    .to_string()
}

/// A router that is never connected.
pub fn offline_router() -> LiveRouter {
    LiveRouter::new("ws://127.0.0.1:9/ws", ReconnectPolicy::default())
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial: Duration::from_millis(50),
        max: Duration::from_millis(200),
    }
}

/// Wait on a revision channel until `cond` holds.
pub async fn wait_for(mut changes: watch::Receiver<u64>, cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            changes.changed().await.expect("state owner dropped");
        }
    })
    .await
    .expect("condition not reached in time");
}
