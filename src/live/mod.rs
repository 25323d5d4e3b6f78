//! Live-update reconciliation: the shared push socket and the local views it keeps current.

pub mod chat_logs;
pub mod contacts;
pub mod router;

pub use chat_logs::{ChatLogFeed, ChatLogState, Upsert};
pub use contacts::{ContactList, ContactState, Reconcile};
pub use router::{ListenerId, LiveRouter, ReconnectPolicy};
