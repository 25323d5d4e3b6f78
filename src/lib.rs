//! Client-side reconciliation for the engagement dashboard API.
//!
//! A [`LiveRouter`] owns the single push socket. [`ContactList`] and
//! [`ChatLogFeed`] hold REST snapshots and merge `contact_update` /
//! `chatlog_update` pushes into them.

pub mod api;
pub mod app;
pub mod error;
pub mod live;
pub mod storage;
pub mod utils;

pub use api::{ApiClient, Backend};
pub use app::Settings;
pub use error::{Error, Result};
pub use live::{ChatLogFeed, ContactList, LiveRouter, ReconnectPolicy};
pub use storage::SnapshotCache;
