pub mod client;
pub mod events;
pub mod models;

pub use client::{ApiClient, Backend};
pub use events::{ChatLogUpdate, ClientCommand, ContactUpdate, ServerEvent, Topic};
pub use models::{ChatLog, Contact, ContactPage, LeadCounts, LeadStatus};
