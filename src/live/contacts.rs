use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::client::Backend;
use crate::api::events::{ContactUpdate, ServerEvent, Topic};
use crate::api::models::{Contact, ContactPage, LeadCounts, LeadStatus};
use crate::error::Result;
use crate::live::router::{ListenerId, LiveRouter};

/// What applying a push did to the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Present fields were merged into the existing contact.
    Merged,
    /// The push is older than what the list already holds.
    Stale,
    /// No snapshot has been loaded yet; the first fetch supersedes the push.
    Ignored,
    /// The contact is not in the list; the list must be refetched.
    Invalidated,
}

#[derive(Debug, Clone, Default)]
pub struct ContactState {
    pub items: Vec<Contact>,
    pub total_count: u64,
    pub page: u32,
    pub per_page: u32,
    pub loading: bool,
    pub error: Option<String>,
    loaded: bool,
    generation: u64,
}

impl ContactState {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page, ..Self::default() }
    }

    pub fn counts(&self) -> LeadCounts {
        LeadCounts::tally(&self.items)
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn replace(&mut self, page: ContactPage) {
        self.items = page.items;
        self.total_count = page.total_count;
        self.loaded = true;
    }

    /// Merge a push into the list.
    ///
    /// Only fields present in the push are written. A push carrying a
    /// `last_message_at` older than the stored one is dropped.
    pub fn apply_update(&mut self, update: &ContactUpdate) -> Reconcile {
        if !self.loaded {
            return Reconcile::Ignored;
        }
        let Some(contact) = self.items.iter_mut().find(|c| c.id == update.contact_id) else {
            return Reconcile::Invalidated;
        };
        if let (Some(incoming), Some(current)) = (update.last_message_at, contact.last_message_at) {
            if incoming < current {
                return Reconcile::Stale;
            }
        }
        if let Some(message) = &update.last_message {
            contact.last_message = Some(message.clone());
        }
        if let Some(at) = update.last_message_at {
            contact.last_message_at = Some(at);
        }
        if let Some(status) = update.lead_status {
            contact.lead_status = status;
        }
        if let Some(agent) = &update.agent_name {
            contact.agent_name = Some(agent.clone());
        }
        Reconcile::Merged
    }

    fn with_contact(&mut self, id: &str, f: impl FnOnce(&mut Contact)) -> bool {
        match self.items.iter_mut().find(|c| c.id == id) {
            Some(contact) => {
                f(contact);
                true
            }
            None => false,
        }
    }
}

struct Shared<B> {
    backend: Arc<B>,
    state: Mutex<ContactState>,
    revision: watch::Sender<u64>,
}

impl<B: Backend> Shared<B> {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn on_update(self: &Arc<Self>, update: &ContactUpdate) {
        let outcome = self.state.lock().apply_update(update);
        match outcome {
            Reconcile::Merged => self.bump(),
            Reconcile::Stale => log::debug!("dropping stale update for contact {}", update.contact_id),
            Reconcile::Ignored => log::debug!("no contact snapshot yet, ignoring update"),
            Reconcile::Invalidated => {
                log::debug!("contact {} not in list, refetching", update.contact_id);
                self.spawn_refresh();
            }
        }
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("no async runtime available, contact list not refetched");
            return;
        };
        let shared = Arc::clone(self);
        handle.spawn(async move {
            if let Err(e) = shared.refresh().await {
                log::warn!("contact refetch failed: {e}");
            }
        });
    }

    /// Only the most recently started refresh may write the list.
    async fn refresh(&self) -> Result<()> {
        let (page, per_page, generation) = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.loading = true;
            st.error = None;
            (st.page, st.per_page, st.generation)
        };
        self.bump();

        let result = self.backend.contacts(page, per_page).await;

        let outcome = {
            let mut st = self.state.lock();
            if st.generation != generation {
                log::debug!("discarding contacts for page {page}; a newer refresh superseded it");
                return Ok(());
            }
            st.loading = false;
            match result {
                Ok(fetched) => {
                    st.replace(fetched);
                    Ok(())
                }
                Err(e) => {
                    st.error = Some(e.to_string());
                    Err(e)
                }
            }
        };
        self.bump();
        outcome
    }
}

/// Locally held page of contacts kept current by `contact_update` pushes.
pub struct ContactList<B: Backend> {
    shared: Arc<Shared<B>>,
    router: LiveRouter,
    listener: ListenerId,
}

impl<B: Backend> ContactList<B> {
    pub fn new(backend: Arc<B>, router: LiveRouter, page: u32, per_page: u32) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            backend,
            state: Mutex::new(ContactState::new(page, per_page)),
            revision,
        });
        let weak = Arc::downgrade(&shared);
        let listener = router.add_listener(Topic::ContactUpdate, move |event| {
            let ServerEvent::ContactUpdate(update) = event else {
                return;
            };
            if let Some(shared) = weak.upgrade() {
                shared.on_update(update);
            }
        });
        Self { shared, router, listener }
    }

    /// Replace the list with a fresh REST snapshot. A failure is kept in `error` and returned.
    pub async fn refresh(&self) -> Result<()> {
        self.shared.refresh().await
    }

    pub async fn set_page(&self, page: u32, per_page: u32) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            st.page = page;
            st.per_page = per_page;
        }
        self.shared.refresh().await
    }

    pub fn snapshot(&self) -> ContactState {
        self.shared.state.lock().clone()
    }

    pub fn counts(&self) -> LeadCounts {
        self.shared.state.lock().counts()
    }

    /// Zero the unread counter after the conversation was read.
    pub fn mark_read(&self, contact_id: &str) -> bool {
        let found = self
            .shared
            .state
            .lock()
            .with_contact(contact_id, |c| c.unread_messages = 0);
        if found {
            self.shared.bump();
        }
        found
    }

    /// Mark the conversation resolved, which also clears its unread counter.
    pub fn resolve(&self, contact_id: &str) -> bool {
        let found = self.shared.state.lock().with_contact(contact_id, |c| {
            c.lead_status = LeadStatus::Resolved;
            c.unread_messages = 0;
        });
        if found {
            self.shared.bump();
        }
        found
    }

    /// Revision counter bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

impl<B: Backend> Drop for ContactList<B> {
    fn drop(&mut self) {
        self.router.remove_listener(Topic::ContactUpdate, self.listener);
    }
}
