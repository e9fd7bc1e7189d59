//! One view session: the controller object the rendering layer drives.
//!
//! Lifecycle:
//!   new() → initialize() → { set_filter | set_tab | dismiss | reload | view }* → teardown()
//!
//! A dismiss is: admit the key in the MutationTracker (refuse if already
//! in flight, without any network call) → delete via the sync controller
//! (which refetches on success) → release the key on every exit path.

use crate::{
    api::{BillingApi, HttpBillingApi},
    config::DeskConfig,
    error::{DeskError, DeskResult},
    mutation::MutationTracker,
    store::IdentityStore,
    sync::{DataSyncController, LoadPhase},
    types::{CollectionKind, ItemId, ItemKey},
    view::{DeskView, FilterViewModel},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissOutcome {
    /// Deleted and resynchronised.
    Deleted,
    /// A delete for this key was already outstanding; nothing was sent.
    AlreadyInFlight,
}

/// Result of a background dismiss, reported when its task finishes.
#[derive(Debug, Clone, Serialize)]
pub struct DismissReport {
    pub key:     ItemKey,
    pub outcome: Option<DismissOutcome>,
    pub error:   Option<String>,
}

pub struct DeskSession {
    sync:       DataSyncController,
    tracker:    MutationTracker,
    filter:     String,
    active_tab: CollectionKind,
    tasks:      JoinSet<DismissReport>,
}

impl DeskSession {
    pub fn new(api: Arc<dyn BillingApi>, identities: IdentityStore) -> Self {
        Self {
            sync:       DataSyncController::new(api, identities),
            tracker:    MutationTracker::new(),
            filter:     String::new(),
            active_tab: CollectionKind::default(),
            tasks:      JoinSet::new(),
        }
    }

    /// Wire an HTTP-backed session from config.
    pub fn from_config(config: &DeskConfig) -> DeskResult<Self> {
        let api = HttpBillingApi::new(config)?;
        let identities = IdentityStore::open(&config.identity_db)?;
        identities.migrate()?;
        Ok(Self::new(Arc::new(api), identities))
    }

    pub fn sync(&self) -> &DataSyncController {
        &self.sync
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    /// Initial load. `Loading → Ready` or `Loading → Failed`.
    pub async fn initialize(&self) -> DeskResult<()> {
        self.sync.load_all().await
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_tab(&mut self, tab: CollectionKind) {
        self.active_tab = tab;
    }

    pub fn active_tab(&self) -> CollectionKind {
        self.active_tab
    }

    pub fn is_in_flight(&self, kind: CollectionKind, id: &ItemId) -> bool {
        self.tracker.is_in_flight(&ItemKey::new(kind, id.clone()))
    }

    /// Dismiss one item and wait for the delete and refetch to finish.
    pub async fn dismiss(&self, kind: CollectionKind, id: ItemId) -> DeskResult<DismissOutcome> {
        run_dismiss(self.sync.clone(), self.tracker.clone(), ItemKey::new(kind, id)).await
    }

    /// Dismiss one item without waiting. The key is admitted before this
    /// returns, so the item's control can be disabled immediately.
    /// Completion is reported through [`DeskSession::next_completed`].
    pub fn spawn_dismiss(&mut self, kind: CollectionKind, id: ItemId) -> Option<DismissReport> {
        let key = ItemKey::new(kind, id);
        if !self.sync.is_mounted() {
            return Some(DismissReport {
                key,
                outcome: None,
                error: Some(DeskError::TornDown.to_string()),
            });
        }
        let Some(guard) = self.tracker.begin(key.clone()) else {
            return Some(DismissReport {
                key,
                outcome: Some(DismissOutcome::AlreadyInFlight),
                error: None,
            });
        };
        let sync = self.sync.clone();
        self.tasks.spawn(async move {
            let result = sync.delete_item(key.kind, &key.id).await;
            drop(guard);
            report(key, result.map(|()| DismissOutcome::Deleted))
        });
        None
    }

    pub fn has_pending(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Wait for the next background dismiss to finish.
    /// Returns `None` when none are outstanding.
    pub async fn next_completed(&mut self) -> Option<DismissReport> {
        loop {
            match self.tasks.join_next().await? {
                Ok(report) => return Some(report),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    log::error!("session: dismiss task failed: {e}");
                    continue;
                }
            }
        }
    }

    /// Build the presentation snapshot for the current filter and tab.
    pub fn view(&self) -> DeskView {
        let snapshot = self.sync.snapshot();
        let model = FilterViewModel::new(&snapshot.anomalies, &snapshot.autofixes, &self.filter);
        DeskView::build(
            snapshot.phase,
            snapshot.last_error.clone(),
            &model,
            self.active_tab,
            self.tracker.in_flight_keys(),
        )
    }

    /// Operator-initiated reload: tear down this view session and start a
    /// fresh one over the same backend, keeping the filter, the tab and the
    /// synthesized ids already handed out.
    pub async fn reload(&mut self) -> DeskResult<()> {
        self.teardown();
        self.sync = self.sync.remount();
        self.tracker = MutationTracker::new();
        self.tasks = JoinSet::new();
        self.initialize().await
    }

    pub fn phase(&self) -> LoadPhase {
        self.sync.phase()
    }

    /// Unmount: no response arriving from now on is applied, and every
    /// outstanding background dismiss is aborted.
    pub fn teardown(&mut self) {
        self.sync.teardown();
        self.tasks.abort_all();
    }
}

impl Drop for DeskSession {
    fn drop(&mut self) {
        self.sync.teardown();
    }
}

async fn run_dismiss(
    sync: DataSyncController,
    tracker: MutationTracker,
    key: ItemKey,
) -> DeskResult<DismissOutcome> {
    if !sync.is_mounted() {
        return Err(DeskError::TornDown);
    }
    let Some(_guard) = tracker.begin(key.clone()) else {
        return Ok(DismissOutcome::AlreadyInFlight);
    };
    sync.delete_item(key.kind, &key.id).await?;
    Ok(DismissOutcome::Deleted)
}

fn report(key: ItemKey, result: DeskResult<DismissOutcome>) -> DismissReport {
    match result {
        Ok(outcome) => DismissReport {
            key,
            outcome: Some(outcome),
            error: None,
        },
        Err(e) => DismissReport {
            key,
            outcome: None,
            error: Some(e.to_string()),
        },
    }
}
