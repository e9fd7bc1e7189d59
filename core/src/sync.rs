//! Data synchronisation: the two collections and their load status.
//!
//! RULES:
//!   - Collections are replaced wholesale by a successful load, never
//!     spliced. A delete is followed by a full refetch.
//!   - A failed load or delete leaves the collections exactly as they were.
//!   - Every read is stamped with a generation. A completed read is applied
//!     unless a read issued after it has already been applied, so an
//!     overlapping refetch that started before a delete can never roll the
//!     view back to pre-delete state.
//!   - After teardown, completed responses are discarded.
//!   - Deletes in a collection holding any positional record are
//!     serialised: resolve the index, DELETE, refetch, all under that
//!     collection's lock. An id delete shifts positions too, so it takes the
//!     lock as well. Deletes in a collection addressed only by id run
//!     concurrently.
//!   - A record deleted by position retires its synthesized identity, so an
//!     identical survivor keeps its own id.

use crate::{
    api::BillingApi,
    error::{DeskError, DeskResult},
    record::{ingest_anomalies, ingest_autofixes, Anomaly, Autofix},
    store::IdentityStore,
    types::{BackendIdentity, CollectionKind, ItemId},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Loading,
    Ready,
    Failed,
}

/// A consistent read of the controller's state.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub phase:      LoadPhase,
    pub last_error: Option<String>,
    pub anomalies:  Arc<Vec<Anomaly>>,
    pub autofixes:  Arc<Vec<Autofix>>,
}

struct SyncState {
    phase:      LoadPhase,
    last_error: Option<String>,
    anomalies:  Arc<Vec<Anomaly>>,
    autofixes:  Arc<Vec<Autofix>>,
    /// Generation handed to the most recently issued read.
    issued:     u64,
    /// Generation of the read whose response is currently displayed.
    applied:    u64,
    /// A delete succeeded but its refetch did not: positions in the
    /// displayed snapshot may be shifted.
    resync_required: bool,
    mounted:    bool,
}

impl SyncState {
    fn new() -> Self {
        Self {
            phase:      LoadPhase::Loading,
            last_error: None,
            anomalies:  Arc::new(Vec::new()),
            autofixes:  Arc::new(Vec::new()),
            issued:     0,
            applied:    0,
            resync_required: false,
            mounted:    true,
        }
    }

    fn record_error(&mut self, message: String) {
        if self.phase == LoadPhase::Loading {
            self.phase = LoadPhase::Failed;
        }
        self.last_error = Some(message);
    }
}

#[derive(Default)]
struct PositionalLocks {
    anomalies: tokio::sync::Mutex<()>,
    autofixes: tokio::sync::Mutex<()>,
}

impl PositionalLocks {
    fn for_kind(&self, kind: CollectionKind) -> &tokio::sync::Mutex<()> {
        match kind {
            CollectionKind::Anomalies => &self.anomalies,
            CollectionKind::Autofixes => &self.autofixes,
        }
    }
}

/// Owns the in-memory collections for one view session.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataSyncController {
    api:        Arc<dyn BillingApi>,
    identities: Arc<Mutex<IdentityStore>>,
    state:      Arc<Mutex<SyncState>>,
    positional: Arc<PositionalLocks>,
}

impl DataSyncController {
    pub fn new(api: Arc<dyn BillingApi>, identities: IdentityStore) -> Self {
        Self {
            api,
            identities: Arc::new(Mutex::new(identities)),
            state: Arc::new(Mutex::new(SyncState::new())),
            positional: Arc::new(PositionalLocks::default()),
        }
    }

    /// A fresh controller over the same backend and identity store, as for
    /// a new view session. Synthesized ids carry over.
    pub fn remount(&self) -> Self {
        Self {
            api: self.api.clone(),
            identities: self.identities.clone(),
            state: Arc::new(Mutex::new(SyncState::new())),
            positional: Arc::new(PositionalLocks::default()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let state = self.lock_state();
        SyncSnapshot {
            phase:      state.phase,
            last_error: state.last_error.clone(),
            anomalies:  state.anomalies.clone(),
            autofixes:  state.autofixes.clone(),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.lock_state().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.lock_state().mounted
    }

    /// Stop applying responses. Outstanding reads complete into the void.
    pub fn teardown(&self) {
        let mut state = self.lock_state();
        if state.mounted {
            log::debug!("sync: teardown at generation={}", state.issued);
        }
        state.mounted = false;
    }

    // ── Load ──────────────────────────────────────────────────

    /// Read both collections concurrently and apply them together.
    /// Fails with the first error encountered; collections are untouched.
    pub async fn load_all(&self) -> DeskResult<()> {
        let generation = {
            let mut state = self.lock_state();
            if !state.mounted {
                return Err(DeskError::TornDown);
            }
            state.issued += 1;
            state.issued
        };
        log::debug!("sync: load generation={generation} issued");

        let anomalies = async {
            self.api
                .fetch(CollectionKind::Anomalies)
                .await
                .map_err(|e| DeskError::fetch(CollectionKind::Anomalies, e))
        };
        let autofixes = async {
            self.api
                .fetch(CollectionKind::Autofixes)
                .await
                .map_err(|e| DeskError::fetch(CollectionKind::Autofixes, e))
        };
        let fetched = futures::try_join!(anomalies, autofixes);

        let ingested = fetched
            .and_then(|(raw_anomalies, raw_autofixes)| self.ingest(raw_anomalies, raw_autofixes));

        let mut state = self.lock_state();
        if !state.mounted {
            log::debug!("sync: discarding load generation={generation} after teardown");
            return Err(DeskError::TornDown);
        }

        if generation < state.applied {
            log::debug!(
                "sync: discarding stale load generation={generation} (applied={})",
                state.applied
            );
            return ingested.map(|_| ());
        }

        match ingested {
            Ok((anomalies, autofixes)) => {
                self.prune_identities(&anomalies, &autofixes);
                log::info!(
                    "sync: applied generation={generation} anomalies={} autofixes={}",
                    anomalies.len(),
                    autofixes.len()
                );
                state.anomalies = Arc::new(anomalies);
                state.autofixes = Arc::new(autofixes);
                state.applied = generation;
                state.resync_required = false;
                state.phase = LoadPhase::Ready;
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                log::warn!("sync: load generation={generation} failed: {e}");
                state.record_error(e.to_string());
                Err(e)
            }
        }
    }

    fn ingest(
        &self,
        raw_anomalies: Vec<serde_json::Value>,
        raw_autofixes: Vec<serde_json::Value>,
    ) -> DeskResult<(Vec<Anomaly>, Vec<Autofix>)> {
        let identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        let anomalies = ingest_anomalies(raw_anomalies, &identities)
            .map_err(|e| DeskError::fetch(CollectionKind::Anomalies, e))?;
        let autofixes = ingest_autofixes(raw_autofixes, &identities)
            .map_err(|e| DeskError::fetch(CollectionKind::Autofixes, e))?;
        Ok((anomalies, autofixes))
    }

    /// Forget synthesized identities of records no longer served.
    /// Only called for the snapshot being applied.
    fn prune_identities(&self, anomalies: &[Anomaly], autofixes: &[Autofix]) {
        let live_anomalies: HashSet<ItemId> = anomalies.iter().map(|a| a.item_id.clone()).collect();
        let live_autofixes: HashSet<ItemId> = autofixes.iter().map(|f| f.item_id.clone()).collect();
        let mut identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        for (kind, live) in [
            (CollectionKind::Anomalies, &live_anomalies),
            (CollectionKind::Autofixes, &live_autofixes),
        ] {
            match identities.prune(kind, live) {
                Ok(0) => {}
                Ok(n) => log::debug!("sync: pruned {n} stale {kind} identities"),
                Err(e) => log::warn!("sync: {kind} identity prune failed: {e}"),
            }
        }
    }

    // ── Delete ────────────────────────────────────────────────

    /// Where the backend currently finds `item_id`, per the latest snapshot.
    pub fn resolve(&self, kind: CollectionKind, item_id: &ItemId) -> DeskResult<BackendIdentity> {
        let state = self.lock_state();
        let found = match kind {
            CollectionKind::Anomalies => state
                .anomalies
                .iter()
                .find(|a| &a.item_id == item_id)
                .map(|a| a.backend.clone()),
            CollectionKind::Autofixes => state
                .autofixes
                .iter()
                .find(|f| &f.item_id == item_id)
                .map(|f| f.backend.clone()),
        };
        found.ok_or_else(|| DeskError::UnknownItem {
            kind,
            id: item_id.to_string(),
        })
    }

    /// Whether any record of `kind` in the latest snapshot is addressed by
    /// position.
    pub fn has_positional(&self, kind: CollectionKind) -> bool {
        let state = self.lock_state();
        match kind {
            CollectionKind::Anomalies => state.anomalies.iter().any(|a| a.backend.is_positional()),
            CollectionKind::Autofixes => state.autofixes.iter().any(|f| f.backend.is_positional()),
        }
    }

    /// Delete one record, then resynchronise both collections.
    ///
    /// No local removal happens: on success the refetch establishes the new
    /// ground truth, on failure the collections are left as they were.
    pub async fn delete_item(&self, kind: CollectionKind, item_id: &ItemId) -> DeskResult<()> {
        if !self.is_mounted() {
            return Err(DeskError::TornDown);
        }

        let identity = self.resolve_for_delete(kind, item_id)?;
        if !identity.is_positional() && !self.has_positional(kind) {
            return self.delete_and_refetch(kind, item_id, identity).await;
        }

        let _serial = self.positional.for_kind(kind).lock().await;
        let resync_required = self.lock_state().resync_required;
        if resync_required {
            log::info!("sync: resynchronising before delete of {kind} item={item_id}");
            self.load_all().await?;
        }
        // Re-resolve under the lock: an earlier delete may have shifted it.
        let identity = self.resolve_for_delete(kind, item_id)?;
        self.delete_and_refetch(kind, item_id, identity).await
    }

    fn resolve_for_delete(&self, kind: CollectionKind, item_id: &ItemId) -> DeskResult<BackendIdentity> {
        self.resolve(kind, item_id).map_err(|e| {
            log::warn!("sync: cannot delete: {e}");
            self.record_failure(&e);
            e
        })
    }

    fn record_failure(&self, err: &DeskError) {
        let mut state = self.lock_state();
        if state.mounted {
            state.record_error(err.to_string());
        }
    }

    async fn delete_and_refetch(
        &self,
        kind: CollectionKind,
        item_id: &ItemId,
        identity: BackendIdentity,
    ) -> DeskResult<()> {
        log::info!("sync: deleting {kind} item={item_id} identity={identity}");
        if let Err(e) = self.api.delete(kind, &identity).await {
            let err = DeskError::delete(kind, &identity, e);
            log::warn!("sync: {err}");
            self.record_failure(&err);
            return Err(err);
        }
        if identity.is_positional() {
            let identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = identities.retire(kind, item_id) {
                log::warn!("sync: could not retire {kind} identity {item_id}: {e}");
            }
        }
        let refetched = self.load_all().await;
        if let Err(e) = &refetched {
            log::warn!("sync: {kind} item={item_id} deleted but refetch failed: {e}");
            self.lock_state().resync_required = true;
        }
        refetched
    }
}
