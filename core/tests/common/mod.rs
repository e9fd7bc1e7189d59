//! In-process billing backend for integration tests.
//!
//! Behaves like the real service: positional deletes remove by index into
//! the current array, id deletes remove the record carrying that id, and
//! a missing target is a 404. Individual calls can be held open on a gate
//! or failed with a status code.

#![allow(dead_code)]

use anomaly_desk_core::{
    api::BillingApi,
    error::{DeskError, DeskResult},
    session::DeskSession,
    store::IdentityStore,
    types::{BackendIdentity, CollectionKind},
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Default)]
struct FakeState {
    anomalies:          Vec<Value>,
    autofixes:          Vec<Value>,
    fetch_failures:     HashMap<CollectionKind, u16>,
    delete_failure:     Option<u16>,
    fail_fetch_after_delete: Option<u16>,
    held_fetches:       usize,
    held_deletes:       usize,
    fetch_calls:        usize,
    delete_requests:    Vec<(CollectionKind, BackendIdentity)>,
    deletes_completed:  usize,
}

#[derive(Clone)]
pub struct FakeBillingApi {
    state:       Arc<Mutex<FakeState>>,
    fetch_gate:  Arc<Semaphore>,
    delete_gate: Arc<Semaphore>,
}

impl FakeBillingApi {
    pub fn new(anomalies: Vec<Value>, autofixes: Vec<Value>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                anomalies,
                autofixes,
                ..FakeState::default()
            })),
            fetch_gate:  Arc::new(Semaphore::new(0)),
            delete_gate: Arc::new(Semaphore::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Backend data ──────────────────────────────────────────

    pub fn records(&self, kind: CollectionKind) -> Vec<Value> {
        let state = self.lock();
        match kind {
            CollectionKind::Anomalies => state.anomalies.clone(),
            CollectionKind::Autofixes => state.autofixes.clone(),
        }
    }

    pub fn accounts(&self, kind: CollectionKind) -> Vec<String> {
        self.records(kind)
            .iter()
            .map(|v| v["account_number"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn remove_backend_record(&self, kind: CollectionKind, index: usize) {
        let mut state = self.lock();
        match kind {
            CollectionKind::Anomalies => state.anomalies.remove(index),
            CollectionKind::Autofixes => state.autofixes.remove(index),
        };
    }

    // ── Failure injection ─────────────────────────────────────

    pub fn fail_fetch(&self, kind: CollectionKind, status: u16) {
        self.lock().fetch_failures.insert(kind, status);
    }

    pub fn clear_fetch_failures(&self) {
        self.lock().fetch_failures.clear();
    }

    pub fn fail_deletes(&self, status: u16) {
        self.lock().delete_failure = Some(status);
    }

    pub fn clear_delete_failure(&self) {
        self.lock().delete_failure = None;
    }

    /// After the next successful delete, every anomalies read fails.
    pub fn fail_fetch_after_next_delete(&self, status: u16) {
        self.lock().fail_fetch_after_delete = Some(status);
    }

    // ── Gates ─────────────────────────────────────────────────

    /// Hold the next `n` fetch calls until released.
    pub fn hold_fetches(&self, n: usize) {
        self.lock().held_fetches = n;
    }

    pub fn release_fetches(&self, n: usize) {
        self.fetch_gate.add_permits(n);
    }

    /// Hold the next `n` delete calls until released.
    pub fn hold_deletes(&self, n: usize) {
        self.lock().held_deletes = n;
    }

    pub fn release_deletes(&self, n: usize) {
        self.delete_gate.add_permits(n);
    }

    // ── Call accounting ───────────────────────────────────────

    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    pub fn delete_requests(&self) -> Vec<(CollectionKind, BackendIdentity)> {
        self.lock().delete_requests.clone()
    }

    pub fn deletes_completed(&self) -> usize {
        self.lock().deletes_completed
    }

    pub async fn wait_for_fetch_calls(&self, n: usize) {
        wait_until(|| self.fetch_calls() >= n).await;
    }

    pub async fn wait_for_delete_requests(&self, n: usize) {
        wait_until(|| self.delete_requests().len() >= n).await;
    }
}

#[async_trait]
impl BillingApi for FakeBillingApi {
    async fn fetch(&self, kind: CollectionKind) -> DeskResult<Vec<Value>> {
        let (result, hold) = {
            let mut state = self.lock();
            state.fetch_calls += 1;
            let hold = state.held_fetches > 0;
            if hold {
                state.held_fetches -= 1;
            }
            let result = match state.fetch_failures.get(&kind) {
                Some(&status) => Err(DeskError::Status {
                    url: format!("/api/{}", kind.path()),
                    status,
                }),
                None => Ok(match kind {
                    CollectionKind::Anomalies => state.anomalies.clone(),
                    CollectionKind::Autofixes => state.autofixes.clone(),
                }),
            };
            (result, hold)
        };
        if hold {
            self.fetch_gate.acquire().await.expect("fetch gate open").forget();
        }
        result
    }

    async fn delete(&self, kind: CollectionKind, identity: &BackendIdentity) -> DeskResult<()> {
        let hold = {
            let mut state = self.lock();
            state.delete_requests.push((kind, identity.clone()));
            let hold = state.held_deletes > 0;
            if hold {
                state.held_deletes -= 1;
            }
            hold
        };
        if hold {
            self.delete_gate.acquire().await.expect("delete gate open").forget();
        }

        let mut state = self.lock();
        let url = format!("/api/{}/{}", kind.path(), identity);
        if let Some(status) = state.delete_failure {
            return Err(DeskError::Status { url, status });
        }
        let items = match kind {
            CollectionKind::Anomalies => &mut state.anomalies,
            CollectionKind::Autofixes => &mut state.autofixes,
        };
        let index = match identity {
            BackendIdentity::Position(i) => (*i < items.len()).then_some(*i),
            BackendIdentity::Id(id) => items.iter().position(|v| id_matches(&v["id"], id)),
        };
        let Some(index) = index else {
            return Err(DeskError::Status { url, status: 404 });
        };
        items.remove(index);
        state.deletes_completed += 1;
        if let Some(status) = state.fail_fetch_after_delete.take() {
            state.fetch_failures.insert(CollectionKind::Anomalies, status);
        }
        Ok(())
    }
}

fn id_matches(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

/// Poll `cond`, yielding to other tasks, for at most two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Await `fut` with a two second ceiling.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("future did not complete in time")
}

pub fn identities() -> IdentityStore {
    let store = IdentityStore::in_memory().expect("in-memory identity store");
    store.migrate().expect("identity migration");
    store
}

pub fn session(api: &FakeBillingApi) -> DeskSession {
    let _ = env_logger::builder().is_test(true).try_init();
    DeskSession::new(Arc::new(api.clone()), identities())
}

pub fn anomaly(account: &str, issue: &str) -> Value {
    serde_json::json!({
        "account_number": account,
        "issue": issue,
        "explanation": format!("{issue} on bill for {account}"),
        "fix": 10.0,
    })
}

pub fn autofix(id: u64, account: &str, change_type: &str) -> Value {
    serde_json::json!({
        "id": id,
        "account_number": account,
        "change_type": change_type,
        "field": "address",
        "original_value": "Mian Street",
        "fixed_value": "Main Street",
        "timestamp": "2024-05-01T12:34:56.123456",
    })
}

/// An autofix the backend serves without an `id`, addressed by position.
pub fn autofix_without_id(account: &str, change_type: &str) -> Value {
    let mut value = autofix(0, account, change_type);
    if let Some(fields) = value.as_object_mut() {
        fields.remove("id");
    }
    value
}
