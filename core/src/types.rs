//! Shared primitive types used across the desk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two collections served by the billing backend.
/// Also doubles as the tab selector: one tab per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    #[default]
    Anomalies,
    Autofixes,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Anomalies, CollectionKind::Autofixes];

    /// Path segment under `/api/`.
    pub fn path(self) -> &'static str {
        match self {
            CollectionKind::Anomalies => "anomalies",
            CollectionKind::Autofixes => "autofixes",
        }
    }

    /// Singular prefix used when rendering an [`ItemKey`].
    pub fn key_prefix(self) -> &'static str {
        match self {
            CollectionKind::Anomalies => "anomaly",
            CollectionKind::Autofixes => "autofix",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A stable identifier for one record.
///
/// Either the backend-assigned `id`, or a UUID synthesized at ingestion
/// and persisted in the identity store. Never an array position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

/// Composite key of the in-flight set: `(collection, item identity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub kind: CollectionKind,
    pub id:   ItemId,
}

impl ItemKey {
    pub fn new(kind: CollectionKind, id: impl Into<ItemId>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.key_prefix(), self.id)
    }
}

/// How the backend addresses a record in `DELETE /api/{kind}/{identity}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BackendIdentity {
    /// Backend-assigned id, stable across fetches.
    Id(String),
    /// Index into the last fetched, unfiltered collection.
    Position(usize),
}

impl BackendIdentity {
    pub fn is_positional(&self) -> bool {
        matches!(self, BackendIdentity::Position(_))
    }
}

impl fmt::Display for BackendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendIdentity::Id(id)         => f.write_str(id),
            BackendIdentity::Position(index) => write!(f, "{index}"),
        }
    }
}
