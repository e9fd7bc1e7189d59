//! Wire records and their canonical shapes.
//!
//! RULE: Legacy field names and loosely typed values are resolved here,
//! once, at ingestion. Nothing downstream branches on field presence.
//!
//! Wire variations accepted:
//!   - anomaly explanation under `explanation` or `reason`
//!   - anomaly remedy under `recommended_fix` or `fix`; a numeric `fix`
//!     (number or numeric string) is an expected charge amount
//!   - `id` as a JSON string or number, or absent

use crate::{
    error::DeskResult,
    store::IdentityStore,
    types::{BackendIdentity, CollectionKind, ItemId},
};
use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

static BILLING_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{2}-\d{2}-\d{4}").expect("billing date pattern to compile")
});

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern to compile"));

// ── Wire shapes ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RawAnomaly {
    pub account_number: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub recommended_fix: Option<Value>,
    #[serde(default)]
    pub fix: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAutofix {
    pub account_number: String,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub original_value: Option<Value>,
    #[serde(default)]
    pub fixed_value: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub bill_date: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
}

// ── Canonical shapes ──────────────────────────────────────────

/// The remedy attached to an anomaly, resolved from whichever field
/// the producer populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecommendedFix {
    Text(String),
    ExpectedCharge(f64),
    Missing,
}

impl RecommendedFix {
    fn resolve(recommended_fix: Option<&Value>, fix: Option<&Value>) -> Self {
        if let Some(text) = recommended_fix.and_then(value_as_text) {
            return RecommendedFix::Text(text);
        }
        match fix {
            Some(Value::Number(n)) => n
                .as_f64()
                .map(RecommendedFix::ExpectedCharge)
                .unwrap_or(RecommendedFix::Missing),
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(amount) if amount.is_finite() => RecommendedFix::ExpectedCharge(amount),
                    _ if !trimmed.is_empty() => RecommendedFix::Text(s.clone()),
                    _ => RecommendedFix::Missing,
                }
            }
            _ => RecommendedFix::Missing,
        }
    }

    pub fn display(&self) -> String {
        match self {
            RecommendedFix::Text(text)           => text.clone(),
            RecommendedFix::ExpectedCharge(amount) => format!("Expected charges: {amount:.2}"),
            RecommendedFix::Missing              => "No recommended fix available.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub item_id:         ItemId,
    pub backend:         BackendIdentity,
    pub account_number:  String,
    pub issue:           String,
    pub explanation:     Option<String>,
    pub recommended_fix: RecommendedFix,
    /// First `dd-dd-dddd` date mentioned in the explanation.
    pub billing_date:    Option<String>,
}

impl Anomaly {
    fn from_raw(raw: RawAnomaly, item_id: ItemId, backend: BackendIdentity) -> Self {
        let explanation = non_empty(raw.explanation).or_else(|| non_empty(raw.reason));
        let billing_date = explanation
            .as_deref()
            .and_then(|text| BILLING_DATE_PATTERN.find(text))
            .map(|m| m.as_str().to_string());
        let recommended_fix =
            RecommendedFix::resolve(raw.recommended_fix.as_ref(), raw.fix.as_ref());
        Self {
            item_id,
            backend,
            account_number: raw.account_number,
            issue: raw.issue,
            explanation,
            recommended_fix,
            billing_date,
        }
    }

    /// Lowercase issue label with whitespace runs collapsed to `-`.
    pub fn issue_badge(&self) -> String {
        WHITESPACE_RUN
            .replace_all(self.issue.trim(), "-")
            .to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Autofix {
    pub item_id:        ItemId,
    pub backend:        BackendIdentity,
    pub account_number: String,
    pub change_type:    String,
    pub field:          Option<String>,
    pub original_value: Option<Value>,
    pub fixed_value:    Option<Value>,
    pub timestamp:      Option<NaiveDateTime>,
    pub bill_date:      Option<String>,
}

impl Autofix {
    fn from_raw(raw: RawAutofix, item_id: ItemId, backend: BackendIdentity) -> Self {
        let timestamp = raw.timestamp.as_deref().and_then(|ts| {
            let parsed = parse_timestamp(ts);
            if parsed.is_none() {
                log::warn!(
                    "ingest: autofix {item_id} has unparseable timestamp '{ts}', dropping it"
                );
            }
            parsed
        });
        Self {
            item_id,
            backend,
            account_number: raw.account_number,
            change_type: raw.change_type.unwrap_or_default(),
            field: non_empty(raw.field),
            original_value: raw.original_value.filter(|v| !v.is_null()),
            fixed_value: raw.fixed_value.filter(|v| !v.is_null()),
            timestamp,
            bill_date: non_empty(raw.bill_date),
        }
    }

    /// `address_spelling_correction` → `address spelling correction`.
    pub fn change_label(&self) -> String {
        self.change_type.replace('_', " ")
    }
}

/// Render a nullable wire value for display: strings unquoted, null as `N/A`.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s))   => s.clone(),
        Some(other)              => other.to_string(),
    }
}

/// Implemented by every record the customer filter applies to.
pub trait AccountScoped {
    fn account_number(&self) -> &str;
}

impl AccountScoped for Anomaly {
    fn account_number(&self) -> &str {
        &self.account_number
    }
}

impl AccountScoped for Autofix {
    fn account_number(&self) -> &str {
        &self.account_number
    }
}

// ── Ingestion ─────────────────────────────────────────────────

/// Normalize one fetched anomalies snapshot, in backend order.
pub fn ingest_anomalies(values: Vec<Value>, identities: &IdentityStore) -> DeskResult<Vec<Anomaly>> {
    let ids = assign_identities(CollectionKind::Anomalies, &values, identities)?;
    values
        .into_iter()
        .zip(ids)
        .map(|(value, (item_id, backend))| -> DeskResult<Anomaly> {
            let raw: RawAnomaly = serde_json::from_value(value)?;
            Ok(Anomaly::from_raw(raw, item_id, backend))
        })
        .collect()
}

/// Normalize one fetched autofixes snapshot, in backend order.
pub fn ingest_autofixes(values: Vec<Value>, identities: &IdentityStore) -> DeskResult<Vec<Autofix>> {
    let ids = assign_identities(CollectionKind::Autofixes, &values, identities)?;
    values
        .into_iter()
        .zip(ids)
        .map(|(value, (item_id, backend))| -> DeskResult<Autofix> {
            let raw: RawAutofix = serde_json::from_value(value)?;
            Ok(Autofix::from_raw(raw, item_id, backend))
        })
        .collect()
}

/// Pair every record with its stable id and its backend address.
///
/// A backend `id` is the stable id when present. Otherwise the record gets
/// a persisted synthetic id keyed by content fingerprint plus the number of
/// identical records seen before it in this snapshot. Anomalies are always
/// addressed by position; autofixes by their `id` when they carry one.
fn assign_identities(
    kind: CollectionKind,
    values: &[Value],
    identities: &IdentityStore,
) -> DeskResult<Vec<(ItemId, BackendIdentity)>> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut out = Vec::with_capacity(values.len());

    for (position, value) in values.iter().enumerate() {
        let backend = value.get("id").and_then(backend_id);
        let item_id = match &backend {
            Some(id) => ItemId(id.clone()),
            None => {
                let fp = fingerprint(value);
                let occurrence = seen.entry(fp.clone()).or_insert(0);
                let item_id = identities.assign_item_id(kind, &fp, *occurrence)?;
                *occurrence += 1;
                item_id
            }
        };
        let address = match (kind, backend) {
            (CollectionKind::Autofixes, Some(id)) => BackendIdentity::Id(id),
            _ => BackendIdentity::Position(position),
        };
        out.push((item_id, address));
    }
    Ok(out)
}

/// SHA-256 of the record's JSON. serde_json maps are key-sorted, so equal
/// records always hash equally.
pub fn fingerprint(value: &Value) -> String {
    format!("{:x}", Sha256::digest(value.to_string().as_bytes()))
}

fn backend_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}
