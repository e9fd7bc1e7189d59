//! Derived views over the synced collections.
//!
//! RULE: Nothing here holds state. Every output is a function of
//! (collections, filter) and is recomputed on demand.

use crate::{
    record::{AccountScoped, Anomaly, Autofix},
    sync::LoadPhase,
    types::{CollectionKind, ItemKey},
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Case-insensitive substring match on `account_number`, order preserved.
/// An empty filter keeps everything.
pub fn filter_by_account<'a, T: AccountScoped>(items: &'a [T], filter: &str) -> Vec<&'a T> {
    if filter.is_empty() {
        return items.iter().collect();
    }
    let needle = filter.to_lowercase();
    items
        .iter()
        .filter(|item| item.account_number().to_lowercase().contains(&needle))
        .collect()
}

pub struct FilterViewModel<'a> {
    anomalies: &'a [Anomaly],
    autofixes: &'a [Autofix],
    filter:    &'a str,
}

impl<'a> FilterViewModel<'a> {
    pub fn new(anomalies: &'a [Anomaly], autofixes: &'a [Autofix], filter: &'a str) -> Self {
        Self {
            anomalies,
            autofixes,
            filter,
        }
    }

    pub fn filter(&self) -> &str {
        self.filter
    }

    pub fn filtered_anomalies(&self) -> Vec<&'a Anomaly> {
        filter_by_account(self.anomalies, self.filter)
    }

    pub fn filtered_autofixes(&self) -> Vec<&'a Autofix> {
        filter_by_account(self.autofixes, self.filter)
    }

    /// Tab count for `kind`. Both tabs are counted against the same filter.
    pub fn count_for(&self, kind: CollectionKind) -> usize {
        match kind {
            CollectionKind::Anomalies => self.filtered_anomalies().len(),
            CollectionKind::Autofixes => self.filtered_autofixes().len(),
        }
    }

    /// Unique account numbers across anomalies only, sorted.
    pub fn customer_options(&self) -> Vec<String> {
        self.anomalies
            .iter()
            .map(|a| a.account_number.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Placeholder shown when the tab for `kind` has nothing to list.
    pub fn empty_message(&self, kind: CollectionKind) -> Option<&'static str> {
        if self.count_for(kind) > 0 {
            return None;
        }
        let filtered = !self.filter.is_empty();
        Some(match (kind, filtered) {
            (CollectionKind::Anomalies, true)  => "No anomalies found for this customer",
            (CollectionKind::Anomalies, false) => "No anomalies found",
            (CollectionKind::Autofixes, true)  => "No auto-fixes found for this customer",
            (CollectionKind::Autofixes, false) => "No auto-fixes found",
        })
    }

    /// Filtered autofixes counted per change type.
    pub fn change_type_summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for fix in self.filtered_autofixes() {
            *summary.entry(fix.change_type.clone()).or_insert(0) += 1;
        }
        summary
    }
}

/// Everything the rendering layer reads, in one serialisable snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DeskView {
    pub phase:               LoadPhase,
    pub error:               Option<String>,
    pub filter:              String,
    pub active_tab:          CollectionKind,
    pub anomaly_count:       usize,
    pub autofix_count:       usize,
    pub anomalies:           Vec<Anomaly>,
    pub autofixes:           Vec<Autofix>,
    pub customers:           Vec<String>,
    pub in_flight:           Vec<ItemKey>,
    pub empty_message:       Option<&'static str>,
    pub change_type_summary: BTreeMap<String, usize>,
}

impl DeskView {
    pub fn build(
        phase: LoadPhase,
        error: Option<String>,
        model: &FilterViewModel<'_>,
        active_tab: CollectionKind,
        in_flight: Vec<ItemKey>,
    ) -> Self {
        let anomalies: Vec<Anomaly> = model.filtered_anomalies().into_iter().cloned().collect();
        let autofixes: Vec<Autofix> = model.filtered_autofixes().into_iter().cloned().collect();
        Self {
            phase,
            error,
            filter: model.filter().to_string(),
            active_tab,
            anomaly_count: anomalies.len(),
            autofix_count: autofixes.len(),
            anomalies,
            autofixes,
            customers: model.customer_options(),
            in_flight,
            empty_message: model.empty_message(active_tab),
            change_type_summary: model.change_type_summary(),
        }
    }
}
