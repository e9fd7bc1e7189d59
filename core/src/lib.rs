//! Anomaly Desk core: keeps the operator's anomaly and autofix views in
//! step with the billing backend.
//!
//! Components:
//!   sync      DataSyncController: collections, load status, delete + refetch
//!   mutation  MutationTracker: which items have a delete in flight
//!   view      FilterViewModel: filtered lists, tab counts, customer list
//!   session   DeskSession: one view session composing the three
//!
//! Supporting:
//!   api       BillingApi collaborator and its reqwest implementation
//!   record    wire records normalised into canonical shapes
//!   store     SQLite-backed synthesized identities
//!   config, error, types

pub mod api;
pub mod config;
pub mod error;
pub mod mutation;
pub mod record;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;
pub mod view;
