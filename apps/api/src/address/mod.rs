//! Address subsystem: resolution pipeline (parser → provider → standardized
//! canonical types → coordinate fallback chain) and the audit-aware
//! persistence state machine.

pub mod coordinates;
pub mod handlers;
pub mod kleber;
pub mod parser;
pub mod persistence;
pub mod provider;
pub mod service;
pub mod store;
