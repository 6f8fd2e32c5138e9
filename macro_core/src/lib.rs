#![forbid(unsafe_code)]

//! Core domain model and business logic for training-plan macros.
//!
//! This crate provides:
//! - Domain types (rules, plans, workout metrics, set patches, reports)
//! - Trigger, condition and workout-window evaluation
//! - Patch and plan-change building
//! - The rule engine and the preview applier
//! - Collaborator traits and a JSON-file store implementing them

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod catalog;
pub mod rpe;
pub mod providers;
pub mod condition;
pub mod trigger;
pub mod selector;
pub mod patch;
pub mod plan_change;
pub mod applier;
pub mod engine;
pub mod json_store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use catalog::{CatalogEntry, CatalogIndex};
pub use rpe::{RpeChart, RpeLookup};
pub use providers::{CatalogSource, InstanceStore, MetricProvider, PlanEditor, PlanStore};
pub use applier::MacroApplier;
pub use engine::MacroEngine;
pub use json_store::{JsonStore, StoreData};
