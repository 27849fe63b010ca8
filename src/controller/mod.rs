//! Controller module for pod limit reconciliation
//! This module contains the controller loop, the annotation-driven
//! configuration resolver, node/peer inspection and the limit strategies.

mod config;
mod inspector;
mod quantity;
mod reconciler;
mod strategy;

pub use config::{
    is_enabled, resolve_config, AdjustConfig, ConfigDefaults, ANNOTATION_ADJUSTED,
    ANNOTATION_BUFFER, ANNOTATION_ENABLED, ANNOTATION_PERCENT, ANNOTATION_STRATEGY,
};
pub use inspector::PeerAggregate;
pub use quantity::{
    format_cpu_millis, format_memory, parse_cpu_millis, parse_memory_bytes,
};
pub use reconciler::{needs_update, run_controller, ControllerState};
pub use strategy::{calculate, LimitSet, Strategy};
