//! Annotation-driven configuration for pod limit adjustment.
//!
//! All configuration rides on the pod itself as `nodefit.io/*` annotations;
//! nothing is persisted by the operator. Resolution never fails: malformed
//! values fall back per-field to the supplied defaults.

use k8s_openapi::api::core::v1::Pod;

use super::quantity::parse_memory_bytes;
use super::strategy::Strategy;

/// Opt-in flag; case-insensitive `"true"` enables adjustment.
pub const ANNOTATION_ENABLED: &str = "nodefit.io/enabled";
/// Selects the limit calculation strategy (`percent`, `fit`, `cap`).
pub const ANNOTATION_STRATEGY: &str = "nodefit.io/strategy";
/// Percent-strategy parameter, integer 1-100.
pub const ANNOTATION_PERCENT: &str = "nodefit.io/percent";
/// Fit-strategy memory headroom, a quantity string (e.g. `256Mi`).
pub const ANNOTATION_BUFFER: &str = "nodefit.io/buffer";
/// Marker written by the operator after limits were adjusted.
pub const ANNOTATION_ADJUSTED: &str = "nodefit.io/adjusted";

/// Fallback values used when an annotation is absent or malformed.
///
/// Passed explicitly into [`resolve_config`] so tests and the CLI can
/// override them without touching shared state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDefaults {
    pub strategy: Strategy,
    pub percent: u32,
    pub buffer_bytes: i64,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            strategy: Strategy::Percent,
            percent: 80,
            buffer_bytes: 256 * 1024 * 1024, // 256Mi
        }
    }
}

/// Per-reconciliation configuration resolved from a pod's annotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdjustConfig {
    pub strategy: Strategy,
    pub percent: u32,
    pub buffer_bytes: i64,
}

/// Whether the pod has opted in to limit adjustment.
///
/// Evaluated before any node or peer read so disabled pods cost nothing
/// beyond the annotation lookup.
pub fn is_enabled(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_ENABLED))
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Resolves the adjustment configuration from the pod's annotations.
///
/// Each field falls back independently: an invalid percent does not
/// invalidate a valid strategy on the same pod.
pub fn resolve_config(pod: &Pod, defaults: &ConfigDefaults) -> AdjustConfig {
    let mut config = AdjustConfig {
        strategy: defaults.strategy,
        percent: defaults.percent,
        buffer_bytes: defaults.buffer_bytes,
    };

    let Some(annotations) = pod.metadata.annotations.as_ref() else {
        return config;
    };

    if let Some(strategy) = annotations
        .get(ANNOTATION_STRATEGY)
        .and_then(|s| Strategy::parse(s))
    {
        config.strategy = strategy;
    }

    if let Some(percent) = annotations
        .get(ANNOTATION_PERCENT)
        .and_then(|s| s.parse::<u32>().ok())
    {
        if (1..=100).contains(&percent) {
            config.percent = percent;
        }
    }

    if let Some(buffer) = annotations
        .get(ANNOTATION_BUFFER)
        .and_then(|s| parse_memory_bytes(s))
    {
        if buffer >= 0 {
            config.buffer_bytes = buffer;
        }
    }

    config
}
