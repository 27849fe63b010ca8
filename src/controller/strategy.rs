//! The three limit-calculation strategies.
//!
//! Each strategy is a pure function of (pod, node, peer aggregate, config)
//! producing a candidate limit set; nothing here touches the API server.
//! The strategy set is closed: once the resolver has produced a
//! [`Strategy`], dispatch is exhaustive and an unknown strategy cannot
//! occur.

use std::fmt;

use k8s_openapi::api::core::v1::{Node, Pod};

use super::config::AdjustConfig;
use super::inspector::PeerAggregate;
use super::quantity::{parse_cpu_millis, parse_memory_bytes, per_pod, percent_of, remaining};

/// Limit calculation strategy selected via the strategy annotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// `limit = min(current, allocatable * percent / 100 / active pods)`
    #[default]
    Percent,
    /// `limit = allocatable - sum(peer requests) - buffer`
    Fit,
    /// `limit = request` for the first container (no burst)
    Cap,
}

impl Strategy {
    /// Accepts the three known names case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "percent" => Some(Self::Percent),
            "fit" => Some(Self::Fit),
            "cap" => Some(Self::Cap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Fit => "fit",
            Self::Cap => "cap",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate limits for one reconciliation, recomputed from scratch each
/// pass. A `None` kind means no limit is emitted for it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LimitSet {
    pub memory_bytes: Option<i64>,
    pub cpu_millis: Option<i64>,
}

impl LimitSet {
    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_millis.is_none()
    }
}

/// Computes the candidate limit set for the resolved strategy.
pub fn calculate(
    pod: &Pod,
    node: &Node,
    peers: &PeerAggregate,
    config: &AdjustConfig,
) -> LimitSet {
    match config.strategy {
        Strategy::Percent => percent_limits(pod, node, peers, config.percent),
        Strategy::Fit => fit_limits(node, peers, config.buffer_bytes),
        Strategy::Cap => cap_limits(pod),
    }
}

fn allocatable_memory(node: &Node) -> Option<i64> {
    node.status
        .as_ref()?
        .allocatable
        .as_ref()?
        .get("memory")
        .and_then(|q| parse_memory_bytes(&q.0))
}

fn allocatable_cpu_millis(node: &Node) -> Option<i64> {
    node.status
        .as_ref()?
        .allocatable
        .as_ref()?
        .get("cpu")
        .and_then(|q| parse_cpu_millis(&q.0))
}

/// Current limit for a resource kind: first container carrying the kind.
fn first_limit(pod: &Pod, kind: &str) -> Option<String> {
    pod.spec.as_ref()?.containers.iter().find_map(|c| {
        c.resources
            .as_ref()?
            .limits
            .as_ref()?
            .get(kind)
            .map(|q| q.0.clone())
    })
}

fn current_memory_limit(pod: &Pod) -> Option<i64> {
    first_limit(pod, "memory").as_deref().and_then(parse_memory_bytes)
}

fn current_cpu_limit(pod: &Pod) -> Option<i64> {
    first_limit(pod, "cpu").as_deref().and_then(parse_cpu_millis)
}

/// Bounds the pod to its share of a percentage of node capacity, never
/// raising a limit above what is already set.
fn percent_limits(pod: &Pod, node: &Node, peers: &PeerAggregate, percent: u32) -> LimitSet {
    let mut limits = LimitSet::default();
    let share = peers.divisor();

    if let Some(allocatable) = allocatable_memory(node) {
        let cap = per_pod(percent_of(allocatable, percent), share);
        limits.memory_bytes = Some(match current_memory_limit(pod) {
            Some(current) if current > 0 => cap.min(current),
            _ => cap,
        });
    }

    if let Some(allocatable) = allocatable_cpu_millis(node) {
        let cap = per_pod(percent_of(allocatable, percent), share);
        // A CPU limit is only ever tightened, never introduced.
        if let Some(current) = current_cpu_limit(pod) {
            if current > 0 {
                limits.cpu_millis = Some(cap.min(current));
            }
        }
    }

    limits
}

/// Bounds the pod to what remains after the co-scheduled pods' requests,
/// superseding any current limit. The buffer is memory headroom only.
fn fit_limits(node: &Node, peers: &PeerAggregate, buffer_bytes: i64) -> LimitSet {
    let mut limits = LimitSet::default();

    if let Some(allocatable) = allocatable_memory(node) {
        limits.memory_bytes = Some(remaining(
            allocatable,
            peers.memory_request_bytes,
            buffer_bytes,
        ));
    }

    if let Some(allocatable) = allocatable_cpu_millis(node) {
        limits.cpu_millis = Some(remaining(allocatable, peers.cpu_request_millis, 0));
    }

    limits
}

/// Sets limit = request, removing burst capacity.
///
/// Only the first container's requests are consulted; widening this to
/// all containers is a pending behavior decision, so the scoping is kept
/// as-is rather than changed quietly.
fn cap_limits(pod: &Pod) -> LimitSet {
    let mut limits = LimitSet::default();

    if let Some(container) = pod.spec.as_ref().and_then(|s| s.containers.first()) {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            limits.memory_bytes = requests.get("memory").and_then(|q| parse_memory_bytes(&q.0));
            limits.cpu_millis = requests.get("cpu").and_then(|q| parse_cpu_millis(&q.0));
        }
    }

    limits
}
