//! Pod reconciler: ties annotations, node capacity and peer pods into a
//! single limit adjustment.
//!
//! Implements the controller pattern using kube-rs runtime. Every
//! reconciliation is computed fresh from current cluster state; the only
//! write is one strategic-merge patch per pass, issued after the
//! eligibility gate and the idempotency check both pass. Failed passes are
//! re-delivered wholesale by the runtime, which is safe because the whole
//! decision is idempotent.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Resource, ResourceExt,
};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};

use super::config::{self, ConfigDefaults, ANNOTATION_ADJUSTED};
use super::inspector::PeerAggregate;
use super::quantity::{format_cpu_millis, format_memory, parse_cpu_millis, parse_memory_bytes};
use super::strategy::{self, LimitSet};

const FIELD_MANAGER: &str = "nodefit-operator";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub defaults: ConfigDefaults,
    pub dry_run: bool,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let pods: Api<Pod> = Api::all(client.clone());

    info!("Starting NodeFit pod controller");

    // Verify we can watch pods before entering the loop
    match pods.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("Pod API is reachable"),
        Err(e) => {
            error!("Cannot list pods, check RBAC: {:?}", e);
            return Err(Error::ConfigError(
                "pod list permission missing".to_string(),
            ));
        }
    }

    Controller::new(pods, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The reconciliation function, invoked once per relevant pod change.
///
/// Skip conditions in order: opt-in gate, unscheduled, not running,
/// vanished between trigger and fetch. Only after all of them does the
/// reconciler read the node or the peer listing.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub(crate) async fn reconcile(obj: Arc<Pod>, ctx: Arc<ControllerState>) -> Result<Action> {
    // Gate on the cached object first: disabled pods cost no API reads.
    if !config::is_enabled(&obj) {
        return Ok(Action::await_change());
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);

    // Re-fetch: a pod that vanished needs no adjustment.
    let pod = match pods.get(&name).await {
        Ok(pod) => pod,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!("Pod {}/{} is gone, nothing to do", namespace, name);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(Error::KubeError(e)),
    };

    if !config::is_enabled(&pod) {
        return Ok(Action::await_change());
    }

    let node_name = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .unwrap_or_default();
    if node_name.is_empty() {
        debug!("Pod {}/{} not yet scheduled, skipping", namespace, name);
        return Ok(Action::await_change());
    }

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");
    if phase != "Running" {
        debug!(
            "Pod {}/{} not running (phase {}), skipping",
            namespace, name, phase
        );
        return Ok(Action::await_change());
    }

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let node = match nodes.get(&node_name).await {
        Ok(node) => node,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!("Node {} is gone, nothing to do", node_name);
            return Ok(Action::await_change());
        }
        Err(e) => {
            error!("Failed to get node {}: {:?}", node_name, e);
            return Err(Error::KubeError(e));
        }
    };

    let cfg = config::resolve_config(&pod, &ctx.defaults);
    info!(
        "Processing pod {}/{} on node {} with strategy {}",
        namespace, name, node_name, cfg.strategy
    );

    // Single node-filtered listing feeds both the pod count and the peer sums.
    let all_pods: Api<Pod> = Api::all(ctx.client.clone());
    let on_node = all_pods
        .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
        .await
        .map_err(Error::KubeError)?;
    let peers = PeerAggregate::from_pods(&pod, &on_node.items);

    let limits = strategy::calculate(&pod, &node, &peers, &cfg);

    if !needs_update(&pod, &limits) {
        debug!("No update needed for {}/{}", namespace, name);
        return Ok(Action::await_change());
    }

    if ctx.dry_run {
        info!(
            "Dry run: would set limits for {}/{} to memory={:?} cpu={:?}",
            namespace,
            name,
            limits.memory_bytes.map(format_memory),
            limits.cpu_millis.map(format_cpu_millis),
        );
        return Ok(Action::await_change());
    }

    apply_limits(&pods, &pod, &limits).await?;

    let message = format!(
        "Adjusted limits via {} strategy: memory={}, cpu={}",
        cfg.strategy,
        limits
            .memory_bytes
            .map(format_memory)
            .unwrap_or_else(|| "unchanged".to_string()),
        limits
            .cpu_millis
            .map(format_cpu_millis)
            .unwrap_or_else(|| "unchanged".to_string()),
    );
    if let Err(e) = emit_event(&ctx.client, &pod, "Normal", "LimitsAdjusted", &message).await {
        warn!("Failed to emit event for {}/{}: {:?}", namespace, name, e);
    }

    info!("Successfully adjusted limits for {}/{}: {}", namespace, name, message);

    Ok(Action::await_change())
}

/// Whether the candidate set differs from what the pod already carries.
///
/// Comparison is by resolved numeric value, not string rendering, so
/// `1Gi` and `1024Mi` are equal while `1024Mi` and `1Gi+1` are not. An
/// empty candidate set never triggers an update.
pub fn needs_update(pod: &Pod, limits: &LimitSet) -> bool {
    if limits.is_empty() {
        return false;
    }

    let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
    for container in containers {
        let current = container
            .resources
            .as_ref()
            .and_then(|r| r.limits.as_ref());

        if let Some(want) = limits.memory_bytes {
            let have = current
                .and_then(|l| l.get("memory"))
                .and_then(|q| parse_memory_bytes(&q.0));
            if have != Some(want) {
                return true;
            }
        }
        if let Some(want) = limits.cpu_millis {
            let have = current
                .and_then(|l| l.get("cpu"))
                .and_then(|q| parse_cpu_millis(&q.0));
            if have != Some(want) {
                return true;
            }
        }
    }
    false
}

/// Builds the strategic-merge patch that sets the candidate limits on
/// every container and writes the adjusted marker annotation.
///
/// Containers are merged by name, so unrelated concurrent changes to the
/// pod are left alone.
pub fn build_limits_patch(pod: &Pod, limits: &LimitSet) -> serde_json::Value {
    let mut limit_entries = serde_json::Map::new();
    if let Some(memory) = limits.memory_bytes {
        limit_entries.insert("memory".to_string(), json!(format_memory(memory)));
    }
    if let Some(cpu) = limits.cpu_millis {
        limit_entries.insert("cpu".to_string(), json!(format_cpu_millis(cpu)));
    }

    let containers: Vec<serde_json::Value> = pod
        .spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .map(|c| {
            json!({
                "name": c.name,
                "resources": { "limits": limit_entries }
            })
        })
        .collect();

    json!({
        "metadata": {
            "annotations": { ANNOTATION_ADJUSTED: "true" }
        },
        "spec": {
            "containers": containers
        }
    })
}

/// Patch parameters carrying the operator's field manager, so the write
/// is attributed to this controller in managedFields.
pub(crate) fn patch_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER)
}

/// Applies the candidate limits with a single in-place patch (no restart).
async fn apply_limits(api: &Api<Pod>, pod: &Pod, limits: &LimitSet) -> Result<()> {
    let patch = build_limits_patch(pod, limits);
    api.patch(&pod.name_any(), &patch_params(), &Patch::Strategic(&patch))
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Helper to emit a Kubernetes Event against a pod
async fn emit_event(
    client: &Client,
    pod: &Pod,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", pod.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: pod.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        reporting_component: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(pod: Arc<Pod>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", pod.name_any(), error);

    // Transient API failures get a quick retry; everything else waits.
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(300)
    };

    Action::requeue(retry_duration)
}
