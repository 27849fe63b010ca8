//! Aggregation over the pods co-scheduled on a node.
//!
//! The reconciler lists pods by `spec.nodeName` once per pass; everything
//! here is pure computation over that listing so it stays unit-testable.

use k8s_openapi::api::core::v1::Pod;

use super::quantity::{parse_cpu_millis, parse_memory_bytes};

/// Phases during which a pod still holds a resource reservation on its node.
const ACTIVE_PHASES: [&str; 2] = ["Pending", "Running"];

fn is_active(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| ACTIVE_PHASES.contains(&phase))
        .unwrap_or(false)
}

/// Aggregate view of the other pods sharing the subject pod's node.
///
/// `active_pods` counts every active pod on the node, the subject
/// included; the summed requests cover only the *other* active pods.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerAggregate {
    pub active_pods: usize,
    pub memory_request_bytes: i64,
    pub cpu_request_millis: i64,
}

impl PeerAggregate {
    /// Builds the aggregate from a node-filtered pod listing.
    ///
    /// The subject pod is excluded from the request sums by uid, not by
    /// name, so a replacement pod with the same name is still a peer.
    pub fn from_pods(subject: &Pod, pods: &[Pod]) -> Self {
        let subject_uid = subject.metadata.uid.as_deref();
        let mut aggregate = PeerAggregate::default();

        for pod in pods {
            if !is_active(pod) {
                continue;
            }
            aggregate.active_pods += 1;

            if subject_uid.is_some() && pod.metadata.uid.as_deref() == subject_uid {
                continue;
            }

            let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
            for container in containers {
                let Some(requests) = container
                    .resources
                    .as_ref()
                    .and_then(|r| r.requests.as_ref())
                else {
                    continue;
                };
                if let Some(memory) = requests.get("memory").and_then(|q| parse_memory_bytes(&q.0))
                {
                    aggregate.memory_request_bytes =
                        aggregate.memory_request_bytes.saturating_add(memory);
                }
                if let Some(cpu) = requests.get("cpu").and_then(|q| parse_cpu_millis(&q.0)) {
                    aggregate.cpu_request_millis =
                        aggregate.cpu_request_millis.saturating_add(cpu);
                }
            }
        }

        aggregate
    }

    /// Active pod count floored at one. The listing can race at the query
    /// boundary and miss even the subject pod; never divide by zero.
    pub fn divisor(&self) -> usize {
        self.active_pods.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn requests(memory: &str, cpu: &str) -> BTreeMap<String, Quantity> {
        let mut map = BTreeMap::new();
        map.insert("memory".to_string(), Quantity(memory.to_string()));
        map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        map
    }

    fn pod(uid: &str, phase: &str, memory: &str, cpu: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("pod-{uid}")),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests(memory, cpu)),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_counts_active_pods_including_subject() {
        let subject = pod("uid-1", "Running", "1Gi", "500m");
        let pods = vec![
            subject.clone(),
            pod("uid-2", "Running", "1Gi", "500m"),
            pod("uid-3", "Pending", "1Gi", "500m"),
        ];
        let aggregate = PeerAggregate::from_pods(&subject, &pods);
        assert_eq!(aggregate.active_pods, 3);
    }

    #[test]
    fn test_excludes_subject_from_sums_by_uid() {
        let subject = pod("uid-1", "Running", "4Gi", "2");
        let pods = vec![subject.clone(), pod("uid-2", "Running", "1Gi", "500m")];
        let aggregate = PeerAggregate::from_pods(&subject, &pods);
        assert_eq!(aggregate.memory_request_bytes, 1024 * 1024 * 1024);
        assert_eq!(aggregate.cpu_request_millis, 500);
    }

    #[test]
    fn test_same_name_different_uid_is_a_peer() {
        let subject = pod("uid-new", "Running", "1Gi", "1");
        let mut replaced = pod("uid-old", "Running", "2Gi", "1");
        replaced.metadata.name = subject.metadata.name.clone();
        let aggregate = PeerAggregate::from_pods(&subject, &[subject.clone(), replaced]);
        assert_eq!(aggregate.memory_request_bytes, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_terminal_phases_excluded() {
        let subject = pod("uid-1", "Running", "1Gi", "1");
        let pods = vec![
            subject.clone(),
            pod("uid-2", "Succeeded", "8Gi", "4"),
            pod("uid-3", "Failed", "8Gi", "4"),
            pod("uid-4", "Unknown", "8Gi", "4"),
        ];
        let aggregate = PeerAggregate::from_pods(&subject, &pods);
        assert_eq!(aggregate.active_pods, 1);
        assert_eq!(aggregate.memory_request_bytes, 0);
        assert_eq!(aggregate.cpu_request_millis, 0);
    }

    #[test]
    fn test_missing_requests_are_skipped() {
        let subject = pod("uid-1", "Running", "1Gi", "1");
        let mut bare = pod("uid-2", "Running", "1Gi", "1");
        if let Some(spec) = bare.spec.as_mut() {
            spec.containers[0].resources = None;
        }
        let aggregate = PeerAggregate::from_pods(&subject, &[subject.clone(), bare]);
        assert_eq!(aggregate.memory_request_bytes, 0);
        assert_eq!(aggregate.active_pods, 2);
    }

    #[test]
    fn test_sums_across_containers() {
        let subject = pod("uid-1", "Running", "1Gi", "1");
        let mut multi = pod("uid-2", "Running", "1Gi", "250m");
        if let Some(spec) = multi.spec.as_mut() {
            spec.containers.push(Container {
                name: "sidecar".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(requests("512Mi", "250m")),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        let aggregate = PeerAggregate::from_pods(&subject, &[subject.clone(), multi]);
        assert_eq!(aggregate.memory_request_bytes, 1536 * 1024 * 1024);
        assert_eq!(aggregate.cpu_request_millis, 500);
    }

    #[test]
    fn test_divisor_floors_at_one() {
        let aggregate = PeerAggregate::default();
        assert_eq!(aggregate.divisor(), 1);
        let aggregate = PeerAggregate {
            active_pods: 3,
            ..Default::default()
        };
        assert_eq!(aggregate.divisor(), 3);
    }
}
