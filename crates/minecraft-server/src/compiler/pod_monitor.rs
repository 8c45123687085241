use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use minecraft_common::crd::{PodMetricsEndpoint, PodMonitor, PodMonitorSpec};

use super::ServerIdentity;

/// Scrape target for the exporter plugin's `metrics` container port
pub fn compile_pod_monitor(id: &ServerIdentity) -> PodMonitor {
    let name = id.pod_monitor_name();
    let spec = PodMonitorSpec {
        selector: LabelSelector {
            match_labels: Some(id.labels.clone()),
            ..Default::default()
        },
        pod_metrics_endpoints: vec![PodMetricsEndpoint {
            port: "metrics".to_string(),
            path: None,
        }],
    };
    let mut pod_monitor = PodMonitor::new(&name, spec);
    pod_monitor.metadata = id.child_meta(name);
    pod_monitor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::identity;

    #[test]
    fn pod_monitor_selects_the_server_pods() {
        let pm = compile_pod_monitor(&identity());
        assert_eq!(pm.metadata.name.as_deref(), Some("survival"));
        assert_eq!(pm.spec.selector.match_labels, Some(identity().labels));
        assert_eq!(pm.spec.pod_metrics_endpoints[0].port, "metrics");
    }
}
