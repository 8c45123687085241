//! Network endpoints: the player-facing Service and the internal ones

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use minecraft_common::crd::MinecraftServerSpec;
use minecraft_common::{DYNMAP_PORT, MINECRAFT_PORT, RCON_PORT};

use super::ServerIdentity;

/// Port the map renderer Service exposes in front of the web server
const DYNMAP_SERVICE_PORT: i32 = 80;

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// The player-facing Service, or `None` if the spec asks for no exposure
pub fn compile_service(id: &ServerIdentity, spec: &MinecraftServerSpec) -> Option<Service> {
    let service_type = spec.primary_service_type()?;

    let mut port = tcp_port("minecraft", MINECRAFT_PORT);
    port.node_port = spec
        .service
        .as_ref()
        .and_then(|s| s.minecraft_node_port)
        .filter(|p| *p > 0);

    Some(Service {
        metadata: id.child_meta(id.service_name()),
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            ip_family_policy: Some("PreferDualStack".to_string()),
            selector: Some(id.labels.clone()),
            ports: Some(vec![port]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// In-cluster remote console Service; always present
pub fn compile_rcon_service(id: &ServerIdentity) -> Service {
    Service {
        metadata: id.child_meta(id.rcon_service_name()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(id.labels.clone()),
            ports: Some(vec![tcp_port("rcon", RCON_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// In-cluster Service in front of the map renderer's web server
pub fn compile_dynmap_service(id: &ServerIdentity) -> Service {
    let mut port = tcp_port("dynmap", DYNMAP_SERVICE_PORT);
    port.target_port = Some(IntOrString::Int(DYNMAP_PORT));

    Service {
        metadata: id.child_meta(id.dynmap_name()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(id.labels.clone()),
            ports: Some(vec![port]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::identity;
    use minecraft_common::crd::{ServerServiceSpec, ServiceType};

    fn spec_with_service(service_type: ServiceType, node_port: Option<i32>) -> MinecraftServerSpec {
        MinecraftServerSpec {
            service: Some(ServerServiceSpec {
                service_type,
                minecraft_node_port: node_port,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn no_service_section_means_no_service() {
        assert!(compile_service(&identity(), &MinecraftServerSpec::default()).is_none());
        assert!(compile_service(&identity(), &spec_with_service(ServiceType::None, None)).is_none());
    }

    #[test]
    fn node_port_service_pins_the_port() {
        let svc = compile_service(&identity(), &spec_with_service(ServiceType::NodePort, Some(30565)))
            .expect("service");
        let spec = svc.spec.expect("spec");
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ip_family_policy.as_deref(), Some("PreferDualStack"));
        let ports = spec.ports.expect("ports");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("minecraft"));
        assert_eq!(ports[0].port, 25565);
        assert_eq!(ports[0].node_port, Some(30565));
        assert_eq!(spec.selector, Some(identity().labels));
    }

    #[test]
    fn zero_node_port_is_left_to_the_cluster() {
        let svc = compile_service(&identity(), &spec_with_service(ServiceType::LoadBalancer, Some(0)))
            .expect("service");
        let ports = svc.spec.and_then(|s| s.ports).expect("ports");
        assert_eq!(ports[0].node_port, None);
    }

    #[test]
    fn rcon_service_is_internal() {
        let svc = compile_rcon_service(&identity());
        assert_eq!(svc.metadata.name.as_deref(), Some("survival-rcon"));
        let spec = svc.spec.expect("spec");
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let ports = spec.ports.expect("ports");
        assert_eq!(ports[0].name.as_deref(), Some("rcon"));
        assert_eq!(ports[0].port, 25575);
    }

    #[test]
    fn dynmap_service_fronts_the_web_server() {
        let svc = compile_dynmap_service(&identity());
        assert_eq!(svc.metadata.name.as_deref(), Some("survival-dynmap"));
        let ports = svc.spec.and_then(|s| s.ports).expect("ports");
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8123)));
    }
}
