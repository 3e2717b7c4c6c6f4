//! Policies compiled into the registrar.
//!
//! | Policy          | Config                                   | Nodes                                   |
//! |-----------------|------------------------------------------|-----------------------------------------|
//! | `skydns`        | `domain` (default `skydns.local`), `network` (required); store-bound | `/skydns/<reversed domain>/<hostname>` |
//! | `skydns-bridge` | none                                     | `/skydns/local/skydns/<hostname>`       |
//!
//! Both publish `{"host": "<ip>"}` and skip containers without an address
//! (stopped containers report an empty one).

use std::sync::Arc;

use serde_json::json;

use registrar_core::{Config, ConfigSchema, Container, FieldKind};

use crate::error::PolicyError;
use crate::nodes::NodeValues;
use crate::policy::Policy;

pub const SKYDNS_DEFAULT_DOMAIN: &str = "skydns.local";

/// Store prefix holding one document per `skydns` instance.
pub const SKYDNS_STORE_PATH: &str = "/registrar/services/skydns/";

/// `/skydns/<domain labels reversed>/<name>`.
pub fn skydns_path(domain: &str, name: &str) -> String {
    let mut path = String::from("/skydns");
    for label in domain.split('.').rev().filter(|label| !label.is_empty()) {
        path.push('/');
        path.push_str(label);
    }
    path.push('/');
    path.push_str(name);
    path
}

fn host_node(domain: &str, container: &Container, ip: &str) -> Option<NodeValues> {
    if container.hostname().is_empty() {
        return None;
    }
    let mut nodes = NodeValues::new();
    nodes.insert(
        skydns_path(domain, container.hostname()),
        json!({ "host": ip }),
    );
    Some(nodes)
}

/// SkyDNS records for containers attached to the configured network.
pub fn skydns() -> Policy {
    let schema = ConfigSchema::new()
        .field_with_default("domain", FieldKind::String, SKYDNS_DEFAULT_DOMAIN)
        .required("network", FieldKind::String)
        .store_path(SKYDNS_STORE_PATH);

    Policy::builder("skydns", |container: &Container, config: Option<&Config>| {
        let config = config?;
        let domain = config.str("domain").unwrap_or(SKYDNS_DEFAULT_DOMAIN);
        let ip = container.network_address(config.str("network")?)?;
        host_node(domain, container, ip)
    })
    .config(schema)
    .build()
}

/// Configurationless SkyDNS records from the default bridge address.
pub fn skydns_bridge() -> Policy {
    Policy::builder("skydns-bridge", |container: &Container, _config: Option<&Config>| {
        let ip = container
            .lookup(&["NetworkSettings", "IPAddress"])?
            .as_str()
            .filter(|ip| !ip.is_empty())?;
        host_node(SKYDNS_DEFAULT_DOMAIN, container, ip)
    })
    .build()
}

/// Every builtin policy, sorted by name.
pub fn all() -> Vec<Arc<Policy>> {
    vec![Arc::new(skydns()), Arc::new(skydns_bridge())]
}

/// Look up builtin policies by name, preserving the requested order.
pub fn select(names: &[String]) -> Result<Vec<Arc<Policy>>, PolicyError> {
    let available = all();
    names
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|policy| policy.name().0 == *name)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownPolicy(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyContext;
    use registrar_core::{ContainerId, ContainerState, InstanceName};
    use serde_json::Value;

    fn container(id: &str, hostname: &str, bridge_ip: &str, networks: Value) -> Container {
        Container::from_inspect(
            ContainerId::from(id),
            json!({
                "Name": format!("/{id}"),
                "Config": { "Hostname": hostname },
                "NetworkSettings": { "IPAddress": bridge_ip, "Networks": networks },
            }),
        )
    }

    fn state() -> ContainerState {
        [
            container(
                "c1",
                "test-1",
                "172.18.0.2",
                json!({ "kontena": { "IPAddress": "10.81.0.2" } }),
            ),
            container(
                "c2",
                "test-2",
                "172.18.0.3",
                json!({ "kontena": { "IPAddress": "" } }),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn skydns_path_reverses_domain_labels() {
        assert_eq!(skydns_path("skydns.local", "web"), "/skydns/local/skydns/web");
        assert_eq!(skydns_path("a.example.com", "x"), "/skydns/com/example/a/x");
        assert_eq!(skydns_path("", "x"), "/skydns/x");
    }

    #[test]
    fn bridge_policy_writes_every_running_container() {
        let context = PolicyContext::new(Arc::new(skydns_bridge()), None).expect("context");
        let evaluation = context.apply_all(&state());
        assert_eq!(
            evaluation.nodes,
            [
                (
                    "/skydns/local/skydns/test-1".to_string(),
                    r#"{"host":"172.18.0.2"}"#.to_string()
                ),
                (
                    "/skydns/local/skydns/test-2".to_string(),
                    r#"{"host":"172.18.0.3"}"#.to_string()
                ),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn skydns_policy_uses_configured_network_and_domain() {
        let policy = Arc::new(skydns());
        let schema = policy.schema().expect("schema").clone();
        let config = schema
            .parse(
                &InstanceName::from("kontena"),
                &json!({ "network": "kontena", "domain": "kontena.local" }),
            )
            .expect("valid");
        let context = PolicyContext::new(policy, Some(Arc::new(config))).expect("context");

        let evaluation = context.apply_all(&state());
        assert_eq!(evaluation.nodes.len(), 1, "stopped container has no address");
        assert_eq!(
            evaluation.nodes["/skydns/local/kontena/test-1"],
            r#"{"host":"10.81.0.2"}"#
        );
    }

    #[test]
    fn select_reports_unknown_names() {
        let selected = select(&["skydns-bridge".to_string()]).expect("known");
        assert_eq!(selected[0].name().0, "skydns-bridge");
        assert_eq!(
            select(&["nope".to_string()]).unwrap_err(),
            PolicyError::UnknownPolicy("nope".to_string())
        );
    }
}
