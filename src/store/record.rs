//! The serialized instance record stored under each endpoint key.
//!
//! Records are JSON so the administrative tooling and other replicas can
//! read and write them directly. Each record carries the instance
//! address, its named ports, and (when weighted) a
//! `<host>_<port>_weight` label.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use super::keys::weight_key;
use crate::hub::EndpointMap;
use crate::hub::ServiceEndpoint;
use crate::proto::discovery::ServiceSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// `host:port` of the instance
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub ports: Vec<NamedPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub port: i32,
}

impl InstanceRecord {
    pub fn new(spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> Self {
        let mut labels = HashMap::new();
        if weight != 0 {
            labels.insert(weight_key(host, port), weight.to_string());
        }
        Self {
            name: format!("{}:{}", host, port),
            namespace: spec.namespace.clone(),
            labels,
            subsets: vec![Subset {
                addresses: vec![Address { ip: host.to_string() }],
                ports: vec![NamedPort {
                    name: spec.port_name.clone(),
                    port,
                }],
            }],
        }
    }

    /// Folds this record's instances into an endpoint map, keeping only
    /// addresses that expose the spec's named port.
    pub fn apply_to(&self, spec: &ServiceSpec, map: &mut EndpointMap) {
        for subset in &self.subsets {
            let port = find_port(&subset.ports, &spec.port_name);
            if port == 0 {
                continue;
            }
            for addr in &subset.addresses {
                let weight = self
                    .labels
                    .get(&weight_key(&addr.ip, port))
                    .and_then(|w| w.parse::<i32>().ok())
                    .unwrap_or(0);
                let endpoint = ServiceEndpoint {
                    host: addr.ip.clone(),
                    port,
                    weight,
                };
                map.insert(endpoint.to_string(), endpoint);
            }
        }
    }
}

/// Returns the port number matching the given port name, or 0 when the
/// record does not expose that name.
fn find_port(ports: &[NamedPort], port_name: &str) -> i32 {
    for named in ports {
        if named.name == port_name {
            return named.port;
        }
    }
    0
}
