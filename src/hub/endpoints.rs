//! The in-memory endpoint representation and the diff engine turning
//! two snapshots into an ordered add/remove batch.

use std::collections::HashMap;
use std::fmt;

use crate::proto::discovery::InstanceEndpoint;
use crate::proto::discovery::Operation;
use crate::proto::discovery::ServiceEndpoints;
use crate::proto::discovery::ServiceSpec;

/// One live instance of a service. A simplified, wire-independent
/// version of [`InstanceEndpoint`]; weight 0 means unweighted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: i32,
    pub weight: i32,
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The registry's canonical live-state representation of one service:
/// `host:port` string to endpoint. Keys unique, no ordering guarantee.
pub type EndpointMap = HashMap<String, ServiceEndpoint>;

/// The delivered unit. `id` comes from a process-wide strictly
/// increasing counter; consumers drop any update whose id is not
/// greater than the last one they applied per service spec.
#[derive(Debug, Clone)]
pub struct EndpointsUpdate {
    pub id: i64,
    pub endpoints: ServiceEndpoints,
}

/// Computes the add/remove batch that turns `last` into `now`: a Delete
/// entry per key only in `last`, an Add entry (with weight) per key
/// only in `now`, nothing for keys in both. Deletes come before adds,
/// each in sorted key order, so output is deterministic.
pub fn diff_endpoints(spec: &ServiceSpec, last: &EndpointMap, now: &EndpointMap) -> ServiceEndpoints {
    let mut inst_endpoints = Vec::new();

    let mut removed: Vec<&String> = last.keys().filter(|k| !now.contains_key(*k)).collect();
    removed.sort();
    for key in removed {
        let endpoint = &last[key];
        inst_endpoints.push(InstanceEndpoint {
            op: Operation::Delete as i32,
            host: endpoint.host.clone(),
            port: endpoint.port,
            weight: 0,
        });
    }

    let mut added: Vec<&String> = now.keys().filter(|k| !last.contains_key(*k)).collect();
    added.sort();
    for key in added {
        let endpoint = &now[key];
        inst_endpoints.push(InstanceEndpoint {
            op: Operation::Add as i32,
            host: endpoint.host.clone(),
            port: endpoint.port,
            weight: endpoint.weight,
        });
    }

    ServiceEndpoints {
        spec: Some(spec.clone()),
        inst_endpoints,
    }
}

/// The full-snapshot batch fanned out on every change: every current
/// endpoint as an Add, in sorted key order.
pub fn full_endpoints(spec: &ServiceSpec, map: &EndpointMap) -> ServiceEndpoints {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    let inst_endpoints = keys
        .into_iter()
        .map(|key| {
            let endpoint = &map[key];
            InstanceEndpoint {
                op: Operation::Add as i32,
                host: endpoint.host.clone(),
                port: endpoint.port,
                weight: endpoint.weight,
            }
        })
        .collect();

    ServiceEndpoints {
        spec: Some(spec.clone()),
        inst_endpoints,
    }
}

/// The dedup key for one spec within a connection. Structural equality
/// on the string form, like the wire type's.
pub fn spec_key(spec: &ServiceSpec) -> String {
    format!("{}.{}:{}", spec.namespace, spec.service_name, spec.port_name)
}

/// The metric label for one service.
pub fn spec_label(spec: &ServiceSpec) -> String {
    format!("{}.{}", spec.namespace, spec.service_name)
}
