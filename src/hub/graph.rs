//! Caller→callee dependency graph, rebuilt on demand from the graph
//! markers in the store. Each marker records one observation of
//! "caller resolves callee" with the timestamp of its last refresh;
//! only the most recent observation generation per caller is kept.

use std::collections::HashMap;
use std::collections::HashSet;

use tracing::warn;

use crate::store::keys;
use crate::store::EndpointStore;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub caller: String,
    pub timestamp: i64,
}

/// One observed dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPair {
    pub callee: String,
    pub caller_info: CallerInfo,
}

/// Result of walking the graph downward from one service.
#[derive(Debug, Default)]
pub struct CallTrace {
    pub callees: Vec<String>,
    pub cycle_detected: bool,
}

#[derive(Debug, Default)]
pub struct ServiceGraph {
    /// Caller name to its outgoing edges, newest observation only.
    calling_map: HashMap<String, Vec<CallPair>>,
    /// Caller name to the timestamp of the retained observation.
    latest: HashMap<String, i64>,
}

impl ServiceGraph {
    /// Scans all graph markers and folds them into a graph. Markers
    /// with identical timestamps for one caller accumulate (one caller
    /// resolving several services refreshes all its markers in one
    /// pass); a strictly newer marker supersedes everything recorded
    /// for that caller so far.
    pub async fn rebuild(store: &dyn EndpointStore) -> Result<ServiceGraph> {
        let markers = store.scan_graph_markers().await?;
        let mut graph = ServiceGraph::default();
        for (key, timestamp) in markers {
            let Some((callee, caller)) = keys::parse_graph_key(&key) else {
                warn!("Malformed graph marker key {:?}, skipped", key);
                continue;
            };
            graph.record(callee, caller, timestamp);
        }
        Ok(graph)
    }

    fn record(&mut self, callee: String, caller: String, timestamp: i64) {
        match self.latest.get(&caller) {
            Some(&retained) if timestamp < retained => return,
            Some(&retained) if timestamp > retained => {
                self.calling_map.remove(&caller);
                self.latest.insert(caller.clone(), timestamp);
            }
            Some(_) => {}
            None => {
                self.latest.insert(caller.clone(), timestamp);
            }
        }
        self.calling_map.entry(caller.clone()).or_default().push(CallPair {
            callee,
            caller_info: CallerInfo { caller, timestamp },
        });
    }

    pub fn callers(&self) -> impl Iterator<Item = &str> {
        self.calling_map.keys().map(String::as_str)
    }

    pub fn call_pairs(&self, caller: &str) -> &[CallPair] {
        self.calling_map.get(caller).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Services that call others but are never called themselves, in
    /// sorted order.
    pub fn find_roots(&self) -> Vec<String> {
        let callees: HashSet<&str> = self
            .calling_map
            .values()
            .flatten()
            .map(|pair| pair.callee.as_str())
            .collect();

        let mut roots: Vec<String> = self
            .calling_map
            .keys()
            .filter(|caller| !callees.contains(caller.as_str()))
            .cloned()
            .collect();
        roots.sort();
        roots
    }

    /// Inverts the graph: callee name to the sorted list of its callers.
    pub fn called_map(&self) -> HashMap<String, Vec<String>> {
        let mut called: HashMap<String, Vec<String>> = HashMap::new();
        for (caller, pairs) in &self.calling_map {
            for pair in pairs {
                called.entry(pair.callee.clone()).or_default().push(caller.clone());
            }
        }
        for callers in called.values_mut() {
            callers.sort();
            callers.dedup();
        }
        called
    }

    /// Walks the dependency tree downward from `root`, collecting every
    /// transitive callee. A back edge on the current path stops that
    /// branch and flags the trace.
    pub fn trace_callees(&self, root: &str) -> CallTrace {
        let mut trace = CallTrace::default();
        let mut on_path = HashSet::new();
        self.visit(root, &mut on_path, &mut trace);
        trace
    }

    fn visit(&self, caller: &str, on_path: &mut HashSet<String>, trace: &mut CallTrace) {
        if on_path.contains(caller) {
            warn!("Cycle detected in service graph at {}", caller);
            trace.cycle_detected = true;
            return;
        }

        on_path.insert(caller.to_string());
        if let Some(pairs) = self.calling_map.get(caller) {
            for pair in pairs {
                if !trace.callees.contains(&pair.callee) {
                    trace.callees.push(pair.callee.clone());
                }
                self.visit(&pair.callee, on_path, trace);
            }
        }
        on_path.remove(caller);
    }
}
