use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::core::errors::{FleetError, FleetResult};

pub const PORT_RANGE_START: u16 = 8000;
pub const PORT_RANGE_END: u16 = 9999;

#[derive(Debug, Default)]
struct NodePorts {
    /// instance id -> allocated host port
    allocations: HashMap<String, u16>,
    /// Running high-water mark: first candidate for the next scan.
    next_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortUsage {
    pub node_id: String,
    pub allocated_count: usize,
    pub available_count: usize,
    pub allocations: HashMap<String, u16>,
}

/// Per-node port bookkeeping over [8000, 9999].
///
/// Allocation scans upward from a per-node mark; a release pulls the mark
/// back down to the freed port, so freed slots are reused first-fit before
/// the range grows toward the top.
#[derive(Default)]
pub struct PortLedger {
    nodes: DashMap<String, NodePorts>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, node_id: &str, instance_id: &str) -> FleetResult<u16> {
        let mut entry = self.nodes.entry(node_id.to_string()).or_default();
        if entry.next_port < PORT_RANGE_START {
            entry.next_port = PORT_RANGE_START;
        }

        let used: HashSet<u16> = entry.allocations.values().copied().collect();
        let mut port = entry.next_port;
        while port <= PORT_RANGE_END && used.contains(&port) {
            port += 1;
        }
        if port > PORT_RANGE_END {
            // High end exhausted: rescan for any freed gap.
            port = (PORT_RANGE_START..=PORT_RANGE_END)
                .find(|p| !used.contains(p))
                .ok_or_else(|| FleetError::PortExhausted {
                    node_id: node_id.to_string(),
                })?;
        }

        entry.allocations.insert(instance_id.to_string(), port);
        entry.next_port = port.saturating_add(1);
        debug!(node_id, instance_id, port, "port allocated");
        Ok(port)
    }

    /// Removes the instance's allocation, returning the freed port. Safe to
    /// call repeatedly; later calls return None.
    pub fn release(&self, node_id: &str, instance_id: &str) -> Option<u16> {
        let mut entry = self.nodes.get_mut(node_id)?;
        let port = entry.allocations.remove(instance_id);
        if let Some(port) = port {
            // Pull the scan mark back so the freed slot is the next
            // candidate.
            if port < entry.next_port {
                entry.next_port = port;
            }
            debug!(node_id, instance_id, port, "port released");
        }
        port
    }

    pub fn allocated_port(&self, node_id: &str, instance_id: &str) -> Option<u16> {
        self.nodes
            .get(node_id)?
            .allocations
            .get(instance_id)
            .copied()
    }

    pub fn usage(&self, node_id: &str) -> PortUsage {
        let range = (PORT_RANGE_END - PORT_RANGE_START + 1) as usize;
        match self.nodes.get(node_id) {
            Some(entry) => PortUsage {
                node_id: node_id.to_string(),
                allocated_count: entry.allocations.len(),
                available_count: range - entry.allocations.len(),
                allocations: entry.allocations.clone(),
            },
            None => PortUsage {
                node_id: node_id.to_string(),
                allocated_count: 0,
                available_count: range,
                allocations: HashMap::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocation_from_range_start() {
        let ledger = PortLedger::new();
        assert_eq!(ledger.allocate("node-a", "i-1").unwrap(), 8000);
        assert_eq!(ledger.allocate("node-a", "i-2").unwrap(), 8001);
        assert_eq!(ledger.allocate("node-a", "i-3").unwrap(), 8002);
        // Independent range per node.
        assert_eq!(ledger.allocate("node-b", "i-4").unwrap(), 8000);
    }

    #[test]
    fn freed_port_reused_before_range_extends() {
        let ledger = PortLedger::new();
        ledger.allocate("node-a", "i-1").unwrap();
        ledger.allocate("node-a", "i-2").unwrap();
        ledger.allocate("node-a", "i-3").unwrap();

        assert_eq!(ledger.release("node-a", "i-2"), Some(8001));
        assert_eq!(ledger.allocate("node-a", "i-4").unwrap(), 8001);
        // The slot above the reused gap is still taken; the scan climbs past
        // it.
        assert_eq!(ledger.allocate("node-a", "i-5").unwrap(), 8003);
    }

    #[test]
    fn release_is_idempotent() {
        let ledger = PortLedger::new();
        ledger.allocate("node-a", "i-1").unwrap();
        assert_eq!(ledger.release("node-a", "i-1"), Some(8000));
        assert_eq!(ledger.release("node-a", "i-1"), None);
        assert_eq!(ledger.release("node-missing", "i-1"), None);
    }

    #[test]
    fn exhaustion_wraps_then_errors() {
        let ledger = PortLedger::new();
        for i in 0..=(PORT_RANGE_END - PORT_RANGE_START) {
            ledger.allocate("node-a", &format!("i-{i}")).unwrap();
        }
        assert!(matches!(
            ledger.allocate("node-a", "i-overflow"),
            Err(FleetError::PortExhausted { .. })
        ));

        // Freeing one slot makes the next scan pick it up.
        ledger.release("node-a", "i-17");
        assert_eq!(ledger.allocate("node-a", "i-overflow").unwrap(), 8017);
    }
}
