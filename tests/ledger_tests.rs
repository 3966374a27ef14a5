//! Ledger behavior under contention: allocations stay unique and releases
//! never drive a counter negative, regardless of interleaving.

use std::collections::HashSet;
use std::sync::Arc;

use container_fleet_manager::ledger::{PortLedger, QuotaCounters, QuotaLedger};

#[test]
fn concurrent_port_allocations_are_unique() {
    let ledger = Arc::new(PortLedger::new());
    let mut handles = Vec::new();
    for i in 0..64 {
        let ledger = ledger.clone();
        handles.push(std::thread::spawn(move || {
            ledger.allocate("node-a", &format!("i-{i}")).unwrap()
        }));
    }

    let ports: HashSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ports.len(), 64);
    assert!(ports.iter().all(|p| (8000..=9999).contains(p)));
}

#[test]
fn ports_are_scoped_per_node() {
    let ledger = PortLedger::new();
    assert_eq!(ledger.allocate("node-a", "i-1").unwrap(), 8000);
    assert_eq!(ledger.allocate("node-b", "i-1").unwrap(), 8000);

    let usage = ledger.usage("node-a");
    assert_eq!(usage.allocated_count, 1);
    assert_eq!(usage.available_count, 1999);
    assert_eq!(usage.allocations.get("i-1"), Some(&8000));

    // Unregistered node reports a full range, not an error.
    assert_eq!(ledger.usage("node-missing").allocated_count, 0);
    assert_eq!(ledger.usage("node-missing").available_count, 2000);
}

#[test]
fn churn_reuses_gaps_in_ascending_order() {
    let ledger = PortLedger::new();
    for i in 0..5 {
        ledger.allocate("node-a", &format!("i-{i}")).unwrap();
    }
    assert_eq!(ledger.release("node-a", "i-1"), Some(8001));
    assert_eq!(ledger.release("node-a", "i-3"), Some(8003));

    // Freed gaps are handed out lowest-first before the range extends.
    assert_eq!(ledger.allocate("node-a", "i-5").unwrap(), 8001);
    assert_eq!(ledger.allocate("node-a", "i-6").unwrap(), 8003);
    assert_eq!(ledger.allocate("node-a", "i-7").unwrap(), 8005);
    assert_eq!(ledger.allocated_port("node-a", "i-1"), None);
    assert_eq!(ledger.usage("node-a").allocated_count, 6);
}

#[test]
fn quota_survives_concurrent_churn() {
    let ledger = Arc::new(QuotaLedger::new());
    ledger.register_user("alice");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let ledger = ledger.clone();
        handles.push(std::thread::spawn(move || {
            ledger.allocate("alice", 2, 4);
            ledger.release("alice", 2, 4);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.usage("alice").unwrap(), QuotaCounters::default());
}

#[test]
fn double_release_never_underflows() {
    let ledger = QuotaLedger::new();
    ledger.register_user("alice");
    assert!(ledger.allocate("alice", 2, 4));

    assert!(ledger.release("alice", 2, 4));
    assert!(ledger.release("alice", 2, 4));
    assert!(ledger.release("alice", 2, 4));

    let usage = ledger.usage("alice").unwrap();
    assert_eq!(usage.used_instances, 0);
    assert_eq!(usage.used_cpu, 0);
    assert_eq!(usage.used_memory, 0);
}
