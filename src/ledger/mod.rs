//! Resource ledger: atomic, reversible quota and port bookkeeping.
//!
//! Two independently keyed sub-ledgers. Same-key mutations are strictly
//! serialized (dashmap shard locks are held across each read-modify-write),
//! while different users and different nodes proceed in parallel.

mod ports;
mod quota;

pub use ports::{PortLedger, PortUsage, PORT_RANGE_END, PORT_RANGE_START};
pub use quota::{QuotaCounters, QuotaLedger};
