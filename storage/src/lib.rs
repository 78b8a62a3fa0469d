pub mod kv;
pub mod ledger;

pub use kv::{KvStore, MemoryKvStore};
pub use ledger::LedgerStore;
