pub mod breaker;
pub mod db;
pub mod escalation;
pub mod memory;
pub mod models;
pub mod queue;
pub mod quota;
pub mod schema;
pub mod store;

mod error;

pub use error::Error;
pub use memory::MemoryStore;
pub use store::{BoxFuture, CircuitStore, EscalationStore, QueueStore, QuotaStore, Store};

pub type Result<T, E = Error> = std::result::Result<T, E>;
