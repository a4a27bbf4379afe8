pub mod circuit;
pub mod clock;
pub mod queue;
pub mod quota;
pub mod request;
pub mod retry;

pub use circuit::{CircuitBreakerState, CircuitPolicy, CircuitStatus, Permit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::{
	EnqueueOutcome, EscalationRecord, FailureOutcome, ItemState, QueueCounts, QueueItem,
};
pub use quota::QuotaWindow;
pub use request::{Priority, SearchQuery, SearchRequest};
pub use retry::{ErrorKind, ItemError, RetryDecision, RetryPolicy};
