pub mod ids;
pub mod outcome;
pub mod policy;
pub mod record;

pub use ids::{ExecutionId, RecordId};
pub use outcome::{ExecutionOutcome, FailureKind, TIMEOUT_MESSAGE};
pub use policy::{EnvPolicy, PolicyDecision, TermList};
pub use record::{HistoryRecord, NewRecord, Sender};
