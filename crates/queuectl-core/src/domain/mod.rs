//! Domain model (ids, job record, state machine, retry decisions).

pub mod decision;
pub mod ids;
pub mod job;
pub mod state;

pub use decision::Decision;
pub use ids::JobId;
pub use job::{JobRecord, JobRecordRepr};
pub use state::{JobState, ParseStateError};
