pub mod core;

pub use crate::core::backends::{Backend, BackendDescriptor};
pub use crate::core::jobs::{JobDescription, JobError, TrackerOptions};
pub use crate::core::results::AsyncResult;
pub use crate::core::status::JobStatus;
pub use crate::core::{Clusterjob, ClusterjobError};
