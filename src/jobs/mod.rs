//! Invalidation jobs: their shape, how events become jobs, how recursive
//! jobs split, and how a job runs.
//!
//! A job runs in exactly one of three modes, chosen by its [`JobKind`]:
//! - a single page (or a list of revisions) is refreshed directly;
//! - a backlink scan is split into page batches plus a continuation;
//! - a page batch refreshes every listed page.

pub mod descriptor;
pub mod partition;
pub mod runner;
pub mod submit;
pub mod translate;

pub use descriptor::{
    BacklinkScan, DecodeError, Decoded, EncodeError, JobDescriptor, JobKind, JobParams, JobType,
    PageBatch, PageUpdate, RootJob,
};
pub use partition::{partition, PartitionLimits};
pub use runner::JobRunner;
pub use submit::submit;
pub use translate::jobs_for_event;
