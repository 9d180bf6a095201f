//! Implements a mapreduce engine bounded to one machine or a shared file system.
//!
//! A job is a list of operations (map, reduce, or reduce followed by map). Every operation runs
//! as a set of tasks; task `i` of a phase reads column `i` of the previous phase's shuffle grid
//! and writes row `i` of its own, partitioning its output by key. Reduce tasks sort their shard
//! and hand each run of equal keys to the reducer.
//!

pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod formats;
pub mod map;
pub mod mapreducer;
pub mod operation;
pub mod parameters;
pub mod record_types;
pub mod reduce;
pub mod shard_merge;
pub mod sort;
pub mod task;

pub use controller::{ExecMode, Job};
pub use dataset::{Dataset, OutputSpec, ShuffleGrid};
pub use error::{MRError, Result};
pub use mapreducer::Program;
pub use operation::Operation;
pub use parameters::MRParameters;
pub use record_types::{MEmitter, MultiRecord, REmitter, Record};
