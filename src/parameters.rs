//! Parameters for a mapreduce job.
//!

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::formats::Format;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MRParameters {
    pub reduce_tasks: usize,
    pub output_splits: usize,

    pub scratch_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,

    pub intermediate_format: Format,
    pub output_format: Format,

    pub sort_chunk_size: Option<usize>,
    pub threads: usize,
    pub keep_temp_files: bool,
}

impl Default for MRParameters {
    fn default() -> MRParameters {
        MRParameters::new()
    }
}

impl MRParameters {
    pub fn new() -> MRParameters {
        MRParameters {
            reduce_tasks: 2,
            output_splits: 1,
            scratch_dir: None,
            output_dir: None,
            intermediate_format: Format::WriteLog,
            output_format: Format::Text,
            sort_chunk_size: None,
            threads: 4,
            keep_temp_files: false,
        }
    }

    /// Number of tasks in every phase after the first one. (The first phase runs one task per
    /// input file.) This also determines how many splits the previous phase writes.
    ///
    /// Default 2
    pub fn set_reduce_tasks(mut self, n: usize) -> MRParameters {
        self.reduce_tasks = n;
        self
    }

    /// Number of splits each task of the last phase writes.
    ///
    /// Default 1
    pub fn set_output_splits(mut self, n: usize) -> MRParameters {
        self.output_splits = n;
        self
    }

    /// Directory for intermediate data. Should be on storage shared by all workers.
    /// Default: a temporary directory owned by the job.
    pub fn set_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> MRParameters {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Directory for the final output. Default: keep the output in memory.
    pub fn set_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> MRParameters {
        self.output_dir = Some(dir.into());
        self
    }

    /// Formats of intermediate and final output files. Text can't hold intermediate data of a
    /// multi-phase job, since it is read back as (line number, line).
    /// Default WriteLog/Text
    pub fn set_formats(mut self, intermediate: Format, output: Format) -> MRParameters {
        self.intermediate_format = intermediate;
        self.output_format = output;
        self
    }

    /// Reduce-side tasks sort their shard in memory unless a chunk size is set. With a chunk
    /// size, runs of that many records are sorted, spilled to the scratch directory and merged.
    pub fn set_sort_chunk_size(mut self, n: usize) -> MRParameters {
        self.sort_chunk_size = Some(n);
        self
    }

    /// Worker threads used by the parallel execution mode.
    ///
    /// Default 4
    pub fn set_threads(mut self, n: usize) -> MRParameters {
        self.threads = n;
        self
    }

    /// Keep intermediate files after the job instead of deleting them once they've been read.
    /// Default: false.
    pub fn set_keep_temp_files(mut self, keep: bool) -> MRParameters {
        self.keep_temp_files = keep;
        self
    }
}
