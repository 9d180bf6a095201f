//! Job descriptions in TOML.
//!
//! ```toml
//! mode = "mock-parallel"
//! inputs = ["a.txt", "b.txt"]
//!
//! [parameters]
//! reduce_tasks = 4
//!
//! [[phase]]
//! kind = "map"
//! mapper = "wc_map"
//!
//! [[phase]]
//! kind = "reduce"
//! reducer = "wc_reduce"
//! partition = "mod"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::controller::{ExecMode, Job};
use crate::error::{MRError, Result};
use crate::formats::Format;
use crate::operation::Operation;
use crate::parameters::MRParameters;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub kind: String,
    #[serde(default)]
    pub mapper: Option<String>,
    #[serde(default)]
    pub reducer: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
}

impl PhaseConfig {
    pub fn to_operation(&self) -> Result<Operation> {
        Operation::from_parts(
            &self.kind,
            self.mapper.as_deref(),
            self.reducer.as_deref(),
            self.partition.as_deref(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_job_id")]
    pub id: String,
    #[serde(default)]
    pub mode: ExecMode,
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default)]
    pub parameters: MRParameters,
    #[serde(default)]
    pub phase: Vec<PhaseConfig>,
}

fn default_job_id() -> String {
    String::from("job")
}

impl JobConfig {
    pub fn from_toml(s: &str) -> Result<JobConfig> {
        Ok(toml::from_str(s)?)
    }

    /// Reads a job description. Relative paths in it are taken relative to the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<JobConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config = JobConfig::from_toml(&content)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.inputs.iter_mut().for_each(resolve);
        if let Some(ref mut dir) = self.parameters.scratch_dir {
            resolve(dir);
        }
        if let Some(ref mut dir) = self.parameters.output_dir {
            resolve(dir);
        }
    }

    /// Builds the job. Every phase is checked for a known kind and the callable names that kind
    /// needs; whether the names are bound is checked when the job runs.
    pub fn to_job(&self) -> Result<Job> {
        if self.phase.is_empty() {
            return Err(MRError::config("job description has no [[phase]]"));
        }

        let mut job = Job::new(&self.id, self.parameters.clone());
        if let Some(ref name) = self.input_format {
            job = job.set_input_format(Format::from_name(name)?);
        }
        for input in self.inputs.iter() {
            job = job.add_input(input.clone());
        }
        for phase in self.phase.iter() {
            job = job.add_operation(phase.to_operation()?);
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    const WORD_COUNT: &str = r#"
id = "wc"
mode = "parallel"
inputs = ["a.txt", "/data/b.txt"]

[parameters]
reduce_tasks = 4
output_format = "wlg"

[[phase]]
kind = "map"
mapper = "wc_map"

[[phase]]
kind = "reducemap"
reducer = "wc_reduce"
mapper = "swap"
partition = "mod"
"#;

    #[test]
    fn test_parse() {
        let c = JobConfig::from_toml(WORD_COUNT).unwrap();
        assert_eq!(c.id, "wc");
        assert_eq!(c.mode, ExecMode::Parallel);
        assert_eq!(c.parameters.reduce_tasks, 4);
        assert_eq!(c.parameters.output_format, Format::WriteLog);
        // Unset parameters keep their defaults.
        assert_eq!(c.parameters.output_splits, 1);
        assert_eq!(c.parameters.threads, 4);

        let job = c.to_job().unwrap();
        assert_eq!(job.inputs().len(), 2);
        let ops = job.operations();
        assert_eq!(ops[0], Operation::map("wc_map"));
        assert_eq!(ops[1].kind(), OperationKind::ReduceMap);
        assert_eq!(ops[1].partition_name(), "mod");
    }

    #[test]
    fn test_defaults() {
        let c = JobConfig::from_toml("inputs = [\"x\"]\n[[phase]]\nkind = \"map\"\nmapper = \"m\"\n").unwrap();
        assert_eq!(c.id, "job");
        assert_eq!(c.mode, ExecMode::MockParallel);
        assert_eq!(c.parameters, MRParameters::new());
    }

    #[test]
    fn test_bad_descriptions() {
        let unknown = "inputs = [\"x\"]\n[[phase]]\nkind = \"shuffle\"\n";
        assert!(matches!(
            JobConfig::from_toml(unknown).unwrap().to_job(),
            Err(MRError::UnknownOperation(_))
        ));

        let missing = "inputs = [\"x\"]\n[[phase]]\nkind = \"reduce\"\nmapper = \"m\"\n";
        assert!(matches!(
            JobConfig::from_toml(missing).unwrap().to_job(),
            Err(MRError::Config(_))
        ));

        let no_phase = "inputs = [\"x\"]\n";
        assert!(JobConfig::from_toml(no_phase).unwrap().to_job().is_err());

        assert!(matches!(
            JobConfig::from_toml("inputs = 3"),
            Err(MRError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(&path, WORD_COUNT).unwrap();

        let c = JobConfig::from_file(&path).unwrap();
        assert_eq!(c.inputs[0], dir.path().join("a.txt"));
        assert_eq!(c.inputs[1], PathBuf::from("/data/b.txt"));
    }
}
