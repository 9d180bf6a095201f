//! Controls the execution of a job: a list of operations (phases) run over a set of input files.
//!
//! Every phase writes one ShuffleGrid. A phase's tasks are created once the grid of the
//! previous phase (or the job input) is complete, and become runnable at that point. The driver
//! loop picks runnable tasks, runs them, files their output in the phase's grid and repeats
//! until the last phase's grid is complete.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::channel;
use std::sync::Arc;

use scoped_threadpool::Pool;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, OutputSpec, ShuffleGrid};
use crate::error::{MRError, Result};
use crate::formats::Format;
use crate::mapreducer::Program;
use crate::operation::Operation;
use crate::parameters::MRParameters;
use crate::sort::{ExternalSort, InMemorySort, SortStrategy};
use crate::task::Task;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecMode {
    /// One in-memory task per phase.
    Serial,
    /// One task per input file in the first phase, `reduce_tasks` tasks in every later phase.
    /// Tasks run one after another.
    #[default]
    MockParallel,
    /// Same layout as MockParallel; all runnable tasks run concurrently on a thread pool.
    Parallel,
}

impl FromStr for ExecMode {
    type Err = MRError;
    fn from_str(s: &str) -> Result<ExecMode> {
        match s {
            "serial" => Ok(ExecMode::Serial),
            "mock-parallel" | "mock_parallel" => Ok(ExecMode::MockParallel),
            "parallel" => Ok(ExecMode::Parallel),
            other => Err(MRError::config(format!("unknown execution mode `{}`", other))),
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ExecMode::Serial => "serial",
            ExecMode::MockParallel => "mock-parallel",
            ExecMode::Parallel => "parallel",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    id: String,
    inputs: Vec<PathBuf>,
    input_format: Option<Format>,
    operations: Vec<Operation>,
    params: MRParameters,
}

/// One phase while the job is running.
struct Phase {
    index: usize,
    dataset_id: String,
    op: Operation,
    tasks: usize,
    output: OutputSpec,

    started: bool,
    running: Vec<Task>,
    grid: Option<ShuffleGrid>,
    finished: Option<Arc<ShuffleGrid>>,
}

impl Job {
    pub fn new(id: &str, params: MRParameters) -> Job {
        Job {
            id: String::from(id),
            inputs: Vec::new(),
            input_format: None,
            operations: Vec::new(),
            params,
        }
    }

    pub fn add_input<P: Into<PathBuf>>(mut self, path: P) -> Job {
        self.inputs.push(path.into());
        self
    }

    /// Forces the format of all input files; by default it is guessed from the extension.
    pub fn set_input_format(mut self, format: Format) -> Job {
        self.input_format = Some(format);
        self
    }

    /// Appends a phase.
    pub fn add_operation(mut self, op: Operation) -> Job {
        self.operations.push(op);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn params(&self) -> &MRParameters {
        &self.params
    }

    /// Checks the job against `program` without running anything.
    pub fn check(&self, program: &Program, mode: ExecMode) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(MRError::config("job has no input files"));
        }
        if self.operations.is_empty() {
            return Err(MRError::config("job has no phases"));
        }
        if self.params.reduce_tasks == 0 {
            return Err(MRError::config("reduce_tasks must be positive"));
        }
        if self.params.output_splits == 0 {
            return Err(MRError::config("output_splits must be positive"));
        }
        if mode == ExecMode::Parallel && self.params.threads == 0 {
            return Err(MRError::config("parallel mode needs at least one thread"));
        }
        if mode != ExecMode::Serial
            && self.operations.len() > 1
            && self.params.intermediate_format == Format::Text
        {
            // Text is read back as (line number, line), which would rekey the next phase.
            return Err(MRError::config(
                "intermediate data can't be stored as text; use the wlg format",
            ));
        }
        for op in self.operations.iter() {
            op.validate(program)?;
        }
        Ok(())
    }

    /// Runs the job and returns the grid written by the last phase.
    pub fn run(&self, program: &Program, mode: ExecMode) -> Result<Arc<ShuffleGrid>> {
        self.check(program, mode)?;
        info!(job = %self.id, %mode, phases = self.operations.len(), inputs = self.inputs.len(), "job started");

        // Owns the scratch directory unless the caller gave one.
        let mut scratch_guard: Option<TempDir> = None;
        let scratch = match (mode, self.params.scratch_dir.as_ref()) {
            (ExecMode::Serial, dir) => dir.cloned(),
            (_, Some(dir)) => Some(dir.clone()),
            (_, None) => {
                let dir = tempfile::Builder::new()
                    .prefix(&format!("gridmr_{}_", self.id))
                    .tempdir()?;
                let path = dir.path().to_path_buf();
                scratch_guard = Some(dir);
                Some(path)
            }
        };

        let sorter: Arc<dyn SortStrategy> = match self.params.sort_chunk_size {
            Some(n) => Arc::new(ExternalSort::new(n, scratch.clone())?),
            None => Arc::new(InMemorySort),
        };

        let input = Dataset::from_files(&format!("{}_input", self.id), &self.inputs, self.input_format)?;
        let input = Arc::new(ShuffleGrid::from_dataset(input));
        let mut phases = self.plan(mode, scratch.as_ref());

        let result = match mode {
            ExecMode::Parallel => {
                let mut pool = Pool::new(self.params.threads as u32);
                self.drive(&input, &mut phases, &sorter, mode, |phases| {
                    run_wave(&mut pool, program, phases)
                })
            }
            _ => self.drive(&input, &mut phases, &sorter, mode, |phases| {
                run_next(program, phases)
            }),
        };
        if result.is_err() {
            self.abandon(&phases);
        }

        if let Some(dir) = scratch_guard {
            if self.params.keep_temp_files {
                let path = dir.keep();
                info!(dir = %path.display(), "keeping scratch directory");
            } else if let Err(e) = dir.close() {
                warn!(error = %e, "couldn't remove scratch directory");
            }
        }

        let output = result?;
        info!(job = %self.id, records = ?total_records(&output), "job finished");
        Ok(output)
    }

    /// Task counts and output locations of every phase.
    fn plan(&self, mode: ExecMode, scratch: Option<&PathBuf>) -> Vec<Phase> {
        let serial = mode == ExecMode::Serial;
        let n = self.operations.len();
        let tasks_in = |i: usize| {
            if serial {
                1
            } else if i == 0 {
                self.inputs.len()
            } else {
                self.params.reduce_tasks
            }
        };

        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let dataset_id = format!("{}_{}_{}", self.id, i, op.id());
                let last = i + 1 == n;
                let splits = match (serial, last) {
                    (true, _) => 1,
                    (false, true) => self.params.output_splits,
                    (false, false) => tasks_in(i + 1),
                };

                let output = if last {
                    match self.params.output_dir {
                        Some(ref dir) => {
                            OutputSpec::stored(splits, dir.clone(), self.params.output_format, true)
                        }
                        None => OutputSpec::in_memory(splits),
                    }
                } else {
                    match scratch {
                        Some(dir) if !serial => OutputSpec::stored(
                            splits,
                            dir.join(&dataset_id),
                            self.params.intermediate_format,
                            false,
                        ),
                        _ => OutputSpec::in_memory(splits),
                    }
                };

                Phase {
                    index: i,
                    dataset_id,
                    op: op.clone(),
                    tasks: tasks_in(i),
                    output,
                    started: false,
                    running: Vec::new(),
                    grid: None,
                    finished: None,
                }
            })
            .collect()
    }

    /// The scheduling loop. `step` runs some of the runnable tasks and reports their results.
    fn drive<F>(
        &self,
        input: &Arc<ShuffleGrid>,
        phases: &mut [Phase],
        sorter: &Arc<dyn SortStrategy>,
        mode: ExecMode,
        mut step: F,
    ) -> Result<Arc<ShuffleGrid>>
    where
        F: FnMut(&mut [Phase]) -> Vec<TaskResult>,
    {
        loop {
            self.schedule(input, phases, sorter, mode);

            if let Some(out) = phases.last().and_then(|p| p.finished.as_ref()) {
                return Ok(Arc::clone(out));
            }

            let results = step(phases);
            if results.is_empty() {
                // Can't happen as long as every phase's grid is filled by its own tasks.
                return Err(MRError::config("no runnable task left but the job isn't done"));
            }
            for r in results {
                self.complete(phases, r)?;
            }
        }
    }

    /// Removes what a failed job wrote: every dataset of an unfinished phase, permanent or not,
    /// and the intermediate grids of finished phases.
    fn abandon(&self, phases: &[Phase]) {
        for phase in phases.iter() {
            for ds in phase.running.iter().filter_map(|t| t.output()) {
                if let Err(e) = ds.discard() {
                    warn!(dataset = ds.id(), source = ds.source(), error = %e, "couldn't remove output of failed job");
                }
            }
            if self.params.keep_temp_files {
                continue;
            }
            if let Some(ref grid) = phase.finished {
                if let Err(e) = grid.delete() {
                    warn!(grid = grid.id(), error = %e, "couldn't delete intermediate data");
                }
            }
        }
    }

    /// Creates the tasks of every phase whose input has become available.
    fn schedule(
        &self,
        input: &Arc<ShuffleGrid>,
        phases: &mut [Phase],
        sorter: &Arc<dyn SortStrategy>,
        mode: ExecMode,
    ) {
        for i in 0..phases.len() {
            if phases[i].started {
                continue;
            }
            let grid = if i == 0 {
                Arc::clone(input)
            } else {
                match phases[i - 1].finished {
                    Some(ref g) => Arc::clone(g),
                    None => continue,
                }
            };

            let phase = &mut phases[i];
            debug!(phase = phase.index, op = %phase.op, tasks = phase.tasks, input = grid.id(), "scheduling phase");
            phase.running = (0..phase.tasks)
                .map(|t| {
                    let task = Task::from_op(
                        &phase.dataset_id,
                        t,
                        phase.op.clone(),
                        Arc::clone(&grid),
                        phase.output.clone(),
                    )
                    .with_sort_strategy(Arc::clone(sorter));
                    if mode == ExecMode::Serial {
                        task.serial()
                    } else {
                        task
                    }
                })
                .collect();
            phase.grid = Some(ShuffleGrid::new(&phase.dataset_id, phase.tasks, phase.output.splits));
            phase.started = true;
        }
    }

    /// Files a task's output; freezes the phase's grid once every task has reported.
    fn complete(&self, phases: &mut [Phase], (p, t, result): TaskResult) -> Result<()> {
        let ds = result.map_err(|e| MRError::TaskFailed {
            phase: p,
            task: t,
            source: Box::new(e),
        })?;

        let phase = &mut phases[p];
        let grid = phase
            .grid
            .as_mut()
            .ok_or_else(|| MRError::config(format!("phase {} got output before it started", p)))?;
        grid.insert(ds)?;
        if !grid.is_complete() {
            return Ok(());
        }

        let grid = phase.grid.take().map(Arc::new);
        let stats: (usize, usize) = phase.running.iter().fold((0, 0), |acc, t| {
            (acc.0 + t.stats().records_in, acc.1 + t.stats().records_out)
        });
        phase.running.clear();
        phase.finished = grid;
        info!(
            phase = p,
            op = %phase.op,
            tasks = phase.tasks,
            records_in = stats.0,
            records_out = stats.1,
            "phase finished"
        );

        if p > 0 && !self.params.keep_temp_files {
            if let Some(ref consumed) = phases[p - 1].finished {
                debug!(grid = consumed.id(), "deleting consumed intermediate data");
                if let Err(e) = consumed.delete() {
                    warn!(grid = consumed.id(), error = %e, "couldn't delete intermediate data");
                }
            }
        }
        Ok(())
    }
}

/// (phase, task, output) of a task that has run.
type TaskResult = (usize, usize, Result<Arc<Dataset>>);

/// Runs the first runnable task.
fn run_next(program: &Program, phases: &mut [Phase]) -> Vec<TaskResult> {
    for phase in phases.iter_mut() {
        let p = phase.index;
        if let Some(task) = phase.running.iter_mut().find(|t| t.is_runnable()) {
            return vec![(p, task.task_index(), task.run(program))];
        }
    }
    Vec::new()
}

/// Runs every runnable task on the pool and waits for all of them.
fn run_wave(pool: &mut Pool, program: &Program, phases: &mut [Phase]) -> Vec<TaskResult> {
    let (send, recv) = channel();

    pool.scoped(|scope| {
        for phase in phases.iter_mut() {
            let p = phase.index;
            for task in phase.running.iter_mut().filter(|t| t.is_runnable()) {
                let done = send.clone();
                scope.execute(move || {
                    let i = task.task_index();
                    let _ = done.send((p, i, task.run(program)));
                });
            }
        }
    });
    drop(send);

    let mut results: Vec<TaskResult> = recv.iter().collect();
    results.sort_by_key(|r| (r.0, r.1));
    results
}

fn total_records(grid: &ShuffleGrid) -> Option<usize> {
    (0..grid.sources())
        .map(|s| grid.dataset(s).and_then(|ds| ds.len()))
        .sum()
}
