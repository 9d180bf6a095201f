//! Tasks: the unit of work.
//!
//! A Task binds one Operation to one shard of its input grid and produces exactly one Dataset.
//! The `task_index` selects the input column the task consumes and is the source (row) of the
//! dataset it writes, so no two tasks of a phase can write the same grid coordinate.
//!
//! A task is single-shot: constructed -> running -> finished (or failed).

use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, OutputSpec, ShuffleGrid};
use crate::error::{MRError, Result};
use crate::mapreducer::Program;
use crate::operation::{Operation, OperationKind};
use crate::record_types::RecordStream;
use crate::sort::{InMemorySort, SortStrategy};

/// Task behaviour, selected once from the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Map the shard as it comes.
    Map,
    /// Sort the shard, then reduce it.
    Reduce,
    /// Sort the shard, reduce it and map the reduce output.
    ReduceMap,
}

impl TaskKind {
    pub fn for_operation(op: &Operation) -> TaskKind {
        match op.kind() {
            OperationKind::Map => TaskKind::Map,
            OperationKind::Reduce => TaskKind::Reduce,
            OperationKind::ReduceMap => TaskKind::ReduceMap,
        }
    }

    fn sorts_input(&self) -> bool {
        *self != TaskKind::Map
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Constructed,
    Running,
    Finished,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub records_in: usize,
    pub records_out: usize,
    pub elapsed_ms: i64,
}

pub struct Task {
    dataset_id: String,
    task_index: usize,
    kind: TaskKind,
    op: Operation,
    input: Arc<ShuffleGrid>,
    output_spec: OutputSpec,
    serial: bool,
    sorter: Arc<dyn SortStrategy>,

    state: TaskState,
    output: Option<Arc<Dataset>>,
    stats: TaskStats,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("dataset_id", &self.dataset_id)
            .field("task_index", &self.task_index)
            .field("kind", &self.kind)
            .field("op", &self.op)
            .field("input", &self.input.id())
            .field("output_spec", &self.output_spec)
            .field("serial", &self.serial)
            .field("state", &self.state)
            .finish()
    }
}

impl Task {
    /// Creates the task variant matching `op`.
    pub fn from_op(
        dataset_id: &str,
        task_index: usize,
        op: Operation,
        input: Arc<ShuffleGrid>,
        output_spec: OutputSpec,
    ) -> Task {
        Task {
            dataset_id: String::from(dataset_id),
            task_index,
            kind: TaskKind::for_operation(&op),
            op,
            input,
            output_spec,
            serial: false,
            sorter: Arc::new(InMemorySort),
            state: TaskState::Constructed,
            output: None,
            stats: TaskStats::default(),
        }
    }

    /// A serial task reads its whole input instead of column `task_index`.
    pub fn serial(mut self) -> Task {
        self.serial = true;
        self
    }

    pub fn with_sort_strategy(mut self, sorter: Arc<dyn SortStrategy>) -> Task {
        self.sorter = sorter;
        self
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn operation(&self) -> &Operation {
        &self.op
    }

    pub fn output_spec(&self) -> &OutputSpec {
        &self.output_spec
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    /// The finished output, if the task has run successfully.
    pub fn output(&self) -> Option<&Arc<Dataset>> {
        self.output.as_ref()
    }

    /// True if every input split this task depends on has been materialized.
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Constructed && self.input.is_complete()
    }

    /// Runs the task. May only be called once; the output dataset is returned and kept.
    pub fn run(&mut self, program: &Program) -> Result<Arc<Dataset>> {
        if self.state != TaskState::Constructed {
            return Err(MRError::AlreadyRun(self.task_index));
        }
        self.state = TaskState::Running;
        let started = OffsetDateTime::now_utc();
        info!(dataset = %self.dataset_id, task = self.task_index, op = %self.op, "task started");

        let result = self.execute(program);
        self.stats.elapsed_ms = (OffsetDateTime::now_utc() - started).whole_milliseconds() as i64;

        match result {
            Ok(ds) => {
                let ds = Arc::new(ds);
                self.stats.records_out = ds.len().unwrap_or(0);
                self.state = TaskState::Finished;
                self.output = Some(Arc::clone(&ds));
                info!(
                    dataset = %self.dataset_id,
                    task = self.task_index,
                    records_in = self.stats.records_in,
                    records_out = self.stats.records_out,
                    elapsed_ms = self.stats.elapsed_ms,
                    "task finished"
                );
                Ok(ds)
            }
            Err(e) => {
                self.state = TaskState::Failed;
                warn!(dataset = %self.dataset_id, task = self.task_index, error = %e, "task failed");
                Err(e)
            }
        }
    }

    fn execute(&mut self, program: &Program) -> Result<Dataset> {
        // Resolve every callable up front; a misconfigured task writes nothing.
        self.op.validate(program)?;
        let parter = self.op.partition_fn(program)?;

        // FETCH
        let shard = if self.serial {
            None
        } else {
            Some(self.task_index)
        };
        self.input.fetch(shard)?;
        let stream: RecordStream<'_> = match shard {
            None => self.input.data()?,
            Some(s) => self.input.split_data(s)?,
        };

        // SORT
        let input = if self.kind.sorts_input() {
            debug!(task = self.task_index, sorter = ?self.sorter, "sorting input shard");
            self.sorter.sort(stream)?
        } else {
            stream
        };

        // APPLY + MATERIALIZE
        let mut failure = None;
        let mut records_in = 0;
        let output = {
            let records = input.map_while(|r| match r {
                Ok(r) => {
                    records_in += 1;
                    Some(r)
                }
                Err(e) => {
                    failure = Some(e);
                    None
                }
            });
            let applied = self.op.apply(program, records)?;
            Dataset::materialize(
                &self.dataset_id,
                self.task_index,
                applied,
                &parter,
                &self.output_spec,
            )
        };
        self.stats.records_in = records_in;

        match failure {
            None => output,
            Some(e) => {
                // The input ended early; whatever was written is incomplete.
                if let Ok(ref partial) = output {
                    if let Err(rm) = partial.discard() {
                        warn!(task = self.task_index, error = %rm, "couldn't remove partial output");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Format;
    use crate::record_types::{MEmitter, MultiRecord, REmitter, Record};
    use crate::sort::ExternalSort;
    use std::fs;

    fn program() -> Program {
        Program::new()
            .with_mapper("words", |e: &mut MEmitter, r: Record| {
                for w in r.value.split_whitespace() {
                    e.emit(w, "1");
                }
            })
            .with_mapper("upper", |e: &mut MEmitter, r: Record| {
                e.emit(r.key, r.value.to_uppercase())
            })
            .with_reducer("count", |e: &mut REmitter, vs: MultiRecord<'_>| {
                e.emit(vs.count().to_string())
            })
    }

    fn memory_grid(records: Vec<Record>) -> Arc<ShuffleGrid> {
        Arc::new(ShuffleGrid::from_dataset(Dataset::from_records("in", 0, records)))
    }

    /// Per-split contents, ignoring the order within a split.
    fn split_contents(ds: &Dataset) -> Vec<Vec<Record>> {
        ds.buckets()
            .iter()
            .map(|b| {
                let mut v: Vec<Record> = b.read().unwrap().map(|r| r.unwrap()).collect();
                v.sort();
                v
            })
            .collect()
    }

    #[test]
    fn test_kind_dispatch() {
        assert_eq!(TaskKind::for_operation(&Operation::map("m")), TaskKind::Map);
        assert_eq!(TaskKind::for_operation(&Operation::reduce("r")), TaskKind::Reduce);
        assert_eq!(
            TaskKind::for_operation(&Operation::reduce_map("r", "m")),
            TaskKind::ReduceMap
        );
    }

    #[test]
    fn test_map_task_addressing() {
        let input = (0..20)
            .map(|i| Record::new(i.to_string(), format!("w{} w{}", i, i % 3)))
            .collect();
        let mut t = Task::from_op("map", 0, Operation::map("words"), memory_grid(input), OutputSpec::in_memory(4))
            .serial();
        let ds = t.run(&program()).unwrap();

        assert_eq!(t.state(), TaskState::Finished);
        assert_eq!(ds.splits(), 4);
        assert_eq!(ds.len(), Some(40));
        assert_eq!(t.stats().records_in, 20);
        assert_eq!(t.stats().records_out, 40);
    }

    #[test]
    fn test_task_index_is_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut grid = ShuffleGrid::new("prev", 1, 3);
        let recs = vec![Record::new("x", "a b c d e f g h")];
        let prev = Dataset::materialize(
            "prev",
            0,
            recs.into_iter(),
            &program().partition("default").unwrap(),
            &OutputSpec::in_memory(3),
        )
        .unwrap();
        grid.insert(Arc::new(prev)).unwrap();
        let col = (0..3).find(|&s| !grid.bucket(0, s).unwrap().is_empty()).unwrap();

        let spec = OutputSpec::stored(4, dir.path(), Format::WriteLog, false);
        let mut t = Task::from_op("m", col, Operation::map("words"), Arc::new(grid), spec);
        let ds = t.run(&program()).unwrap();

        assert_eq!(ds.source(), col);
        let addrs: Vec<(usize, usize)> = ds.buckets().iter().map(|b| (b.source(), b.split())).collect();
        assert_eq!(addrs, (0..4).map(|s| (col, s)).collect::<Vec<_>>());
        let listed: usize = ds.outurls().len();
        let non_empty = ds.buckets().iter().filter(|b| !b.is_empty()).count();
        assert_eq!(listed, non_empty);
    }

    #[test]
    fn test_reduce_task_sorts_shard() {
        let input = vec![
            Record::new("b", "1"),
            Record::new("a", "1"),
            Record::new("b", "1"),
            Record::new("c", "1"),
            Record::new("a", "1"),
            Record::new("b", "1"),
        ];
        let mut t = Task::from_op("r", 0, Operation::reduce("count"), memory_grid(input), OutputSpec::in_memory(1));
        let ds = t.run(&program()).unwrap();
        let out: Vec<Record> = ds.data().collect::<Result<_>>().unwrap();
        assert_eq!(
            out,
            vec![Record::new("a", "2"), Record::new("b", "3"), Record::new("c", "1")]
        );
    }

    #[test]
    fn test_external_sort_strategy() {
        let input: Vec<Record> = (0..50).map(|i| Record::new((i % 7).to_string(), "1")).collect();
        let sorter = Arc::new(ExternalSort::new(8, None).unwrap());
        let mut t = Task::from_op("r", 0, Operation::reduce("count"), memory_grid(input), OutputSpec::in_memory(1))
            .with_sort_strategy(sorter);
        let ds = t.run(&program()).unwrap();
        let out: Vec<Record> = ds.data().collect::<Result<_>>().unwrap();
        assert_eq!(out.len(), 7);
        assert_eq!(out[0], Record::new("0", "8"));
        assert_eq!(out[6], Record::new("6", "7"));
    }

    #[test]
    fn test_run_only_once() {
        let mut t = Task::from_op("m", 0, Operation::map("upper"), memory_grid(vec![]), OutputSpec::in_memory(1))
            .serial();
        t.run(&program()).unwrap();
        assert!(matches!(t.run(&program()), Err(MRError::AlreadyRun(0))));
        assert_eq!(t.state(), TaskState::Finished);
    }

    #[test]
    fn test_unknown_callable_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let spec = OutputSpec::stored(2, dir.path(), Format::WriteLog, true);
        let input = memory_grid(vec![Record::new("1", "a")]);
        let mut t = Task::from_op("m", 0, Operation::map("missing"), input, spec).serial();

        assert!(matches!(
            t.run(&program()),
            Err(MRError::UnknownCallable { kind: "mapper", .. })
        ));
        assert_eq!(t.state(), TaskState::Failed);
        assert!(t.output().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        let grid = ShuffleGrid::from_dataset(Dataset::from_files("in", &[path], None).unwrap());
        let mut t = Task::from_op("m", 0, Operation::map("words"), Arc::new(grid), OutputSpec::in_memory(1));
        assert!(matches!(
            t.run(&program()),
            Err(MRError::InputUnavailable { .. })
        ));
        assert_eq!(t.state(), TaskState::Failed);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = memory_grid(
            (0..30)
                .map(|i| Record::new(i.to_string(), format!("x{} y{}", i % 4, i % 5)))
                .collect(),
        );
        let spec = OutputSpec::stored(3, dir.path(), Format::WriteLog, false);

        let mut first = Task::from_op("m", 0, Operation::map("words"), Arc::clone(&input), spec.clone()).serial();
        let mut second = Task::from_op("m", 0, Operation::map("words"), input, spec).serial();
        let a = first.run(&program()).unwrap();
        let b = second.run(&program()).unwrap();

        assert_ne!(a.outurls(), b.outurls());
        assert_eq!(split_contents(&a), split_contents(&b));
    }
}
