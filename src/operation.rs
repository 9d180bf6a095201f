//! Operations: stateless descriptions of one MapReduce phase.
//!
//! An Operation names the callables it needs; it never holds them. The names are resolved
//! against a `Program` every time the operation is applied, and all of them are resolved before
//! any record is processed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MRError, Result};
use crate::map::MapOutput;
use crate::mapreducer::{PartitionF, Program, DEFAULT_PARTITION};
use crate::record_types::Record;
use crate::reduce::ReduceOutput;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Map,
    Reduce,
    #[serde(alias = "reduce_map")]
    ReduceMap,
}

impl FromStr for OperationKind {
    type Err = MRError;
    fn from_str(s: &str) -> Result<OperationKind> {
        match s {
            "map" => Ok(OperationKind::Map),
            "reduce" => Ok(OperationKind::Reduce),
            "reducemap" | "reduce_map" => Ok(OperationKind::ReduceMap),
            other => Err(MRError::UnknownOperation(String::from(other))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            OperationKind::Map => "map",
            OperationKind::Reduce => "reduce",
            OperationKind::ReduceMap => "reducemap",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Map {
        mapper: String,
        partition: String,
    },
    Reduce {
        reducer: String,
        partition: String,
    },
    /// Reduce, then map the reduce output without materializing it in between.
    ReduceMap {
        reducer: String,
        mapper: String,
        partition: String,
    },
}

impl Operation {
    pub fn map(mapper: &str) -> Operation {
        Operation::Map {
            mapper: String::from(mapper),
            partition: String::from(DEFAULT_PARTITION),
        }
    }

    pub fn reduce(reducer: &str) -> Operation {
        Operation::Reduce {
            reducer: String::from(reducer),
            partition: String::from(DEFAULT_PARTITION),
        }
    }

    pub fn reduce_map(reducer: &str, mapper: &str) -> Operation {
        Operation::ReduceMap {
            reducer: String::from(reducer),
            mapper: String::from(mapper),
            partition: String::from(DEFAULT_PARTITION),
        }
    }

    /// Builds an operation from a kind name and optional callable names, as found in job
    /// descriptions. The partition function defaults to `default`.
    pub fn from_parts(
        kind: &str,
        mapper: Option<&str>,
        reducer: Option<&str>,
        partition: Option<&str>,
    ) -> Result<Operation> {
        let kind: OperationKind = kind.parse()?;
        let need = |name: Option<&str>, what: &str| {
            name.map(String::from).ok_or_else(|| {
                MRError::config(format!("{} operation needs a {} name", kind, what))
            })
        };
        let op = match kind {
            OperationKind::Map => Operation::Map {
                mapper: need(mapper, "mapper")?,
                partition: String::new(),
            },
            OperationKind::Reduce => Operation::Reduce {
                reducer: need(reducer, "reducer")?,
                partition: String::new(),
            },
            OperationKind::ReduceMap => Operation::ReduceMap {
                reducer: need(reducer, "reducer")?,
                mapper: need(mapper, "mapper")?,
                partition: String::new(),
            },
        };
        Ok(op.with_partition(partition.unwrap_or(DEFAULT_PARTITION)))
    }

    /// Replaces the name of the partition function.
    pub fn with_partition(mut self, name: &str) -> Operation {
        match self {
            Operation::Map {
                ref mut partition, ..
            }
            | Operation::Reduce {
                ref mut partition, ..
            }
            | Operation::ReduceMap {
                ref mut partition, ..
            } => *partition = String::from(name),
        }
        self
    }

    pub fn kind(&self) -> OperationKind {
        match *self {
            Operation::Map { .. } => OperationKind::Map,
            Operation::Reduce { .. } => OperationKind::Reduce,
            Operation::ReduceMap { .. } => OperationKind::ReduceMap,
        }
    }

    /// A readable identifier built from the callable names.
    pub fn id(&self) -> String {
        match *self {
            Operation::Map { ref mapper, .. } => mapper.clone(),
            Operation::Reduce { ref reducer, .. } => reducer.clone(),
            Operation::ReduceMap {
                ref reducer,
                ref mapper,
                ..
            } => format!("{}_{}", reducer, mapper),
        }
    }

    pub fn partition_name(&self) -> &str {
        match *self {
            Operation::Map { ref partition, .. }
            | Operation::Reduce { ref partition, .. }
            | Operation::ReduceMap { ref partition, .. } => partition,
        }
    }

    /// Whether the input has to be sorted by key before apply().
    pub fn needs_sorted_input(&self) -> bool {
        self.kind() != OperationKind::Map
    }

    /// Resolves the partition function against `program`.
    pub fn partition_fn(&self, program: &Program) -> Result<PartitionF> {
        program.partition(self.partition_name())
    }

    /// Checks that every callable this operation names is bound in `program`.
    pub fn validate(&self, program: &Program) -> Result<()> {
        match *self {
            Operation::Map { ref mapper, .. } => program.mapper(mapper).map(|_| ())?,
            Operation::Reduce { ref reducer, .. } => program.reducer(reducer).map(|_| ())?,
            Operation::ReduceMap {
                ref reducer,
                ref mapper,
                ..
            } => {
                program.reducer(reducer)?;
                program.mapper(mapper)?;
            }
        }
        self.partition_fn(program).map(|_| ())
    }

    /// Applies the operation to `input` lazily. For Reduce and ReduceMap, `input` must be sorted
    /// by key; this is not checked.
    pub fn apply<'a, I>(
        &self,
        program: &Program,
        input: I,
    ) -> Result<Box<dyn Iterator<Item = Record> + 'a>>
    where
        I: Iterator<Item = Record> + 'a,
    {
        Ok(match *self {
            Operation::Map { ref mapper, .. } => {
                Box::new(MapOutput::new(program.mapper(mapper)?, input))
            }
            Operation::Reduce { ref reducer, .. } => {
                Box::new(ReduceOutput::new(program.reducer(reducer)?, input))
            }
            Operation::ReduceMap {
                ref reducer,
                ref mapper,
                ..
            } => {
                let reducer = program.reducer(reducer)?;
                let mapper = program.mapper(mapper)?;
                Box::new(MapOutput::new(mapper, ReduceOutput::new(reducer, input)))
            }
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.id())
    }
}
