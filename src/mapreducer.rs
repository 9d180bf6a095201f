//! The Program: named map, reduce and partition callables.
//!
//! Operations refer to callables only by name; a Program is bound once when a job starts and
//! the names are resolved against it when a task runs. The same Operation can therefore run
//! against different Program bindings.

use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hasher};
use std::sync::Arc;

use crate::error::{MRError, Result};
use crate::record_types::{MEmitter, MultiRecord, REmitter, Record};

/// Map() function type. The MEmitter argument is used to emit values from
/// the map() function.
pub type MapperF = Arc<dyn Fn(&mut MEmitter, Record) + Send + Sync>;
/// Reduce() function type. The REmitter argument is used to emit values
/// from the reduce() function.
pub type ReducerF = Arc<dyn Fn(&mut REmitter, MultiRecord<'_>) + Send + Sync>;
/// A function used to determine the split a key belongs in.
/// The first argument is the key, the second one the number of splits;
/// the return value must be in [0; n).
pub type PartitionF = Arc<dyn Fn(&str, usize) -> usize + Send + Sync>;

/// Name under which the hash partitioner is registered.
pub const DEFAULT_PARTITION: &str = "default";
/// Name under which the integer-modulo partitioner is registered.
pub const MOD_PARTITION: &str = "mod";

/// Default partition function: SipHash with fixed keys, modulo n.
///
/// `DefaultHasher::new()` is not randomly seeded, so every process running the same build
/// sends a key to the same split. (RandomState would break the shuffle.)
pub fn default_partition(key: &str, n: usize) -> usize {
    let mut h = DefaultHasher::new();
    h.write(key.as_bytes());
    (h.finish() % n as u64) as usize
}

/// Partitions integer keys by their value modulo n; other keys fall back to
/// `default_partition`.
pub fn mod_partition(key: &str, n: usize) -> usize {
    match key.trim().parse::<i64>() {
        Ok(k) => k.rem_euclid(n as i64) as usize,
        Err(_) => default_partition(key, n),
    }
}

/// A bundle of callables addressable by name.
#[derive(Clone)]
pub struct Program {
    mappers: HashMap<String, MapperF>,
    reducers: HashMap<String, ReducerF>,
    partitions: HashMap<String, PartitionF>,
}

impl Default for Program {
    fn default() -> Program {
        Program::new()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mappers: Vec<_> = self.mappers.keys().collect();
        let mut reducers: Vec<_> = self.reducers.keys().collect();
        let mut partitions: Vec<_> = self.partitions.keys().collect();
        mappers.sort();
        reducers.sort();
        partitions.sort();
        f.debug_struct("Program")
            .field("mappers", &mappers)
            .field("reducers", &reducers)
            .field("partitions", &partitions)
            .finish()
    }
}

impl Program {
    /// An empty program with the `default` and `mod` partition functions registered.
    pub fn new() -> Program {
        Program {
            mappers: HashMap::new(),
            reducers: HashMap::new(),
            partitions: HashMap::new(),
        }
        .with_partition(DEFAULT_PARTITION, default_partition)
        .with_partition(MOD_PARTITION, mod_partition)
    }

    pub fn with_mapper<F>(mut self, name: &str, f: F) -> Program
    where
        F: Fn(&mut MEmitter, Record) + Send + Sync + 'static,
    {
        self.mappers.insert(String::from(name), Arc::new(f));
        self
    }

    pub fn with_reducer<F>(mut self, name: &str, f: F) -> Program
    where
        F: Fn(&mut REmitter, MultiRecord<'_>) + Send + Sync + 'static,
    {
        self.reducers.insert(String::from(name), Arc::new(f));
        self
    }

    pub fn with_partition<F>(mut self, name: &str, f: F) -> Program
    where
        F: Fn(&str, usize) -> usize + Send + Sync + 'static,
    {
        self.partitions.insert(String::from(name), Arc::new(f));
        self
    }

    pub fn mapper(&self, name: &str) -> Result<MapperF> {
        self.mappers
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("mapper", name))
    }

    pub fn reducer(&self, name: &str) -> Result<ReducerF> {
        self.reducers
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("reducer", name))
    }

    pub fn partition(&self, name: &str) -> Result<PartitionF> {
        self.partitions
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("partition function", name))
    }
}

fn unknown(kind: &'static str, name: &str) -> MRError {
    MRError::UnknownCallable {
        kind,
        name: String::from(name),
    }
}
