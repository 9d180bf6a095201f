//! Datasets: partitioned, addressable collections of records.
//!
//! A `Dataset` is the output of exactly one task (or the job input): `splits` buckets, all
//! tagged with the producing task's index as `source`. Every task of a phase contributes one
//! row to that phase's `ShuffleGrid`; the task of the next phase with index j reads column j.
//! Datasets are written once and never modified afterwards, so they are shared as
//! `Arc<Dataset>` between the driver and any number of readers.

use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{MRError, Result};
use crate::formats::Format;
use crate::mapreducer::PartitionF;
use crate::record_types::{Record, RecordStream};

/// Where and how a task writes its output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    pub splits: usize,
    /// None keeps the output in memory.
    pub storage: Option<PathBuf>,
    pub format: Format,
    /// Permanent outputs survive the job; others are scratch data.
    pub permanent: bool,
}

impl OutputSpec {
    pub fn in_memory(splits: usize) -> OutputSpec {
        OutputSpec {
            splits,
            storage: None,
            format: Format::default(),
            permanent: true,
        }
    }

    pub fn stored<P: Into<PathBuf>>(splits: usize, dir: P, format: Format, permanent: bool) -> OutputSpec {
        OutputSpec {
            splits,
            storage: Some(dir.into()),
            format,
            permanent,
        }
    }
}

#[derive(Debug)]
enum Contents {
    Memory(Vec<Record>),
    Stored {
        path: PathBuf,
        format: Format,
        /// Unknown for job input files.
        records: Option<usize>,
    },
}

/// One split of a dataset, addressed by (source, split).
#[derive(Debug)]
pub struct Bucket {
    source: usize,
    split: usize,
    contents: Contents,
}

impl Bucket {
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn split(&self) -> usize {
        self.split
    }

    /// The file backing this bucket. Empty and in-memory buckets have none.
    pub fn url(&self) -> Option<&Path> {
        match self.contents {
            Contents::Stored { ref path, .. } => Some(path),
            Contents::Memory(_) => None,
        }
    }

    /// Number of records, if known without reading the file.
    pub fn len(&self) -> Option<usize> {
        match self.contents {
            Contents::Memory(ref v) => Some(v.len()),
            Contents::Stored { records, .. } => records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    fn unavailable(&self, reason: String) -> MRError {
        MRError::InputUnavailable {
            row: self.source,
            split: self.split,
            reason,
        }
    }

    fn check_available(&self) -> Result<()> {
        match self.contents {
            Contents::Stored { ref path, .. } if !path.is_file() => {
                Err(self.unavailable(format!("{} does not exist", path.display())))
            }
            _ => Ok(()),
        }
    }

    /// Reads the records of this bucket in storage order.
    pub fn read(&self) -> Result<RecordStream<'_>> {
        match self.contents {
            Contents::Memory(ref v) => Ok(Box::new(v.iter().cloned().map(Ok))),
            Contents::Stored {
                ref path, format, ..
            } => match format.open_reader(path) {
                Err(MRError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {
                    Err(self.unavailable(format!("{} does not exist", path.display())))
                }
                r => r,
            },
        }
    }
}

/// Chains the given buckets; a bucket that can't be opened yields its error in place.
fn chain_buckets<'a, I: Iterator<Item = &'a Bucket> + Send + 'a>(buckets: I) -> RecordStream<'a> {
    Box::new(buckets.flat_map(|b| match b.read() {
        Ok(s) => s,
        Err(e) => Box::new(iter::once(Err(e))) as RecordStream<'a>,
    }))
}

#[derive(Debug)]
pub struct Dataset {
    id: String,
    source: usize,
    splits: usize,
    storage: Option<PathBuf>,
    /// Directory created by this dataset; removed by delete().
    dir: Option<PathBuf>,
    format: Format,
    permanent: bool,
    buckets: Vec<Bucket>,
}

impl Dataset {
    /// Partitions `records` into `spec.splits` buckets and persists the non-empty ones if
    /// `spec.storage` is set. The output goes to a fresh directory below the storage location,
    /// so materializing twice never overwrites an earlier result.
    pub fn materialize<I: Iterator<Item = Record>>(
        id: &str,
        source: usize,
        records: I,
        parter: &PartitionF,
        spec: &OutputSpec,
    ) -> Result<Dataset> {
        let splits = spec.splits;
        if splits == 0 {
            return Err(MRError::config("a dataset needs at least one split"));
        }

        let mut parts: Vec<Vec<Record>> = (0..splits).map(|_| Vec::new()).collect();
        for r in records {
            let split = if splits == 1 { 0 } else { parter(&r.key, splits) };
            if split >= splits {
                return Err(MRError::PartitionOutOfRange {
                    key: r.key,
                    got: split,
                    splits,
                });
            }
            parts[split].push(r);
        }

        let mut ds = Dataset {
            id: String::from(id),
            source,
            splits,
            storage: spec.storage.clone(),
            dir: None,
            format: spec.format,
            permanent: spec.permanent,
            buckets: Vec::with_capacity(splits),
        };

        let storage = match spec.storage {
            None => {
                ds.buckets = parts
                    .into_iter()
                    .enumerate()
                    .map(|(split, v)| Bucket {
                        source,
                        split,
                        contents: Contents::Memory(v),
                    })
                    .collect();
                return Ok(ds);
            }
            Some(ref storage) => storage,
        };

        fs::create_dir_all(storage)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("source_{}_", source))
            .tempdir_in(storage)?
            .keep();
        ds.dir = Some(dir.clone());

        match ds.persist(&dir, parts) {
            Ok(()) => Ok(ds),
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %rm, "couldn't remove partial output");
                }
                Err(e)
            }
        }
    }

    fn persist(&mut self, dir: &Path, parts: Vec<Vec<Record>>) -> Result<()> {
        for (split, part) in parts.into_iter().enumerate() {
            let source = self.source;
            if part.is_empty() {
                self.buckets.push(Bucket {
                    source,
                    split,
                    contents: Contents::Memory(part),
                });
                continue;
            }

            let path = dir.join(format!("split_{}.{}", split, self.format.name()));
            let mut w = self.format.open_writer(&path)?;
            for r in part.iter() {
                w.write_record(r)?;
            }
            w.finish()?;
            debug!(dataset = %self.id, source, split, records = part.len(), path = %path.display(), "wrote split");

            self.buckets.push(Bucket {
                source,
                split,
                contents: Contents::Stored {
                    path,
                    format: self.format,
                    records: Some(part.len()),
                },
            });
        }
        Ok(())
    }

    /// Keeps `records` in memory as a single split.
    pub fn from_records(id: &str, source: usize, records: Vec<Record>) -> Dataset {
        Dataset {
            id: String::from(id),
            source,
            splits: 1,
            storage: None,
            dir: None,
            format: Format::default(),
            permanent: true,
            buckets: vec![Bucket {
                source,
                split: 0,
                contents: Contents::Memory(records),
            }],
        }
    }

    /// Job input: one split per file, source 0. The format is guessed from each file's
    /// extension unless given.
    pub fn from_files(id: &str, paths: &[PathBuf], format: Option<Format>) -> Result<Dataset> {
        if paths.is_empty() {
            return Err(MRError::config("no input files"));
        }
        let buckets = paths
            .iter()
            .enumerate()
            .map(|(split, p)| Bucket {
                source: 0,
                split,
                contents: Contents::Stored {
                    path: p.clone(),
                    format: format.unwrap_or_else(|| Format::for_path(p)),
                    records: None,
                },
            })
            .collect();

        Ok(Dataset {
            id: String::from(id),
            source: 0,
            splits: paths.len(),
            storage: None,
            dir: None,
            format: format.unwrap_or(Format::Text),
            permanent: true,
            buckets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn splits(&self) -> usize {
        self.splits
    }

    pub fn storage(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn permanent(&self) -> bool {
        self.permanent
    }

    pub fn bucket(&self, split: usize) -> Option<&Bucket> {
        self.buckets.get(split)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// All buckets holding at least one record (or of unknown size).
    pub fn non_empty(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter().filter(|b| !b.is_empty())
    }

    /// (split, path) of every non-empty persisted split.
    pub fn outurls(&self) -> Vec<(usize, PathBuf)> {
        self.non_empty()
            .filter_map(|b| b.url().map(|u| (b.split, u.to_path_buf())))
            .collect()
    }

    /// Total number of records, if known.
    pub fn len(&self) -> Option<usize> {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Makes sure the given split (or all of them) can be read.
    pub fn fetch(&self, split: Option<usize>) -> Result<()> {
        match split {
            Some(s) => self
                .bucket(s)
                .ok_or_else(|| MRError::InputUnavailable {
                    row: self.source,
                    split: s,
                    reason: format!("dataset {} has only {} splits", self.id, self.splits),
                })?
                .check_available(),
            None => self.buckets.iter().try_for_each(|b| b.check_available()),
        }
    }

    pub fn split_data(&self, split: usize) -> Result<RecordStream<'_>> {
        match self.bucket(split) {
            Some(b) => b.read(),
            None => Err(MRError::InputUnavailable {
                row: self.source,
                split,
                reason: format!("dataset {} has only {} splits", self.id, self.splits),
            }),
        }
    }

    /// All records, split by split.
    pub fn data(&self) -> RecordStream<'_> {
        chain_buckets(self.buckets.iter())
    }

    /// Removes the output directory of a non-permanent dataset.
    pub fn delete(&self) -> Result<()> {
        if self.permanent {
            return Ok(());
        }
        self.discard()
    }

    /// Removes the output directory whether or not the dataset is permanent. Used when the
    /// task that wrote it failed.
    pub(crate) fn discard(&self) -> Result<()> {
        if let Some(ref dir) = self.dir {
            debug!(dataset = %self.id, source = self.source, dir = %dir.display(), "deleting output");
            match fs::remove_dir_all(dir) {
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => (),
                r => r?,
            }
        }
        Ok(())
    }
}

/// The (source, split) matrix of all datasets produced by one phase.
#[derive(Debug)]
pub struct ShuffleGrid {
    id: String,
    splits: usize,
    rows: Vec<Option<Arc<Dataset>>>,
}

impl ShuffleGrid {
    pub fn new(id: &str, sources: usize, splits: usize) -> ShuffleGrid {
        ShuffleGrid {
            id: String::from(id),
            splits,
            rows: (0..sources).map(|_| None).collect(),
        }
    }

    /// A grid consisting of a single dataset, e.g. the job input.
    pub fn from_dataset(ds: Dataset) -> ShuffleGrid {
        let mut rows: Vec<Option<Arc<Dataset>>> = (0..ds.source()).map(|_| None).collect();
        let id = String::from(ds.id());
        let splits = ds.splits();
        rows.push(Some(Arc::new(ds)));
        ShuffleGrid { id, splits, rows }
    }

    /// Registers the output of task `ds.source()`. Every row can be written exactly once.
    pub fn insert(&mut self, ds: Arc<Dataset>) -> Result<()> {
        let row = ds.source();
        if ds.splits() != self.splits {
            return Err(MRError::config(format!(
                "grid {} has {} splits, dataset {} has {}",
                self.id,
                self.splits,
                ds.id(),
                ds.splits()
            )));
        }
        match self.rows.get_mut(row) {
            None => Err(MRError::config(format!(
                "grid {} has no source {}",
                self.id, row
            ))),
            Some(Some(_)) => Err(MRError::DuplicateSource {
                grid: self.id.clone(),
                row,
            }),
            Some(slot) => {
                *slot = Some(ds);
                Ok(())
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sources(&self) -> usize {
        self.rows.len()
    }

    pub fn splits(&self) -> usize {
        self.splits
    }

    /// True once every source has delivered its dataset.
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(|r| r.is_some())
    }

    pub fn finished_sources(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    pub fn dataset(&self, source: usize) -> Option<&Arc<Dataset>> {
        self.rows.get(source).and_then(|r| r.as_ref())
    }

    pub fn bucket(&self, source: usize, split: usize) -> Option<&Bucket> {
        self.dataset(source).and_then(|ds| ds.bucket(split))
    }

    fn datasets(&self, split: Option<usize>) -> Result<Vec<&Arc<Dataset>>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(row, ds)| {
                ds.as_ref().ok_or_else(|| MRError::InputUnavailable {
                    row,
                    split: split.unwrap_or(0),
                    reason: format!("grid {}: source not yet materialized", self.id),
                })
            })
            .collect()
    }

    /// Makes sure column `split` (or the whole grid) is finished and readable.
    pub fn fetch(&self, split: Option<usize>) -> Result<()> {
        for ds in self.datasets(split)? {
            ds.fetch(split)?;
        }
        Ok(())
    }

    /// Column `split`, in source order.
    pub fn split_data(&self, split: usize) -> Result<RecordStream<'_>> {
        if split >= self.splits {
            return Err(MRError::InputUnavailable {
                row: 0,
                split,
                reason: format!("grid {} has only {} splits", self.id, self.splits),
            });
        }
        let datasets = self.datasets(Some(split))?;
        Ok(chain_buckets(
            datasets.into_iter().filter_map(move |ds| ds.bucket(split)),
        ))
    }

    /// Every record of the grid, row by row.
    pub fn data(&self) -> Result<RecordStream<'_>> {
        let datasets = self.datasets(None)?;
        Ok(chain_buckets(datasets.into_iter().flat_map(|ds| ds.buckets().iter())))
    }

    /// (source, split, path) of every non-empty persisted split.
    pub fn outurls(&self) -> Vec<(usize, usize, PathBuf)> {
        self.rows
            .iter()
            .flatten()
            .flat_map(|ds| {
                let source = ds.source();
                ds.outurls().into_iter().map(move |(split, p)| (source, split, p))
            })
            .collect()
    }

    /// Deletes every non-permanent dataset of the grid.
    pub fn delete(&self) -> Result<()> {
        for ds in self.rows.iter().flatten() {
            ds.delete()?;
        }
        Ok(())
    }
}
