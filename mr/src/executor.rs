use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{MrError, Result};
use crate::job::{intermediate_name, result_name};
use crate::record::{partition, read_records, write_records, KeyValue};
use crate::task::{Task, TaskKind};

/// User map function: (input file name, file contents) -> records.
pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;
/// User reduce function: (key, every value emitted for it) -> output value.
pub type ReduceFn = fn(&str, &[String]) -> String;

/// Runs tasks of either phase against files under `work_dir`.
///
/// Execution is deterministic: running the same task twice produces
/// byte-identical output, which is what makes duplicate attempts harmless.
#[derive(Clone)]
pub struct Executor {
    map_fn: MapFn,
    reduce_fn: ReduceFn,
    work_dir: PathBuf,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Executor {{ work_dir: {:?} }}", self.work_dir)
    }
}

impl Executor {
    pub fn new(map_fn: MapFn, reduce_fn: ReduceFn, work_dir: impl Into<PathBuf>) -> Self {
        Executor {
            map_fn,
            reduce_fn,
            work_dir: work_dir.into(),
        }
    }

    pub fn execute(&self, task: &Task) -> Result<()> {
        debug!(%task, "executing task");
        match task.kind() {
            TaskKind::Map { file, n_reduce } => {
                self.do_map(task.job_name(), task.index(), file, *n_reduce)
            }
            TaskKind::Reduce { n_map } => self.do_reduce(task.job_name(), task.index(), *n_map),
        }
    }

    fn do_map(&self, job: &str, index: usize, file: &str, n_reduce: usize) -> Result<()> {
        let contents = fs::read_to_string(file).map_err(|e| MrError::io(file, e))?;

        let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce];
        for kv in (self.map_fn)(file, &contents) {
            buckets[partition(&kv.key, n_reduce)].push(kv);
        }

        // every partition gets a file, even an empty one, so reduce can tell
        // "no records" apart from "map never ran"
        for (reduce_task, bucket) in buckets.iter().enumerate() {
            let path = self
                .work_dir
                .join(intermediate_name(job, index, reduce_task));
            write_records(&path, bucket)?;
        }
        Ok(())
    }

    fn do_reduce(&self, job: &str, index: usize, n_map: usize) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for map_task in 0..n_map {
            let path = self.work_dir.join(intermediate_name(job, map_task, index));
            for kv in read_records(&path)? {
                groups.entry(kv.key).or_default().push(kv.value);
            }
        }

        let output: Vec<KeyValue> = groups
            .into_iter()
            .map(|(key, values)| {
                let value = (self.reduce_fn)(&key, &values);
                KeyValue { key, value }
            })
            .collect();

        write_records(&self.work_dir.join(result_name(job, index)), &output)
    }
}
