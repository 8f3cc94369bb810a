use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{MrError, Result};
use crate::record::read_records;

/// Identity of one map/reduce run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    name: String,
    files: Vec<String>,
    n_reduce: usize,
}

impl Job {
    pub fn new(name: impl Into<String>, files: Vec<String>, n_reduce: usize) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(MrError::InvalidJob("job name is empty".to_string()));
        }
        if name.contains(['/', '\\']) {
            return Err(MrError::InvalidJob(format!(
                "job name {name:?} contains a path separator"
            )));
        }
        if files.is_empty() {
            return Err(MrError::InvalidJob(format!("job {name} has no input files")));
        }
        if n_reduce == 0 {
            return Err(MrError::InvalidJob(format!(
                "job {name} needs at least one reduce partition"
            )));
        }
        Ok(Job {
            name,
            files,
            n_reduce,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn n_map(&self) -> usize {
        self.files.len()
    }

    pub fn n_reduce(&self) -> usize {
        self.n_reduce
    }
}

/// Output of map task `map_task` destined for reduce partition `reduce_task`.
pub fn intermediate_name(job: &str, map_task: usize, reduce_task: usize) -> String {
    format!("mrtmp.{job}-{map_task}-{reduce_task}")
}

/// Output of reduce task `reduce_task`.
pub fn result_name(job: &str, reduce_task: usize) -> String {
    format!("mrtmp.{job}-res-{reduce_task}")
}

/// Final merged output of the job.
pub fn merged_name(job: &str) -> String {
    format!("mrtmp.{job}")
}

/// Concatenate the reduce outputs in partition order into the job's output
/// file, one `key: value` line per record. Each partition is already sorted
/// by key and partitions are disjoint, so no second sort happens here.
pub fn merge(job: &Job, work_dir: &Path) -> Result<PathBuf> {
    debug!(job = job.name(), "merging reduce outputs");
    let out_path = work_dir.join(merged_name(job.name()));
    let tmp = NamedTempFile::new_in(work_dir).map_err(|e| MrError::io(work_dir, e))?;
    let mut writer = BufWriter::new(tmp);

    for partition in 0..job.n_reduce() {
        let path = work_dir.join(result_name(job.name(), partition));
        if !path.is_file() {
            return Err(MrError::MissingOutput {
                job: job.name().to_string(),
                partition,
                path,
            });
        }
        for kv in read_records(&path)? {
            writeln!(writer, "{}: {}", kv.key, kv.value).map_err(|e| MrError::io(&out_path, e))?;
        }
    }

    let tmp = writer
        .into_inner()
        .map_err(|e| MrError::io(&out_path, e.into_error()))?;
    tmp.persist(&out_path)
        .map_err(|e| MrError::io(&out_path, e.error))?;
    Ok(out_path)
}

/// Remove every file the job produced in `work_dir`.
pub fn cleanup(job: &Job, work_dir: &Path) -> Result<()> {
    let mut names = Vec::with_capacity(job.n_map() * job.n_reduce() + job.n_reduce() + 1);
    for m in 0..job.n_map() {
        for r in 0..job.n_reduce() {
            names.push(intermediate_name(job.name(), m, r));
        }
    }
    for r in 0..job.n_reduce() {
        names.push(result_name(job.name(), r));
    }
    names.push(merged_name(job.name()));

    for name in names {
        let path = work_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(MrError::io(&path, e)),
        }
    }
    Ok(())
}
