#![allow(dead_code)]

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mr::{Config, Executor, JobStats, KeyValue, LocalWorker, Phase, Task, WorkerHandle};

/// Split a file into tokens, one record per token.
pub fn split_map(_file: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split_whitespace()
        .map(|token| KeyValue::new(token, ""))
        .collect()
}

/// Return the key unchanged.
pub fn identity_reduce(key: &str, _values: &[String]) -> String {
    key.to_string()
}

pub fn word_count_map(_file: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| KeyValue::new(w.to_lowercase(), "1"))
        .collect()
}

pub fn word_count_reduce(_key: &str, values: &[String]) -> String {
    values.len().to_string()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(dir: &Path) -> Config {
    Config::default()
        .with_work_dir(dir)
        .with_retry_delay(Duration::from_millis(1))
}

/// Write `n_numbers` consecutive integers, one per line, spread over
/// `n_files` input files.
pub fn make_inputs(dir: &Path, n_files: usize, n_numbers: usize) -> Vec<String> {
    let mut names = Vec::with_capacity(n_files);
    let mut i = 0;
    for f in 0..n_files {
        let path = dir.join(format!("mrinput-{f}.txt"));
        let mut w = BufWriter::new(fs::File::create(&path).unwrap());
        while i < (f + 1) * (n_numbers / n_files) {
            writeln!(w, "{i}").unwrap();
            i += 1;
        }
        w.flush().unwrap();
        names.push(path.to_string_lossy().into_owned());
    }
    names
}

/// Every input number shows up exactly once in the merged output.
pub fn check(output: &Path, n_numbers: usize) {
    let text = fs::read_to_string(output).unwrap();
    let mut seen: Vec<usize> = text
        .lines()
        .map(|line| {
            let (key, value) = line.split_once(": ").unwrap();
            assert_eq!(key, value, "reduce output should repeat the key");
            key.parse().unwrap()
        })
        .collect();
    assert_eq!(seen.len(), n_numbers, "expected {n_numbers} lines in output");
    seen.sort_unstable();
    assert!(seen.iter().copied().eq(0..n_numbers));
}

/// Every worker that was shut down did at least one task.
pub fn check_workers(stats: &JobStats) {
    for (worker, completed) in stats.iter() {
        assert!(completed > 0, "worker {worker} didn't do any work");
    }
}

pub fn local_worker(id: &str, dir: &Path) -> LocalWorker {
    LocalWorker::new(id, Executor::new(split_map, identity_reduce, dir))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Assigned(Phase, usize),
    Succeeded(Phase, usize),
}

/// Wraps a worker and logs every assignment and success in global order.
pub struct Recording {
    inner: Arc<LocalWorker>,
    log: Arc<Mutex<Vec<Event>>>,
}

impl Recording {
    pub fn new(inner: Arc<LocalWorker>, log: Arc<Mutex<Vec<Event>>>) -> Self {
        Recording { inner, log }
    }
}

#[async_trait]
impl WorkerHandle for Recording {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn assign(&self, task: &Task) -> mr::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Assigned(task.phase(), task.index()));
        self.inner.assign(task).await?;
        self.log
            .lock()
            .unwrap()
            .push(Event::Succeeded(task.phase(), task.index()));
        Ok(())
    }

    async fn shutdown(&self) -> mr::Result<usize> {
        self.inner.shutdown().await
    }
}
