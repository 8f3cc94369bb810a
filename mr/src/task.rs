use std::fmt;

use crate::job::Job;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    Map,
    Reduce,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Map => write!(f, "map"),
            Phase::Reduce => write!(f, "reduce"),
        }
    }
}

/// Phase-specific parameters of a task.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Map one input file into `n_reduce` partitions.
    Map { file: String, n_reduce: usize },
    /// Reduce one partition, reading the output of all `n_map` map tasks.
    Reduce { n_map: usize },
}

/// One schedulable unit of work. Built once per (phase, index) and never
/// mutated afterwards.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    job_name: String,
    index: usize,
    kind: TaskKind,
}

impl Task {
    pub fn new(job_name: impl Into<String>, index: usize, kind: TaskKind) -> Task {
        Task {
            job_name: job_name.into(),
            index,
            kind,
        }
    }

    /// All tasks of `phase` for `job`, indexed `0..N`.
    pub fn for_phase(job: &Job, phase: Phase) -> Vec<Task> {
        match phase {
            Phase::Map => job
                .files()
                .iter()
                .enumerate()
                .map(|(index, file)| {
                    Task::new(
                        job.name(),
                        index,
                        TaskKind::Map {
                            file: file.clone(),
                            n_reduce: job.n_reduce(),
                        },
                    )
                })
                .collect(),
            Phase::Reduce => (0..job.n_reduce())
                .map(|index| {
                    Task::new(
                        job.name(),
                        index,
                        TaskKind::Reduce {
                            n_map: job.n_map(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn phase(&self) -> Phase {
        match self.kind {
            TaskKind::Map { .. } => Phase::Map,
            TaskKind::Reduce { .. } => Phase::Reduce,
        }
    }

    /// Number of partitions on the other side of the shuffle: nReduce for a
    /// map task, nMap for a reduce task.
    pub fn fan(&self) -> usize {
        match self.kind {
            TaskKind::Map { n_reduce, .. } => n_reduce,
            TaskKind::Reduce { n_map } => n_map,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.job_name, self.phase(), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "wc",
            vec![
                "file1.txt".to_string(),
                "file2.txt".to_string(),
                "file3.txt".to_string(),
            ],
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_map_tasks_one_per_file() {
        let tasks = Task::for_phase(&job(), Phase::Map);

        assert_eq!(tasks.len(), 3);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index(), i);
            assert_eq!(task.phase(), Phase::Map);
            assert_eq!(task.fan(), 2);
            assert_eq!(task.job_name(), "wc");
        }
        assert_eq!(
            tasks[1].kind(),
            &TaskKind::Map {
                file: "file2.txt".to_string(),
                n_reduce: 2
            }
        );
    }

    #[test]
    fn test_reduce_tasks_one_per_partition() {
        let tasks = Task::for_phase(&job(), Phase::Reduce);

        assert_eq!(tasks.len(), 2);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index(), i);
            assert_eq!(task.phase(), Phase::Reduce);
            assert_eq!(task.fan(), 3);
        }
    }

    #[test]
    fn test_task_display() {
        let task = Task::new("wc", 4, TaskKind::Reduce { n_map: 1 });
        assert_eq!(task.to_string(), "wc:reduce#4");
    }
}
