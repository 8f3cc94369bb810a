use clap::ValueEnum;
use mr::{KeyValue, MapFn, ReduceFn};

/// Map/reduce applications the binaries know how to run.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum App {
    /// Count occurrences of every word.
    #[value(name = "wordcount")]
    WordCount,
    /// Emit every whitespace-separated token once per occurrence, unchanged.
    Numbers,
}

impl App {
    pub fn functions(self) -> (MapFn, ReduceFn) {
        match self {
            App::WordCount => (word_count_map, word_count_reduce),
            App::Numbers => (split_map, identity_reduce),
        }
    }
}

fn word_count_map(_file: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect()
}

fn word_count_reduce(_key: &str, values: &[String]) -> String {
    let count: u64 = values.iter().filter_map(|v| v.parse::<u64>().ok()).sum();
    count.to_string()
}

fn split_map(_file: &str, contents: &str) -> Vec<KeyValue> {
    contents
        .split_whitespace()
        .map(|token| KeyValue::new(token, ""))
        .collect()
}

fn identity_reduce(key: &str, _values: &[String]) -> String {
    key.to_string()
}
