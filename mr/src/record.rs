//! Key/value records and their on-disk form: one JSON object per line.

use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use fnv::FnvHasher;
use tempfile::NamedTempFile;

use crate::error::{MrError, Result};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Reduce bucket owning `key`, in `0..n`.
pub fn partition(key: &str, n: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() % n as u64) as usize
}

/// Write `records` to `path` atomically: readers see either the previous
/// file or the complete new one.
pub fn write_records(path: &Path, records: &[KeyValue]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| MrError::io(dir, e))?;
    }

    let tmp = NamedTempFile::new_in(dir).map_err(|e| MrError::io(dir, e))?;
    let mut writer = BufWriter::new(tmp);
    for record in records {
        serde_json::to_writer(&mut writer, record).map_err(|e| MrError::serialization(path, e))?;
        writer.write_all(b"\n").map_err(|e| MrError::io(path, e))?;
    }
    let tmp = writer
        .into_inner()
        .map_err(|e| MrError::io(path, e.into_error()))?;
    tmp.persist(path).map_err(|e| MrError::io(path, e.error))?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<KeyValue>> {
    let file = File::open(path).map_err(|e| MrError::io(path, e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| MrError::io(path, e))?;
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line).map_err(|e| MrError::serialization(path, e))?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for n in 1..8 {
            for key in ["", "a", "hello", "12345", "ünïcödé"] {
                let p = partition(key, n);
                assert!(p < n);
                assert_eq!(p, partition(key, n));
            }
        }
        assert_eq!(partition("anything", 1), 0);
    }

    #[test]
    fn test_partition_spreads_keys() {
        let used: std::collections::HashSet<usize> =
            (0..200).map(|i| partition(&i.to_string(), 4)).collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_records_survive_awkward_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/mrtmp.test-0-0");
        let records = vec![
            KeyValue::new("line\nbreak", ""),
            KeyValue::new("quote\"", "tab\tvalue"),
        ];

        write_records(&path, &records).unwrap();

        assert_eq!(read_records(&path).unwrap(), records);
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_records(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, MrError::Io { .. }));
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage");
        fs::write(&path, "not json\n").unwrap();

        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, MrError::Serialization { .. }));
    }
}
