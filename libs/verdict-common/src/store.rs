//! JSONL store semantics - deterministic output paths and line-delimited records
//!
//! Output paths are derived only from unit identity, so a rerun of the
//! pipeline finds the same file and can skip work already done.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const JSONL_EXTENSION: &str = "jsonl";

/// Stable content id (first 128 bits of SHA-256, hex)
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..16])
}

/// Output file for an exercise-keyed unit: `<dir>/<exercise_id>.jsonl`
///
/// Ids come from input files, so one that could name a file outside
/// `dir` is rejected.
pub fn exercise_output_path(dir: &Path, exercise_id: &str) -> Result<PathBuf> {
    let unsafe_id = matches!(exercise_id, "" | "." | "..")
        || exercise_id.contains(['/', '\\', '\0']);
    if unsafe_id {
        bail!("Invalid exercise id for an output file name: {:?}", exercise_id);
    }
    Ok(dir.join(format!("{}.{}", exercise_id, JSONL_EXTENSION)))
}

/// Output file for a prompt-keyed unit, sharded on the first 4 hex chars
pub fn prompt_output_path(dir: &Path, prompt: &str) -> PathBuf {
    let id = content_id(prompt);
    let (shard, rest) = id.split_at(4);
    dir.join(shard).join(format!("{}.{}", rest, JSONL_EXTENSION))
}

/// Read every record of a JSONL file, skipping blank lines
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record at {}:{}", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Read all `.jsonl` files below `dir`, in path order
pub fn read_jsonl_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == JSONL_EXTENSION))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        records.extend(read_jsonl(&path)?);
    }
    Ok(records)
}

/// Write records one per line, creating parent directories
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)
            .with_context(|| format!("Failed to serialize record for {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, Exercise};
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("verdict-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_content_id_deterministic() {
        let a = content_id("def f(): pass");
        let b = content_id("def f(): pass");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, content_id("def g(): pass"));
    }

    #[test]
    fn test_prompt_output_path_is_sharded() {
        let dir = Path::new("/data/out");
        let path = prompt_output_path(dir, "write a function");
        let id = content_id("write a function");

        assert_eq!(path.parent().unwrap(), dir.join(&id[..4]));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.jsonl", &id[4..])
        );
    }

    #[test]
    fn test_exercise_output_path() {
        let path = exercise_output_path(Path::new("out"), "abc123").unwrap();
        assert_eq!(path, Path::new("out/abc123.jsonl"));

        let path = exercise_output_path(Path::new("out"), "HumanEval..0").unwrap();
        assert_eq!(path, Path::new("out/HumanEval..0.jsonl"));
    }

    #[test]
    fn test_exercise_output_path_rejects_escaping_ids() {
        for id in ["", ".", "..", "../escape", "a/b", "/etc/passwd", "..\\x", "nul\0byte"] {
            assert!(
                exercise_output_path(Path::new("out"), id).is_err(),
                "accepted {:?}",
                id
            );
        }
    }

    #[test]
    fn test_jsonl_write_then_read() {
        let dir = scratch_dir();
        let path = dir.join("nested").join("candidates.jsonl");
        let candidates = vec![
            Candidate {
                task_id: "t1".into(),
                prompt: "def f():\n    ".into(),
                completion: "return 1".into(),
            },
            Candidate {
                task_id: "t1".into(),
                prompt: "def f():\n    ".into(),
                completion: "return 2".into(),
            },
        ];

        write_jsonl(&path, &candidates).unwrap();
        let loaded: Vec<Candidate> = read_jsonl(&path).unwrap();
        assert_eq!(loaded, candidates);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_jsonl_reports_line_number() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.jsonl");
        fs::write(&path, "{\"task_id\":\"t1\",\"prompt\":\"\",\"completion\":\"\"}\n\nnot json\n")
            .unwrap();

        let err = read_jsonl::<Candidate>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.jsonl:3"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_jsonl_dir_walks_shards() {
        let dir = scratch_dir();
        let first = Exercise {
            exercise_id: "a".into(),
            problem: "def a():".into(),
            solution: "return 1".into(),
        };
        let second = Exercise {
            exercise_id: "b".into(),
            problem: "def b():".into(),
            solution: "return 2".into(),
        };
        write_jsonl(&dir.join("aa").join("1.jsonl"), &[first.clone()]).unwrap();
        write_jsonl(&dir.join("bb").join("2.jsonl"), &[second.clone()]).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let loaded: Vec<Exercise> = read_jsonl_dir(&dir).unwrap();
        assert_eq!(loaded, vec![first, second]);

        fs::remove_dir_all(&dir).ok();
    }
}
