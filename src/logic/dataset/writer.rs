use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::dedup::DedupConflict;
use crate::logic::error::PipelineResult;

/// Append-only JSONL log of dedup conflicts for one run
pub struct ConflictLogWriter {
    path: PathBuf,
}

impl ConflictLogWriter {
    /// Start a fresh log at `path` (truncates a previous run's log)
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(path)?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append conflicts, one JSON object per line
    pub fn append(&self, conflicts: &[DedupConflict]) -> io::Result<usize> {
        if conflicts.is_empty() {
            return Ok(0);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        for conflict in conflicts {
            let json = serde_json::to_string(conflict)?;
            writeln!(file, "{}", json)?;
        }
        file.flush()?;
        Ok(conflicts.len())
    }
}

/// Read a conflict log back
pub fn read_conflicts(path: &Path) -> PipelineResult<Vec<DedupConflict>> {
    let reader = BufReader::new(File::open(path)?);
    let mut conflicts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        conflicts.push(serde_json::from_str(&line)?);
    }
    Ok(conflicts)
}
