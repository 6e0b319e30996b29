// src/trace.rs
use crate::action::Action;
use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct ActionRecord<'a> {
    frame: u64,
    elapsed_secs: f64,
    hands: usize,
    mode: &'a str,
    action: &'a str,
    detail: String,
}

/// Appends every dispatched action of a session to
/// `<dir>/session_<timestamp>/actions.csv`.
pub struct ActionRecorder {
    path: PathBuf,
    writer: Writer<File>,
    counts: BTreeMap<&'static str, u64>,
}

impl ActionRecorder {
    pub fn create(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Result<Self> {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });
        let path = output_dir.as_ref().join(&session_name).join("actions.csv");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create trace directory {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;

        Ok(Self {
            path,
            writer: Writer::from_writer(file),
            counts: BTreeMap::new(),
        })
    }

    pub fn record(
        &mut self,
        frame: u64,
        elapsed_secs: f64,
        hands: usize,
        mode: &str,
        action: &Action,
    ) -> Result<()> {
        self.writer.serialize(ActionRecord {
            frame,
            elapsed_secs,
            hands,
            mode,
            action: action.name(),
            detail: action.detail(),
        })?;
        *self.counts.entry(action.name()).or_default() += 1;
        Ok(())
    }

    /// Per-action totals so far.
    pub fn counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.counts
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush trace file {}", self.path.display()))?;
        Ok(self.path)
    }
}
