//! Append-only journal of patient lifecycle events.
//!
//! Events are appended to a JSONL (JSON Lines) file with file locking so
//! that several processes can record events safely. Replaying the journal
//! through the service is safe to repeat: the void cascade is idempotent.

use crate::cascade::PatientEvent;
use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Destination for patient lifecycle events
pub trait EventSink {
    fn append(&mut self, event: &PatientEvent) -> Result<()>;
}

/// JSONL-based event journal with file locking
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Create a new journal for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlJournal {
    fn append(&mut self, event: &PatientEvent) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Journaled {} event for patient {}", event_name(event), event.patient());
        Ok(())
    }
}

fn event_name(event: &PatientEvent) -> &'static str {
    match event {
        PatientEvent::Voided(_) => "voided",
        PatientEvent::Unvoided(_) => "unvoided",
    }
}

/// Read all events from a journal file, oldest first
///
/// Malformed lines (e.g. a partial write) are skipped with a warning.
pub fn read_events(path: &Path) -> Result<Vec<PatientEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<PatientEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("Failed to parse event at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} event(s) from journal", events.len());
    Ok(events)
}
