//! # Capture Logger
//!
//! Writes one JSON object per line for every transmitted packet and every
//! decoded downlink frame. Files are named `capture-<UTC timestamp>-<seq>.jsonl`
//! so lexical order is creation order; a new file is started after
//! `max_records_per_file` lines and only the newest `max_files_to_keep`
//! files survive.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::{Telemetry, TelemetryFrame};
use crate::error::Result;
use crate::protocol_id::ProtocolId;

const FILE_PREFIX: &str = "capture-";
const FILE_SUFFIX: &str = ".jsonl";

/// Which way a captured packet travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
}

/// One line of a capture file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub timestamp: String,
    pub direction: Direction,
    pub protocol: String,
    pub protocol_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<TelemetryFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
}

impl CaptureRecord {
    /// Record for a packet handed to the radio.
    pub fn transmitted(id: ProtocolId, state: Option<u8>, channel: Option<u8>, payload: &[u8]) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            direction: Direction::Tx,
            protocol: id.to_string(),
            protocol_id: id.raw(),
            state,
            channel,
            payload: to_hex(payload),
            frame: None,
            telemetry: None,
        }
    }

    /// Record for a decoded downlink frame, with the values it updated.
    pub fn received(id: ProtocolId, frame: TelemetryFrame, telemetry: &Telemetry) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            direction: Direction::Rx,
            protocol: id.to_string(),
            protocol_id: id.raw(),
            state: None,
            channel: None,
            payload: to_hex(&telemetry.raw),
            frame: Some(frame),
            telemetry: Some(telemetry.clone()),
        }
    }
}

/// Lower-case hex without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Rotating JSONL writer.
#[derive(Debug)]
pub struct CaptureWriter {
    dir: PathBuf,
    max_records_per_file: u32,
    max_files_to_keep: usize,
    file: Option<BufWriter<File>>,
    records_in_file: u32,
    sequence: u32,
}

impl CaptureWriter {
    /// Creates `dir` if needed. No file is opened until the first record.
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: u32, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Capture directory: {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            file: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    /// Appends one record, rotating first if the current file is full.
    pub fn write(&mut self, record: &CaptureRecord) -> Result<()> {
        if self.file.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(file) = self.file.as_mut() {
            serde_json::to_writer(&mut *file, record)?;
            file.write_all(b"\n")?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Capture files in `dir`, oldest first.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut old) = self.file.take() {
            old.flush()?;
        }

        let name = format!(
            "{}{}-{:04}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            self.sequence,
            FILE_SUFFIX
        );
        self.sequence = self.sequence.wrapping_add(1);
        let path = self.dir.join(name);
        debug!("Opening capture file {}", path.display());

        self.file = Some(BufWriter::new(File::create(&path)?));
        self.records_in_file = 0;
        self.prune()
    }

    fn prune(&self) -> Result<()> {
        let files = self.list_files()?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for path in &files[..excess] {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove old capture {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush capture file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_id::ProtocolKind;
    use tempfile::tempdir;

    fn record(n: u8) -> CaptureRecord {
        CaptureRecord::transmitted(
            ProtocolId::for_kind(ProtocolKind::Devo, 0),
            Some(2),
            Some(n),
            &[0x8b, n, 0xff],
        )
    }

    #[test]
    fn test_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_lines_are_json() {
        let dir = tempdir().unwrap();
        let mut writer = CaptureWriter::new(dir.path(), 100, 5).unwrap();
        writer.write(&record(7)).unwrap();
        writer.write(&record(8)).unwrap();
        writer.flush().unwrap();

        let files = writer.list_files().unwrap();
        assert_eq!(files.len(), 1);
        let text = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["direction"], "tx");
        assert_eq!(value["channel"], 7);
        assert_eq!(value["payload"], "8b07ff");
        assert_eq!(value["protocol_id"], 0x020000);
        assert!(value.get("telemetry").is_none(), "absent fields are skipped");
    }

    #[test]
    fn test_rotation_and_retention() {
        let dir = tempdir().unwrap();
        let mut writer = CaptureWriter::new(dir.path(), 3, 2).unwrap();
        for n in 0..10 {
            writer.write(&record(n)).unwrap();
        }
        writer.flush().unwrap();

        let files = writer.list_files().unwrap();
        assert_eq!(files.len(), 2, "only the newest files are kept");

        let newest = fs::read_to_string(files.last().unwrap()).unwrap();
        assert_eq!(newest.lines().count(), 1, "10 records at 3 per file leave 1 in the last");
        let previous = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(previous.lines().count(), 3);
    }

    #[test]
    fn test_foreign_files_untouched() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        let mut writer = CaptureWriter::new(dir.path(), 1, 1).unwrap();
        for n in 0..3 {
            writer.write(&record(n)).unwrap();
        }
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(writer.list_files().unwrap().len(), 1);
    }

    #[test]
    fn test_received_record_carries_values() {
        let mut telemetry = Telemetry::new();
        telemetry.volt = [120, 0, 0];
        let rec = CaptureRecord::received(
            ProtocolId::for_kind(ProtocolKind::Hubsan, 0x80),
            TelemetryFrame::Battery,
            &telemetry,
        );
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["direction"], "rx");
        assert_eq!(value["frame"], "battery");
        assert_eq!(value["telemetry"]["volt"][0], 120);
    }
}
