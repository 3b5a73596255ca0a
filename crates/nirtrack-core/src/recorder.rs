//! Streaming JSON-array output.
//!
//! Framing: `[` is written when the writer opens, each record is followed
//! by `,\n`, and on close the final separator is cut off and `]` appended.
//! Earlier records are never rewritten; only the trailing separator is
//! patched when the array is closed.

use crate::record::FrameRecord;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

const OPEN: &[u8] = b"[";
const SEPARATOR: &[u8] = b",\n";
const CLOSE: &[u8] = b"]";

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("output I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("output already finished")]
    Finished,
    #[error("malformed output: {0}")]
    Malformed(String),
}

/// A seekable destination whose tail can be cut off.
pub trait OutputSink: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl OutputSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl OutputSink for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

/// Owns the output destination for the lifetime of a session.
///
/// Dropping an unfinished writer finishes it, so the array is closed on
/// every exit path. Errors during that implicit finish are logged.
///
/// `committed` is the sink offset just past the last complete `record,\n`
/// (or past `[` before the first record). Appends start there and closing
/// cuts back to it, so a partly written record or a failed earlier close
/// never ends up in the finished array.
pub struct RecordWriter<W: OutputSink> {
    sink: Option<W>,
    records: usize,
    committed: u64,
    closed: bool,
}

impl RecordWriter<File> {
    /// Create (or truncate) `path` and open the array.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        tracing::info!(path = %path.display(), "opened output");
        Self::new(file)
    }
}

impl<W: OutputSink> RecordWriter<W> {
    /// Take ownership of `sink` and write the opening bracket at its current end.
    pub fn new(mut sink: W) -> Result<Self, RecorderError> {
        let start = sink.seek(SeekFrom::End(0))?;
        sink.write_all(OPEN)?;
        Ok(Self {
            sink: Some(sink),
            records: 0,
            committed: start + OPEN.len() as u64,
            closed: false,
        })
    }

    /// Serialize `record` and append it followed by the separator.
    pub fn append(&mut self, record: &FrameRecord) -> Result<(), RecorderError> {
        if self.closed {
            return Err(RecorderError::Finished);
        }
        let sink = self.sink.as_mut().ok_or(RecorderError::Finished)?;
        let mut bytes = serde_json::to_vec(record)?;
        bytes.extend_from_slice(SEPARATOR);

        sink.seek(SeekFrom::Start(self.committed))?;
        if let Err(e) = sink.write_all(&bytes) {
            tracing::warn!(error = %e, frame = record.frame_number, "record write failed, dropping partial record");
            return Err(e.into());
        }
        self.committed += bytes.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Close the array and hand back the destination.
    pub fn finish(mut self) -> Result<W, RecorderError> {
        self.close()?;
        self.sink.take().ok_or(RecorderError::Finished)
    }

    /// Cut everything after the last committed record, drop its separator
    /// and write `]`. A failed close can be retried; after a successful one
    /// further calls are no-ops.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        if self.closed {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let end = if self.records > 0 {
            self.committed - SEPARATOR.len() as u64
        } else {
            self.committed
        };
        sink.truncate(end)?;
        sink.seek(SeekFrom::Start(end))?;
        sink.write_all(CLOSE)?;
        sink.flush()?;
        tracing::debug!(records = self.records, "closed output");
        self.closed = true;
        Ok(())
    }
}

impl<W: OutputSink> Drop for RecordWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::error!(error = %e, "failed to finalize output");
            }
        }
    }
}

/// Parse a finished output into its records, checking the framing.
///
/// Each element must be a JSON object.
pub fn read_records<R: Read>(mut reader: R) -> Result<Vec<Map<String, Value>>, RecorderError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let value: Value = serde_json::from_str(&text)?;
    let Value::Array(items) = value else {
        return Err(RecorderError::Malformed("top level is not an array".into()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(RecorderError::Malformed(format!("element {i} is not an object: {other}"))),
        })
        .collect()
}

/// Re-emit parsed records with the writer's framing.
pub fn write_framed<W: Write>(mut out: W, records: &[Map<String, Value>]) -> Result<(), RecorderError> {
    out.write_all(OPEN)?;
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.write_all(SEPARATOR)?;
        }
        serde_json::to_writer(&mut out, record)?;
    }
    out.write_all(CLOSE)?;
    out.flush()?;
    Ok(())
}

/// Check that `frame_number` runs 1..=K in order. Returns K.
pub fn check_frame_numbers(records: &[Map<String, Value>]) -> Result<usize, RecorderError> {
    for (i, record) in records.iter().enumerate() {
        let expected = (i + 1) as u64;
        match record.get("frame_number").and_then(Value::as_u64) {
            Some(n) if n == expected => {}
            Some(n) => {
                return Err(RecorderError::Malformed(format!(
                    "element {i} has frame_number {n}, expected {expected}"
                )))
            }
            None => {
                return Err(RecorderError::Malformed(format!("element {i} has no frame_number")));
            }
        }
    }
    Ok(records.len())
}
