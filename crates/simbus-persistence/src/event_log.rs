//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Append-only JSON lines log of bus messages."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! Layout: one header line, then one [`StoredMessage`] per line.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use simbus_common::SharedClock;
use tracing::debug;

use crate::metrics::PersistenceMetrics;
use crate::store::{ArchivedMessage, MessageStore, StoredMessage};
use crate::{PersistenceError, Result};

/// Current layout version written into new logs.
pub const EVENT_LOG_VERSION: u16 = 1;

const EVENT_LOG_FORMAT: &str = "simbus-event-log";

/// First line of every event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogHeader {
    /// Always `simbus-event-log`.
    pub format: String,
    /// Layout version.
    pub version: u16,
    /// Creation time of the log file.
    pub created_at: DateTime<Utc>,
    /// SHA-256 over format, version and creation time.
    pub hash: String,
}

impl EventLogHeader {
    fn new(created_at: DateTime<Utc>) -> Self {
        let hash = header_digest(EVENT_LOG_FORMAT, EVENT_LOG_VERSION, &created_at);
        Self {
            format: EVENT_LOG_FORMAT.to_owned(),
            version: EVENT_LOG_VERSION,
            created_at,
            hash,
        }
    }

    /// Read and check the header of the log at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    fn read_from(reader: &mut impl BufRead) -> Result<Self> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(PersistenceError::InvalidHeader("log is empty".into()));
        }
        let header: EventLogHeader = serde_json::from_str(line.trim_end())
            .map_err(|err| PersistenceError::InvalidHeader(err.to_string()))?;
        header.verify()?;
        Ok(header)
    }

    fn verify(&self) -> Result<()> {
        if self.format != EVENT_LOG_FORMAT {
            return Err(PersistenceError::InvalidHeader(format!(
                "unknown format '{}'",
                self.format
            )));
        }
        if self.version > EVENT_LOG_VERSION {
            return Err(PersistenceError::InvalidHeader(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if header_digest(&self.format, self.version, &self.created_at) != self.hash {
            return Err(PersistenceError::InvalidHeader("digest mismatch".into()));
        }
        Ok(())
    }
}

fn header_digest(format: &str, version: u16, created_at: &DateTime<Utc>) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(format.as_bytes());
    hasher.update(version.to_be_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Append-only writer for the event log.
pub struct EventLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl EventLogWriter {
    /// Open an event log for appending, writing a header if the file is new.
    ///
    /// An existing log keeps its header and numbering continues after its
    /// last entry.
    pub fn open(path: &Path, created_at: DateTime<Utc>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        if !fresh {
            EventLogHeader::read(path)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if fresh {
            let line = serde_json::to_string(&EventLogHeader::new(created_at))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 1,
            });
        }

        let next_sequence = last_sequence(path)? + 1;
        debug!(path = %path.display(), next_sequence, "resuming event log");
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a message and return the stored entry with the number of bytes written.
    pub fn append(
        &mut self,
        message: ArchivedMessage,
        recorded_at: DateTime<Utc>,
    ) -> Result<(StoredMessage, usize)> {
        let entry = StoredMessage {
            sequence: self.next_sequence,
            recorded_at,
            message,
        };
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.next_sequence += 1;
        Ok((entry, line.len() + 1))
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Sequence number the next append receives.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0u64;
    for entry in EventLogReader::open(path)? {
        match entry {
            Ok(entry) => last = entry.sequence,
            // a torn final line from an interrupted write does not stop the log
            Err(PersistenceError::Json(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(last)
}

/// Replay the log in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(StoredMessage) -> Result<()>,
{
    let mut count = 0usize;
    for entry in EventLogReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over the entries of a log.
pub struct EventLogReader {
    header: EventLogHeader,
    lines: std::io::Lines<BufReader<File>>,
}

impl EventLogReader {
    /// Open the log for sequential reading; the header is checked first.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = EventLogHeader::read_from(&mut reader)?;
        Ok(Self {
            header,
            lines: reader.lines(),
        })
    }

    /// Header of the log being read.
    pub fn header(&self) -> &EventLogHeader {
        &self.header
    }
}

impl Iterator for EventLogReader {
    type Item = Result<StoredMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(PersistenceError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// [`MessageStore`] backed by an [`EventLogWriter`].
pub struct EventLogStore {
    writer: Mutex<EventLogWriter>,
    clock: SharedClock,
    metrics: Option<PersistenceMetrics>,
}

impl EventLogStore {
    /// Open or resume the log at `path`.
    pub fn open(path: &Path, clock: SharedClock) -> Result<Self> {
        let writer = EventLogWriter::open(path, clock.now())?;
        Ok(Self {
            writer: Mutex::new(writer),
            clock,
            metrics: None,
        })
    }

    /// Count appended bytes on the given metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Location of the log on disk.
    pub fn path(&self) -> PathBuf {
        self.writer.lock().path().to_path_buf()
    }
}

#[async_trait]
impl MessageStore for EventLogStore {
    async fn append(&self, message: ArchivedMessage) -> Result<StoredMessage> {
        let recorded_at = self.clock.now();
        let (entry, bytes) = self.writer.lock().append(message, recorded_at)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_log_bytes(bytes);
        }
        Ok(entry)
    }

    async fn flush(&self) -> Result<()> {
        self.writer.lock().flush()
    }
}
