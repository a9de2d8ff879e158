use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tracing::trace;

use super::{LogEvent, LogSource};
use crate::config::{Config, DEFAULT_CHANNEL_BUFFER, DEFAULT_TIMESTAMP_FORMAT};
use crate::message::Message;

/// A log source that reads a file line by line.
///
/// A message's position is the byte offset of its line. Lines without a
/// leading timestamp inherit the time of the line before them. A stream
/// starting inside a line begins at the next line.
pub struct FileSource {
    path: PathBuf,
    channel_buffer: usize,
    timestamp_format: String,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }

    pub fn from_config(path: PathBuf, config: &Config) -> Self {
        Self {
            path,
            channel_buffer: config.channel_buffer.max(1),
            timestamp_format: config.timestamp_format.clone(),
        }
    }
}

#[async_trait::async_trait]
impl LogSource for FileSource {
    async fn stream(&self, from: u64, inherited_time: Option<DateTime<Utc>>) -> mpsc::Receiver<LogEvent> {
        let (tx, rx) = mpsc::channel(self.channel_buffer);
        let path = self.path.clone();
        let format = self.timestamp_format.clone();

        tokio::spawn(async move {
            if let Err(e) = read_lines(&path, from, inherited_time, &format, &tx).await {
                let _ = tx
                    .send(LogEvent::Error(format!("{}: {:#}", path.display(), e)))
                    .await;
            }
            let _ = tx.send(LogEvent::EndOfStream).await;
        });

        rx
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

async fn read_lines(
    path: &Path,
    from: u64,
    inherited_time: Option<DateTime<Utc>>,
    format: &str,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<()> {
    let mut file = File::open(path).await.context("opening file")?;
    if from > 0 {
        file.seek(SeekFrom::Start(from - 1)).await.context("seeking")?;
    }
    let mut reader = BufReader::new(file);

    let mut position = from;
    let mut last_time = inherited_time;
    let mut buf = Vec::new();
    if from > 0 {
        let mut previous = [0u8; 1];
        let read = reader.read(&mut previous).await.context("reading")?;
        if read == 1 && previous[0] != b'\n' {
            // mid-line: the fragment belongs to the line before `from`
            position += reader.read_until(b'\n', &mut buf).await.context("reading")? as u64;
        }
    }
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await.context("reading")?;
        if read == 0 {
            break;
        }
        let text = String::from_utf8_lossy(strip_line_ending(&buf)).into_owned();
        let time = parse_leading_timestamp(&text, format)
            .or(last_time)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        last_time = Some(time);

        trace!(position, "line read");
        if tx.send(LogEvent::Message(Message::new(position, time, text))).await.is_err() {
            // receiver gone
            return Ok(());
        }
        position += read as u64;
    }
    Ok(())
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse a timestamp in `format` at the very start of `line`, read as UTC.
pub fn parse_leading_timestamp(line: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_and_remainder(line, format)
        .ok()
        .map(|(naive, _)| naive.and_utc())
}
