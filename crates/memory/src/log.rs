//! Append-only episodic log: one JSON line per remembered event.
//!
//! Each record is self-contained, so a reader never needs its neighbors and
//! a torn write can cost at most the final line. Records are never edited
//! or deleted here; readers get a fresh pass over the file on every call
//! and skip anything that does not parse.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::Utc;
use emberkeep_core::Episode;
use emberkeep_core::error::MemoryError;
use tokio::sync::Mutex;
use tracing::warn;

struct WriterState {
    last_ts: i64,
}

/// The append-only episodic log.
///
/// Appends are serialized through a single-writer lock; reads open the file
/// independently and never block a writer.
pub struct EpisodeLog {
    path: PathBuf,
    writer: Mutex<WriterState>,
}

impl EpisodeLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(WriterState { last_ts: 0 }),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one episode, stamped with the current wall-clock seconds.
    ///
    /// Text is trimmed and importance clamped into 1..=5 before writing.
    /// Timestamps never go backwards within one writer, even if the wall
    /// clock does.
    pub async fn append(
        &self,
        text: &str,
        tags: &[&str],
        importance: u8,
    ) -> Result<Episode, MemoryError> {
        let mut writer = self.writer.lock().await;

        let ts = Utc::now().timestamp().max(writer.last_ts);
        writer.last_ts = ts;

        let episode = Episode {
            ts,
            text: text.trim().to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            importance: importance.clamp(1, 5),
        };

        let mut line = serde_json::to_string(&episode)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize episode: {e}")))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create episode log directory: {e}"))
            })?;
        }

        // One write_all per record keeps a crash from tearing more than
        // the final line.
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open episode log: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MemoryError::Storage(format!("Failed to append episode: {e}")))?;

        Ok(episode)
    }

    /// A fresh one-pass read over the log, in file order.
    ///
    /// Missing or unreadable files yield an empty sequence; malformed lines
    /// are skipped with a warning.
    pub fn read_all(&self) -> Episodes {
        let lines = match std::fs::File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Episode log unreadable, yielding nothing");
                None
            }
        };
        Episodes { lines }
    }

    /// The most recent `n` parseable episodes, newest first.
    pub fn recent(&self, n: usize) -> Vec<Episode> {
        if n == 0 {
            return Vec::new();
        }
        let mut buf: VecDeque<Episode> = VecDeque::with_capacity(n + 1);
        for episode in self.read_all() {
            if buf.len() == n {
                buf.pop_front();
            }
            buf.push_back(episode);
        }
        buf.into_iter().rev().collect()
    }
}

/// Lazy iterator over a single pass of the episodic log.
pub struct Episodes {
    lines: Option<std::io::Lines<BufReader<std::fs::File>>>,
}

impl Iterator for Episodes {
    type Item = Episode;

    fn next(&mut self) -> Option<Episode> {
        loop {
            let line = match self.lines.as_mut()?.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(error = %e, "Stopping episode read on I/O error");
                    self.lines = None;
                    return None;
                }
                None => {
                    self.lines = None;
                    return None;
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Episode>(&line) {
                Ok(episode) => return Some(episode),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted episode line");
                    continue;
                }
            }
        }
    }
}
