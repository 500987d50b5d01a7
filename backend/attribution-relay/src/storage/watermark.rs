/// Persisted position in the warehouse event stream.
///
/// Stored as a small JSON object with a single key, rewritten wholesale after
/// every fetch that returned rows.
use crate::config::WatermarkMode;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Number of matching warehouse rows seen so far
    RowCount(u64),
    /// Newest warehouse insertion time fetched so far
    InsertedAt(DateTime<Utc>),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatermarkFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_rows_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_inserted_at: Option<DateTime<Utc>>,
}

impl From<Watermark> for WatermarkFile {
    fn from(watermark: Watermark) -> Self {
        match watermark {
            Watermark::RowCount(count) => WatermarkFile {
                prev_rows_number: Some(count),
                ..Default::default()
            },
            Watermark::InsertedAt(ts) => WatermarkFile {
                last_inserted_at: Some(ts),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the watermark for `mode`. A missing file, or a file written in
    /// the other mode, yields `None`.
    pub async fn load(&self, mode: WatermarkMode) -> Result<Option<Watermark>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No watermark file yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: WatermarkFile = serde_json::from_slice(&raw)?;
        let watermark = match mode {
            WatermarkMode::RowCount => file.prev_rows_number.map(Watermark::RowCount),
            WatermarkMode::InsertedAt => file.last_inserted_at.map(Watermark::InsertedAt),
        };

        if watermark.is_none() {
            warn!(
                path = %self.path.display(),
                mode = ?mode,
                "Watermark file has no value for the configured mode, starting over"
            );
        }

        Ok(watermark)
    }

    /// Replace the stored watermark (temp file + rename).
    pub async fn save(&self, watermark: Watermark) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec(&WatermarkFile::from(watermark))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), watermark = ?watermark, "Watermark saved");
        Ok(())
    }
}
