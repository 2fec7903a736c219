use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pl_core::core::{ChatThread, ExportError, ExportSink};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ExportedThread<'a> {
    #[serde(flatten)]
    thread: &'a ChatThread,
    #[serde(rename = "_exported_")]
    exported_at: String,
    meta: &'a Value,
}

/// Serialize a thread snapshot with its export metadata.
pub fn export_to_json(
    thread: &ChatThread,
    meta: &Value,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    let doc = ExportedThread {
        thread,
        exported_at: exported_at.to_rfc3339(),
        meta,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Writes finished threads as JSON files under
/// `<data_dir>/<YYYYMMDD>/<YYYYMMDD-HHMMSS>-<topic>_<thread>.json`.
pub struct FileExportSink {
    data_dir: PathBuf,
}

impl FileExportSink {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, thread: &ChatThread, now: DateTime<Utc>) -> PathBuf {
        let day = now.format("%Y%m%d").to_string();
        let file = format!(
            "{}-{}_{}.json",
            now.format("%Y%m%d-%H%M%S"),
            thread.topic_id,
            thread.id
        );
        self.data_dir.join(day).join(file)
    }
}

impl ExportSink for FileExportSink {
    fn export_thread(&self, thread: &ChatThread, meta: &Value) -> Result<String, ExportError> {
        let now = Utc::now();
        let path = self.path_for(thread, now);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = export_to_json(thread, meta, now)?;
        fs::write(&path, body)?;
        Ok(path.display().to_string())
    }
}
