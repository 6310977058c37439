//! Clipboard history: bounded ring of processed clipboard contents.
//!
//! Newest entries sit at the front; the oldest is evicted at capacity.
//! The ring can be written to and read back from a JSON snapshot. Images
//! are stored in the snapshot as dimensions only.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::content::{ClipContent, ContentKind, preview_text};

/// Preview length used by the snapshot and the history view.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One recorded clipboard change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Unix epoch milliseconds when the change was recorded.
    pub timestamp: u64,
    pub content: ClipContent,
}

#[derive(Debug)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl HistoryRing {
    /// Create a ring holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 1,
        }
    }

    /// Record `content`, evicting the oldest entry if full.
    pub fn push(&mut self, content: ClipContent, timestamp: u64) -> &HistoryEntry {
        let entry = HistoryEntry {
            seq: self.next_seq,
            timestamp,
            content,
        };
        self.next_seq += 1;

        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }

        self.entries.push_front(entry);
        &self.entries[0]
    }

    /// Iterate entries newest-first, with an optional limit.
    pub fn iter_newest_first(&self, limit: Option<usize>) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().take(limit.unwrap_or(usize::MAX))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refill from snapshot records, newest first as [`load_snapshot`]
    /// returns them. Image records carry no pixels and are left out; when
    /// there are more records than capacity the newest are kept.
    pub fn restore(&mut self, items: &[SnapshotItem]) {
        for item in items.iter().rev() {
            if let (Some(ContentKind::Text), Some(text)) =
                (ContentKind::parse(&item.kind), &item.text)
            {
                self.push(ClipContent::Text(text.clone()), item.ts);
            }
        }
    }

    /// Snapshot records, newest first.
    pub fn snapshot(&self) -> Vec<SnapshotItem> {
        self.entries.iter().map(SnapshotItem::from).collect()
    }

    /// Write the snapshot to `path` as pretty JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// One history record as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub preview: String,
}

impl From<&HistoryEntry> for SnapshotItem {
    fn from(entry: &HistoryEntry) -> Self {
        let (text, width, height) = match &entry.content {
            ClipContent::Text(text) => (Some(text.clone()), None, None),
            ClipContent::Image(bitmap) => (None, Some(bitmap.width), Some(bitmap.height)),
        };
        SnapshotItem {
            kind: entry.content.kind().as_str().to_string(),
            ts: entry.timestamp,
            text,
            width,
            height,
            preview: entry.content.preview(PREVIEW_CHARS),
        }
    }
}

/// Read a snapshot back.
///
/// Records of an unknown type or shape are dropped, missing previews are
/// filled in and the result is sorted newest first. A missing or
/// unreadable file yields an empty list.
pub fn load_snapshot(path: &Path) -> Vec<SnapshotItem> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&raw) else {
        return Vec::new();
    };

    let mut items: Vec<SnapshotItem> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value::<SnapshotItem>(v).ok())
        .filter_map(|mut item| {
            match ContentKind::parse(&item.kind)? {
                ContentKind::Text => {
                    item.preview = preview_text(item.text.as_deref().unwrap_or(""), PREVIEW_CHARS);
                }
                ContentKind::Image if item.preview.is_empty() => {
                    item.preview = match (item.width, item.height) {
                        (Some(w), Some(h)) => format!("[Image {w}x{h}]"),
                        _ => "[Image]".to_string(),
                    };
                }
                ContentKind::Image => {}
            }
            Some(item)
        })
        .collect();
    items.sort_by(|a, b| b.ts.cmp(&a.ts));
    items
}

/// Current Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
