//! Aggregation of listed objects into bucket statistics.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// An object pinned as oldest or newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMarker {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

impl ObjectMarker {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionStats {
    pub extension: String,
    pub count: u64,
    pub bytes: u64,
    /// Share of the total bytes, in percent
    pub share: f64,
}

/// Average growth, extrapolated to a 30-day month and a 365-day year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthRate {
    pub bytes_per_day: f64,
    pub bytes_per_month: f64,
    pub bytes_per_year: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub oldest: Option<ObjectMarker>,
    pub newest: Option<ObjectMarker>,
    /// Whole days between the oldest and newest object
    pub span_days: i64,
    /// Sorted by bytes, largest first
    pub extensions: Vec<ExtensionStats>,
    /// Present only when the data spans at least one day
    pub growth: Option<GrowthRate>,
}

impl BucketStats {
    pub fn is_empty(&self) -> bool {
        self.total_files == 0
    }

    pub fn from_objects<'a>(objects: impl IntoIterator<Item = &'a ObjectSummary>) -> Self {
        let mut acc = StatsAccumulator::default();
        for object in objects {
            acc.add(object);
        }
        acc.finish()
    }
}

/// Incremental builder so pages can be folded in as they arrive.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    total_files: u64,
    total_bytes: u64,
    oldest: Option<ObjectMarker>,
    newest: Option<ObjectMarker>,
    extensions: HashMap<String, (u64, u64)>,
}

impl StatsAccumulator {
    /// Fold one object in. Keys ending in `/` are folder markers and skipped.
    pub fn add(&mut self, object: &ObjectSummary) {
        if object.key.ends_with('/') {
            return;
        }

        self.total_files += 1;
        self.total_bytes += object.size;

        if self
            .oldest
            .as_ref()
            .map_or(true, |o| object.last_modified < o.last_modified)
        {
            self.oldest = Some(ObjectMarker {
                key: object.key.clone(),
                last_modified: object.last_modified,
            });
        }
        if self
            .newest
            .as_ref()
            .map_or(true, |n| object.last_modified > n.last_modified)
        {
            self.newest = Some(ObjectMarker {
                key: object.key.clone(),
                last_modified: object.last_modified,
            });
        }

        let entry = self.extensions.entry(extension_of(&object.key)).or_default();
        entry.0 += 1;
        entry.1 += object.size;
    }

    pub fn finish(self) -> BucketStats {
        let span_days = match (&self.oldest, &self.newest) {
            (Some(oldest), Some(newest)) => (newest.last_modified - oldest.last_modified).num_days(),
            _ => 0,
        };

        let total_bytes = self.total_bytes;
        let mut extensions: Vec<ExtensionStats> = self
            .extensions
            .into_iter()
            .map(|(extension, (count, bytes))| ExtensionStats {
                extension,
                count,
                bytes,
                share: if total_bytes > 0 {
                    bytes as f64 / total_bytes as f64 * 100.0
                } else {
                    0.0
                },
            })
            .collect();
        extensions.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.extension.cmp(&b.extension)));

        let growth = (span_days > 0).then(|| {
            let bytes_per_day = total_bytes as f64 / span_days as f64;
            GrowthRate {
                bytes_per_day,
                bytes_per_month: bytes_per_day * 30.0,
                bytes_per_year: bytes_per_day * 365.0,
            }
        });

        BucketStats {
            total_files: self.total_files,
            total_bytes,
            oldest: self.oldest,
            newest: self.newest,
            span_days,
            extensions,
            growth,
        }
    }
}

/// Text after the last `.` of the key, lower-cased; `no_ext` without a dot.
pub fn extension_of(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => "no_ext".to_string(),
    }
}

/// Human-readable size in binary units with two decimals.
pub fn format_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}
