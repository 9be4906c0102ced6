//! On-disk snapshot of the last device fetch, gating upstream requests.
//!
//! The cache is an optimization over a rate-limited API, never a correctness
//! dependency: every read or write failure degrades to "no cached data".

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_FILE: &str = "./daikin-cache.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Vec<Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Seconds the entry is valid for; also the polling interval it was fetched under.
    pub update_interval: u64,
}

impl CacheEntry {
    /// Seconds elapsed since the fetch, at millisecond precision.
    fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Within its TTL. Reaching the interval exactly counts as expired.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age_secs(now) < self.update_interval as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheInfo {
    pub exists: bool,
    /// Whole seconds since the fetch.
    pub age: Option<i64>,
    pub valid: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DaikinDataCache {
    path: PathBuf,
}

impl DaikinDataCache {
    /// Relative paths are resolved against the current directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        DaikinDataCache { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, data: &[Value], update_interval: u64) {
        self.save_at(data, update_interval, Utc::now());
    }

    pub fn save_at(&self, data: &[Value], update_interval: u64, now: DateTime<Utc>) {
        let entry = CacheEntry {
            data: data.to_vec(),
            timestamp: now,
            update_interval,
        };
        match self.write_entry(&entry) {
            Ok(()) => info!("Cached {} device(s) to {}", data.len(), self.path.display()),
            Err(e) => warn!("Failed to save data to cache {}: {}", self.path.display(), e),
        }
    }

    pub fn load(&self, requested_interval: u64) -> Option<Vec<Value>> {
        self.load_at(requested_interval, Utc::now())
    }

    /// Cached documents, if present, fresh, and fetched under `requested_interval`.
    pub fn load_at(&self, requested_interval: u64, now: DateTime<Utc>) -> Option<Vec<Value>> {
        let entry = match self.read_entry() {
            Ok(entry) => entry,
            Err(e) => {
                info!("No valid cache found ({}); will fetch fresh data", e);
                return None;
            }
        };

        let age = entry.age_secs(now).floor() as i64;
        if entry.update_interval != requested_interval {
            info!(
                "Cached data was fetched under a {}s interval, now {}s; will fetch fresh data",
                entry.update_interval, requested_interval
            );
            None
        } else if entry.is_fresh(now) {
            info!(
                "Loading cached data ({}s old, valid for {}s)",
                age, entry.update_interval
            );
            Some(entry.data)
        } else {
            info!(
                "Cached data is stale ({}s old, limit {}s); will fetch fresh data",
                age, entry.update_interval
            );
            None
        }
    }

    pub fn info(&self) -> CacheInfo {
        self.info_at(Utc::now())
    }

    pub fn info_at(&self, now: DateTime<Utc>) -> CacheInfo {
        match self.read_entry() {
            Ok(entry) => CacheInfo {
                exists: true,
                age: Some(entry.age_secs(now).floor() as i64),
                valid: Some(entry.is_fresh(now)),
            },
            Err(_) => CacheInfo::default(),
        }
    }

    /// Advisory; a missing file is not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Cache cleared: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear cache {}: {}", self.path.display(), e),
        }
    }

    fn read_entry(&self) -> Result<CacheEntry, String> {
        let content = fs::read_to_string(&self.path).map_err(|e| format!("read failed: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("corrupt cache file: {}", e))
    }

    /// Writes next to the target and renames, so readers never see a partial file.
    fn write_entry(&self, entry: &CacheEntry) -> Result<(), String> {
        let json = serde_json::to_string_pretty(entry).map_err(|e| format!("serialize failed: {}", e))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| format!("write {} failed: {}", tmp.display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            format!("rename to {} failed: {}", self.path.display(), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
    }

    fn documents() -> Vec<Value> {
        vec![
            json!({ "_id": "dev-1", "deviceModel": "dx4", "managementPoints": [] }),
            json!({ "_id": "dev-2", "deviceModel": "Altherma", "managementPoints": [] }),
        ]
    }

    fn cache_in(dir: &tempfile::TempDir) -> DaikinDataCache {
        DaikinDataCache::new(dir.path().join("daikin-cache.json"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save(&documents(), 300);
        assert_eq!(cache.load(300), Some(documents()));
    }

    #[test]
    fn ttl_boundary_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save_at(&documents(), 60, fetched_at());

        let just_before = fetched_at() + Duration::milliseconds(59_999);
        assert!(cache.load_at(60, just_before).is_some());
        assert!(cache.load_at(60, fetched_at() + Duration::seconds(60)).is_none());
        assert!(cache.load_at(60, fetched_at() + Duration::seconds(61)).is_none());
    }

    #[test]
    fn interval_change_invalidates_unexpired_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save_at(&documents(), 600, fetched_at());

        let now = fetched_at() + Duration::seconds(5);
        assert!(cache.load_at(600, now).is_some());
        assert!(cache.load_at(300, now).is_none());
        assert!(cache.load_at(900, now).is_none());
    }

    #[test]
    fn absent_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        assert_eq!(cache.load(30), None);
        assert_eq!(cache.info(), CacheInfo { exists: false, age: None, valid: None });
        cache.clear();
    }

    #[test]
    fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        fs::write(cache.path(), "{ \"data\": [1, 2").unwrap();
        assert_eq!(cache.load(30), None);
        assert!(!cache.info().exists);

        fs::write(cache.path(), r#"{"data": "nope", "timestamp": 0, "updateInterval": 30}"#).unwrap();
        assert_eq!(cache.load(30), None);
    }

    #[test]
    fn unwritable_location_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DaikinDataCache::new(dir.path().join("missing-dir").join("cache.json"));
        cache.save(&documents(), 30);
        assert_eq!(cache.load(30), None);
    }

    #[test]
    fn file_layout_matches_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save_at(&documents(), 120, fetched_at());

        let raw: Value = serde_json::from_str(&fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["timestamp"], json!(fetched_at().timestamp_millis()));
        assert_eq!(raw["updateInterval"], json!(120));
        assert_eq!(raw["data"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn info_reports_age_and_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save_at(&documents(), 60, fetched_at());

        let info = cache.info_at(fetched_at() + Duration::milliseconds(42_500));
        assert_eq!(info, CacheInfo { exists: true, age: Some(42), valid: Some(true) });

        let info = cache.info_at(fetched_at() + Duration::seconds(90));
        assert_eq!(info.valid, Some(false));

        cache.clear();
        assert!(!cache.info().exists);
    }

    #[test]
    fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        // A non-empty directory at the target path makes the rename fail.
        fs::create_dir(cache.path()).unwrap();
        fs::write(cache.path().join("keep"), "x").unwrap();

        cache.save_at(&documents(), 60, fetched_at());

        assert!(!dir.path().join("daikin-cache.json.tmp").exists());
        assert!(cache.load_at(60, fetched_at()).is_none());
    }

    #[test]
    fn resolves_relative_paths() {
        let cache = DaikinDataCache::new("daikin-cache.json");
        assert!(cache.path().is_absolute());
    }
}
