//! Content-addressed cache of raw segment stream payloads.
//!
//! Each payload lives in `<dir>/<sha1(segment id)>.json`. Entries never
//! expire: a readable JSON file is always trusted, which keeps re-runs
//! reproducible without network access.

use crate::error::{BuildError, Result};
use crate::loader::value::is_truthy;
use crate::SegmentId;
use log::debug;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// Cache file stem for a segment: lowercase hex SHA-1 of its string form.
pub fn cache_key(segment_id: &SegmentId) -> String {
    hex::encode(Sha1::digest(segment_id.as_str().as_bytes()))
}

/// Segment stream payloads stored on disk.
#[derive(Debug, Clone)]
pub struct StreamCache {
    dir: PathBuf,
}

impl StreamCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, segment_id: &SegmentId) -> PathBuf {
        self.dir.join(format!("{}.json", cache_key(segment_id)))
    }

    pub fn contains(&self, segment_id: &SegmentId) -> bool {
        self.path_for(segment_id).is_file()
    }

    /// Cached payload for `segment_id`.
    ///
    /// Missing, unreadable or non-JSON files are misses, as are files
    /// holding a falsy JSON value such as `null`.
    pub fn read(&self, segment_id: &SegmentId) -> Option<Value> {
        let path = self.path_for(segment_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) if is_truthy(&value) => Some(value),
            Ok(_) => {
                debug!("[CACHE] Ignoring empty entry {}", path.display());
                None
            }
            Err(e) => {
                debug!("[CACHE] Ignoring unparseable entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store a raw payload exactly as received.
    pub fn write(&self, segment_id: &SegmentId, body: &str) -> Result<PathBuf> {
        let path = self.path_for(segment_id);
        std::fs::write(&path, body).map_err(|e| BuildError::io(&path, e))?;
        debug!("[CACHE] Stored segment {} -> {}", segment_id, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key(&SegmentId::new("12744502"));
        let b = cache_key(&SegmentId::new("12744502"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_cache_key_distinguishes_ids() {
        let keys: std::collections::HashSet<String> = ["1", "12", "123", "0123", "123 "]
            .iter()
            .map(|id| cache_key(&SegmentId::new(*id)))
            .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_known_digest() {
        // sha1("123")
        assert_eq!(
            cache_key(&SegmentId::new("123")),
            "40bd001563085fc35165329ea1ff5c5ecbdbbeef"
        );
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::new(tmp.path());
        let id = SegmentId::new("123");
        assert!(cache.read(&id).is_none());

        let body = r#"{"latlng":[[1,2],[3,4]],"distance":[0,157.2]}"#;
        let path = cache.write(&id, body).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), body);
        assert_eq!(cache.read(&id).unwrap()["latlng"], json!([[1, 2], [3, 4]]));
        assert!(cache.contains(&id));
    }

    #[test]
    fn test_corrupt_or_null_entry_is_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::new(tmp.path());
        let id = SegmentId::new("9");

        std::fs::write(cache.path_for(&id), "{\"latlng\": [").unwrap();
        assert!(cache.read(&id).is_none());

        std::fs::write(cache.path_for(&id), "null").unwrap();
        assert!(cache.read(&id).is_none());
    }
}
