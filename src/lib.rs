//! # World GeoJSON
//!
//! Builds one GeoJSON FeatureCollection per Zwift world from the route and
//! world definitions of the zwift-data repository, using Strava segment
//! streams for the route geometry.
//!
//! This library provides:
//! - Loading of the zwift-data TypeScript modules without a TypeScript
//!   toolchain ([`loader`], [`dataset`])
//! - A content-addressed on-disk cache of segment streams ([`stream_cache`])
//! - Politely rate-limited stream fetching ([`http`], [`geometry`])
//! - Feature assembly, per-world grouping and the run manifest
//!   ([`geojson`], [`pipeline`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use world_geojson::{BuildConfig, PathOptions, Pipeline};
//!
//! # async fn run() -> world_geojson::Result<()> {
//! let cwd = std::env::current_dir().expect("working directory");
//! let config = BuildConfig::from_paths(PathOptions::default(), &cwd);
//! config.validate()?;
//!
//! let summary = Pipeline::from_config(config)?.run().await?;
//! println!("{} features written", summary.features_written);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// Unified error handling
pub mod error;
pub use error::{BuildError, Result};

// Paths and run settings
pub mod config;
pub use config::{BuildConfig, PathOptions, DATA_DIR_ENV};

// TypeScript module loading (resolver + literal evaluator)
pub mod loader;
pub use loader::{Exports, ModuleCache, ModuleLoader, ModuleResolver};

// Route and world definitions
pub mod dataset;
pub use dataset::{load_routes, load_worlds, Dataset, Route, World};

// On-disk segment stream cache
pub mod stream_cache;
pub use stream_cache::{cache_key, StreamCache};

// HTTP client for segment streams
pub mod http;
pub use http::{RateLimiter, StravaStreamClient, StreamResponse, StreamSource};

// Cache-or-fetch geometry resolution
pub mod geometry;
pub use geometry::{GeometryResolver, GeometryStream};

// GeoJSON documents and manifest
pub mod geojson;
pub use geojson::{Feature, FeatureCollection, Manifest, ManifestEntry, WorldFeatures};

// End-to-end build
pub mod pipeline;
pub use pipeline::{Pipeline, RunSummary};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use world_geojson::GpsPoint;
/// let point = GpsPoint::new(-11.6363, 166.9425); // Watopia
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Opaque Strava segment identifier, kept in its string form.
///
/// zwift-data stores segment ids as numbers or strings; both map to the same
/// string so the cache key does not depend on how the id was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Segment id from a route's `stravaSegmentId` value.
    ///
    /// Returns `None` for values a route cannot be resolved with: `null`,
    /// `false`, `0`, `""`, arrays and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !loader::value::is_truthy(value) {
            return None;
        }
        match value {
            Value::Array(_) | Value::Object(_) => None,
            other => loader::value::scalar_to_string(other).map(Self),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segment_id_from_number_and_string() {
        assert_eq!(
            SegmentId::from_value(&json!(12744502)),
            Some(SegmentId::new("12744502"))
        );
        assert_eq!(
            SegmentId::from_value(&json!("12744502")),
            Some(SegmentId::new("12744502"))
        );
        assert_eq!(
            SegmentId::from_value(&json!(123.0)),
            Some(SegmentId::new("123"))
        );
    }

    #[test]
    fn test_segment_id_falsy_values() {
        for value in [json!(null), json!(0), json!(""), json!(false), json!([1])] {
            assert_eq!(SegmentId::from_value(&value), None, "{}", value);
        }
    }

    #[test]
    fn test_gps_point_validity() {
        assert!(GpsPoint::new(-11.64, 166.95).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }
}
