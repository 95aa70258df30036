//! Cache-or-fetch resolution of segment geometry.

use crate::error::Result;
use crate::http::{RateLimiter, StreamSource};
use crate::loader::value::is_truthy;
use crate::stream_cache::StreamCache;
use crate::{GpsPoint, SegmentId};
use geo::{Coord, LineString};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

/// Resolved shape of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryStream {
    pub segment_id: SegmentId,
    /// Points in stream order
    pub latlng: Vec<GpsPoint>,
    /// Cumulative distance per point, when the payload carries it
    pub distance: Option<Vec<f64>>,
    /// Retrieved over the network during this run (false: served from cache)
    pub fetched: bool,
}

impl GeometryStream {
    /// Build from a provider payload.
    ///
    /// Points that are not a `[lat, lng]` pair of numbers are dropped with a
    /// warning; a missing or non-array `latlng` gives an empty geometry.
    pub fn from_payload(segment_id: SegmentId, payload: &Value, fetched: bool) -> Self {
        let raw_points = payload
            .get("latlng")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let latlng: Vec<GpsPoint> = raw_points
            .iter()
            .filter_map(|point| <[f64; 2]>::deserialize(point).ok())
            .map(|[lat, lng]| GpsPoint::new(lat, lng))
            .collect();

        let dropped = raw_points.len() - latlng.len();
        if dropped > 0 {
            warn!(
                "[WARN] Dropped {} malformed points from segment {}",
                dropped, segment_id
            );
        }

        let distance = payload
            .get("distance")
            .and_then(|d| Vec::<f64>::deserialize(d).ok());

        Self {
            segment_id,
            latlng,
            distance,
            fetched,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.latlng.is_empty()
    }

    pub fn invalid_point_count(&self) -> usize {
        self.latlng.iter().filter(|p| !p.is_valid()).count()
    }

    /// Line in GeoJSON axis order (x = longitude, y = latitude).
    pub fn line_string(&self) -> LineString<f64> {
        LineString::new(
            self.latlng
                .iter()
                .map(|p| Coord {
                    x: p.longitude,
                    y: p.latitude,
                })
                .collect(),
        )
    }
}

/// Why a freshly fetched payload cannot be used.
fn payload_problem(payload: &Value) -> Option<String> {
    if !is_truthy(payload) {
        return Some("empty payload".to_string());
    }
    if let Some(error) = payload.get("error").filter(|e| is_truthy(e)) {
        return Some(format!("error {}", error));
    }
    match payload.get("latlng") {
        Some(Value::Array(_)) => None,
        _ => Some("no latlng stream".to_string()),
    }
}

/// Resolves segment ids to geometry through the cache, falling back to a
/// [`StreamSource`].
pub struct GeometryResolver<S> {
    cache: StreamCache,
    source: S,
    limiter: RateLimiter,
}

impl<S: StreamSource> GeometryResolver<S> {
    pub fn new(cache: StreamCache, source: S, limiter: RateLimiter) -> Self {
        Self {
            cache,
            source,
            limiter,
        }
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Geometry for `segment_id`, or `None` when the provider could not
    /// supply a usable stream.
    ///
    /// `prior_fetches` is the number of successful network fetches earlier in
    /// the run; any value above zero delays the request. Only a failure to
    /// write the cache is an error.
    pub async fn resolve(
        &self,
        segment_id: &SegmentId,
        prior_fetches: u32,
    ) -> Result<Option<GeometryStream>> {
        if let Some(payload) = self.cache.read(segment_id) {
            debug!("[CACHE] Segment {} served from cache", segment_id);
            return Ok(Some(GeometryStream::from_payload(
                segment_id.clone(),
                &payload,
                false,
            )));
        }

        self.limiter.wait_if_needed(prior_fetches).await;

        let response = match self.source.fetch_segment(segment_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[WARN] Request for segment {} failed: {}", segment_id, e);
                return Ok(None);
            }
        };

        if !response.is_success() {
            warn!(
                "[WARN] Strava response {} for segment {}",
                response.status, segment_id
            );
            return Ok(None);
        }

        let payload: Value = match serde_json::from_str(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "[WARN] Unexpected Strava payload for segment {}: {}",
                    segment_id, e
                );
                return Ok(None);
            }
        };

        if let Some(problem) = payload_problem(&payload) {
            warn!(
                "[WARN] Unexpected Strava payload for segment {}: {}",
                segment_id, problem
            );
            return Ok(None);
        }

        self.cache.write(segment_id, &response.body)?;
        Ok(Some(GeometryStream::from_payload(
            segment_id.clone(),
            &payload,
            true,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::http::StreamResponse;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves one canned response and counts requests.
    struct CannedSource {
        response: Option<StreamResponse>,
        calls: AtomicU32,
    }

    impl CannedSource {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: Some(StreamResponse {
                    status,
                    body: body.to_string(),
                }),
                calls: AtomicU32::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                response: None,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl StreamSource for CannedSource {
        async fn fetch_segment(&self, _segment_id: &SegmentId) -> Result<StreamResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.response.clone().ok_or_else(|| BuildError::Http {
                message: "connection refused".to_string(),
                status_code: None,
            })
        }
    }

    fn resolver(tmp: &TempDir, source: CannedSource) -> GeometryResolver<CannedSource> {
        GeometryResolver::new(
            StreamCache::new(tmp.path()),
            source,
            RateLimiter::new(Duration::ZERO),
        )
    }

    #[test]
    fn test_line_string_swaps_axes() {
        let stream = GeometryStream::from_payload(
            SegmentId::new("1"),
            &json!({"latlng": [[-11.64, 166.95], [-11.65, 166.96]]}),
            false,
        );
        let coords: Vec<(f64, f64)> = stream.line_string().coords().map(|c| (c.x, c.y)).collect();
        assert_eq!(coords, vec![(166.95, -11.64), (166.96, -11.65)]);
    }

    #[test]
    fn test_malformed_points_are_dropped() {
        let stream = GeometryStream::from_payload(
            SegmentId::new("1"),
            &json!({"latlng": [[1, 2], [3, 4], [5], "x", [6, null]]}),
            false,
        );
        assert_eq!(
            stream.latlng,
            vec![GpsPoint::new(1.0, 2.0), GpsPoint::new(3.0, 4.0)]
        );
    }

    #[test]
    fn test_malformed_latlng_is_empty() {
        let stream = GeometryStream::from_payload(
            SegmentId::new("1"),
            &json!({"latlng": "nope"}),
            false,
        );
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_then_cache() {
        let tmp = TempDir::new().unwrap();
        let body = r#"{"latlng":[[1.0,2.0],[3.0,4.0]],"distance":[0.0,314.5]}"#;
        let resolver = resolver(&tmp, CannedSource::new(200, body));
        let id = SegmentId::new("123");

        let first = resolver.resolve(&id, 0).await.unwrap().unwrap();
        assert!(first.fetched);
        assert_eq!(first.latlng, vec![GpsPoint::new(1.0, 2.0), GpsPoint::new(3.0, 4.0)]);
        assert_eq!(first.distance, Some(vec![0.0, 314.5]));

        let second = resolver.resolve(&id, 1).await.unwrap().unwrap();
        assert!(!second.fetched);
        assert_eq!(second.latlng, first.latlng);
        assert_eq!(resolver.source().calls(), 1);

        let cached = std::fs::read_to_string(resolver.cache().path_for(&id)).unwrap();
        assert_eq!(cached, body);
    }

    #[tokio::test]
    async fn test_existing_cache_file_is_reused() {
        let tmp = TempDir::new().unwrap();
        // Written by a previous build; named by sha1("123")
        std::fs::write(
            tmp.path().join("40bd001563085fc35165329ea1ff5c5ecbdbbeef.json"),
            r#"{"latlng":[[1,2],[3,4]]}"#,
        )
        .unwrap();
        let resolver = resolver(&tmp, CannedSource::unreachable());

        let stream = resolver
            .resolve(&SegmentId::new("123"), 0)
            .await
            .unwrap()
            .unwrap();
        assert!(!stream.fetched);
        assert_eq!(stream.latlng.len(), 2);
        assert_eq!(resolver.source().calls(), 0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_none() {
        let tmp = TempDir::new().unwrap();
        let resolver = resolver(&tmp, CannedSource::new(429, "Too Many Requests"));
        let id = SegmentId::new("5");

        assert!(resolver.resolve(&id, 0).await.unwrap().is_none());
        assert!(!resolver.cache().contains(&id));
    }

    #[tokio::test]
    async fn test_error_payload_is_none() {
        let tmp = TempDir::new().unwrap();
        let resolver = resolver(
            &tmp,
            CannedSource::new(200, r#"{"error":"Record Not Found"}"#),
        );
        let id = SegmentId::new("6");

        assert!(resolver.resolve(&id, 0).await.unwrap().is_none());
        assert!(!resolver.cache().contains(&id));
    }

    #[tokio::test]
    async fn test_missing_latlng_is_none() {
        let tmp = TempDir::new().unwrap();
        let resolver = resolver(&tmp, CannedSource::new(200, r#"{"distance":[0.0]}"#));

        assert!(resolver
            .resolve(&SegmentId::new("7"), 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transport_error_is_none() {
        let tmp = TempDir::new().unwrap();
        let resolver = resolver(&tmp, CannedSource::unreachable());

        assert!(resolver
            .resolve(&SegmentId::new("8"), 0)
            .await
            .unwrap()
            .is_none());
        assert_eq!(resolver.source().calls(), 1);
    }
}
