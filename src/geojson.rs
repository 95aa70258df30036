//! GeoJSON documents produced by a run.
//!
//! Features are grouped per world in the order their world first produced a
//! feature; within a world, features keep route order.

use crate::dataset::Route;
use crate::error::{BuildError, Result};
use crate::geometry::GeometryStream;
use crate::loader::value::number_value;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Properties copied from the route onto its feature.
///
/// Values are carried over as written in the route module. Absent optional
/// fields become `null`, except `sports` (`[]`), `event_only` and `lap`
/// (`false`); a route without a name gets no `name` property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    pub slug: String,
    pub world: String,
    pub distance_km: Option<Value>,
    pub elevation_m: Option<Value>,
    pub strava_segment_id: Option<Value>,
    pub strava_segment_url: Option<Value>,
    pub zwift_insider_url: Option<Value>,
    pub whats_on_zwift_url: Option<Value>,
    pub sports: Value,
    pub event_only: Value,
    pub lap: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStringGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]` pairs
    #[serde(serialize_with = "serialize_coordinates")]
    pub coordinates: Vec<[f64; 2]>,
}

/// Integral coordinates are written without a fraction, as `JSON.stringify`
/// would.
fn serialize_coordinates<S: Serializer>(
    coordinates: &[[f64; 2]],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(coordinates.len()))?;
    for [x, y] in coordinates {
        seq.serialize_element(&[number_value(*x), number_value(*y)])?;
    }
    seq.end()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: FeatureProperties,
    pub geometry: LineStringGeometry,
}

impl Feature {
    /// Feature for `route` with the geometry of `stream`.
    pub fn from_route(route: &Route, stream: &GeometryStream) -> Self {
        let line = stream.line_string();
        Self {
            kind: "Feature".to_string(),
            properties: FeatureProperties {
                id: route.id.clone(),
                name: route.name.clone(),
                slug: route.slug.clone(),
                world: route.world.clone(),
                distance_km: route.distance.clone(),
                elevation_m: route.elevation.clone(),
                strava_segment_id: route.strava_segment_id.clone(),
                strava_segment_url: route.strava_segment_url.clone(),
                zwift_insider_url: route.zwift_insider_url.clone(),
                whats_on_zwift_url: route.whats_on_zwift_url.clone(),
                sports: route
                    .sports
                    .clone()
                    .unwrap_or_else(|| Value::Array(Vec::new())),
                event_only: route.event_only.clone().unwrap_or(Value::Bool(false)),
                lap: route.lap.clone().unwrap_or(Value::Bool(false)),
            },
            geometry: LineStringGeometry {
                kind: "LineString".to_string(),
                coordinates: line.coords().map(|c| [c.x, c.y]).collect(),
            },
        }
    }
}

/// All features of one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(world: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            name: world.into(),
            features,
        }
    }

    /// File name used for this collection: `<world>.geojson`.
    pub fn file_name(&self) -> String {
        format!("{}.geojson", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub world: String,
    pub file: String,
    #[serde(rename = "featureCount")]
    pub feature_count: usize,
}

/// Summary of the files written by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// RFC 3339 UTC timestamp
    pub generated_at: String,
    pub worlds: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(worlds: Vec<ManifestEntry>) -> Self {
        Self {
            generated_at: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            worlds,
        }
    }
}

/// Features accumulated per world slug.
#[derive(Debug, Clone, Default)]
pub struct WorldFeatures {
    order: Vec<String>,
    by_world: HashMap<String, Vec<Feature>>,
}

impl WorldFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a feature to the list of `world`, creating the list on first use.
    pub fn push(&mut self, world: &str, feature: Feature) {
        if !self.by_world.contains_key(world) {
            self.order.push(world.to_string());
        }
        self.by_world
            .entry(world.to_string())
            .or_default()
            .push(feature);
    }

    pub fn get(&self, world: &str) -> Option<&[Feature]> {
        self.by_world.get(world).map(Vec::as_slice)
    }

    pub fn world_count(&self) -> usize {
        self.order.len()
    }

    pub fn feature_count(&self) -> usize {
        self.by_world.values().map(Vec::len).sum()
    }

    /// One collection per world with at least one feature, in first-seen order.
    pub fn into_collections(mut self) -> Vec<FeatureCollection> {
        self.order
            .into_iter()
            .filter_map(|world| {
                let features = self.by_world.remove(&world)?;
                if features.is_empty() {
                    return None;
                }
                Some(FeatureCollection::new(world, features))
            })
            .collect()
    }
}

/// Write `value` as pretty-printed JSON, replacing any existing file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| BuildError::json(path, e))?;
    std::fs::write(path, text).map_err(|e| BuildError::io(path, e))
}
