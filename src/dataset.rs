//! Route and world definitions loaded from zwift-data.
//!
//! The `routes` and `worlds` exports are trusted structurally: a missing or
//! non-array export yields an empty collection, and entries that are not
//! objects are skipped with a warning. Field values are not validated.

use crate::config::BuildConfig;
use crate::error::Result;
use crate::loader::{Exports, ModuleLoader};
use crate::SegmentId;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// One rideable route.
///
/// Only `slug`, `world` and `stravaSegmentId` drive the build. The remaining
/// fields are copied onto the output feature as they appear in the source,
/// so a value of an unexpected type never drops the route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "string_or_default")]
    pub slug: String,
    #[serde(default)]
    pub name: Option<Value>,
    /// Slug of the world this route is in
    #[serde(default, deserialize_with = "string_or_default")]
    pub world: String,
    /// Number or string; absent means the route has no geometry source
    #[serde(default)]
    pub strava_segment_id: Option<Value>,
    #[serde(default)]
    pub strava_segment_url: Option<Value>,
    #[serde(default)]
    pub zwift_insider_url: Option<Value>,
    #[serde(default)]
    pub whats_on_zwift_url: Option<Value>,
    /// Kilometres
    #[serde(default)]
    pub distance: Option<Value>,
    /// Metres
    #[serde(default)]
    pub elevation: Option<Value>,
    #[serde(default)]
    pub sports: Option<Value>,
    #[serde(default)]
    pub event_only: Option<Value>,
    #[serde(default)]
    pub lap: Option<Value>,
}

impl Route {
    /// The Strava segment to fetch geometry from, if the route has one.
    pub fn segment_id(&self) -> Option<SegmentId> {
        self.strava_segment_id
            .as_ref()
            .and_then(SegmentId::from_value)
    }
}

/// A Zwift world. Only `slug` is used; everything else is kept as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    #[serde(default, deserialize_with = "string_or_default")]
    pub slug: String,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Strings pass through; any other value becomes an empty string.
fn string_or_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

/// Load the `routes` export of the module at `path`.
pub fn load_routes(loader: &mut ModuleLoader, path: &Path) -> Result<Vec<Route>> {
    let exports = loader.load(path)?;
    Ok(collection(&exports, "routes", path))
}

/// Load the `worlds` export of the module at `path`.
pub fn load_worlds(loader: &mut ModuleLoader, path: &Path) -> Result<Vec<World>> {
    let exports = loader.load(path)?;
    Ok(collection(&exports, "worlds", path))
}

fn collection<T: DeserializeOwned>(exports: &Exports, name: &str, path: &Path) -> Vec<T> {
    let items = match exports.get(name) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            warn!(
                "[WARN] Export '{}' of {} is not an array ({}), using an empty list",
                name,
                path.display(),
                json_type(other)
            );
            return Vec::new();
        }
        None => {
            warn!(
                "[WARN] {} has no '{}' export, using an empty list",
                path.display(),
                name
            );
            return Vec::new();
        }
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match T::deserialize(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[SKIP] {}[{}] has an unexpected shape: {}", name, index, e);
                None
            }
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Routes and worlds of one zwift-data checkout.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub routes: Vec<Route>,
    pub worlds: Vec<World>,
}

impl Dataset {
    /// Load both modules named by `config` through `loader`.
    pub fn load(loader: &mut ModuleLoader, config: &BuildConfig) -> Result<Self> {
        let routes = load_routes(loader, &config.routes_path())?;
        let worlds = load_worlds(loader, &config.worlds_path())?;
        info!(
            "[Dataset] Loaded {} routes and {} worlds from {}",
            routes.len(),
            worlds.len(),
            config.data_dir.display()
        );
        Ok(Self { routes, worlds })
    }

    pub fn world_slugs(&self) -> HashSet<&str> {
        self.worlds.iter().map(|w| w.slug.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_route_defaults() {
        let route: Route = serde_json::from_value(json!({
            "slug": "tempus-fugit",
            "name": "Tempus Fugit",
            "world": "watopia",
            "stravaSegmentId": 21343975,
            "sports": null,
        }))
        .unwrap();
        assert_eq!(route.id, None);
        assert_eq!(route.name, Some(json!("Tempus Fugit")));
        assert_eq!(route.sports, None);
        assert_eq!(route.event_only, None);
        assert_eq!(route.lap, None);
        assert_eq!(route.segment_id(), Some(SegmentId::new("21343975")));
    }

    #[test]
    fn test_route_without_segment() {
        let route: Route = serde_json::from_value(json!({
            "slug": "no-segment",
            "world": "watopia",
            "stravaSegmentId": null,
            "eventOnly": true,
        }))
        .unwrap();
        assert_eq!(route.segment_id(), None);
        assert_eq!(route.event_only, Some(json!(true)));
    }

    #[test]
    fn test_world_keeps_metadata() {
        let world: World = serde_json::from_value(json!({
            "id": 1,
            "name": "Watopia",
            "slug": "watopia",
            "bounds": [[-11.6, 166.9], [-11.7, 167.0]],
        }))
        .unwrap();
        assert_eq!(world.slug, "watopia");
        assert_eq!(world.metadata["id"], json!(1));
        assert!(world.metadata.contains_key("bounds"));
    }

    #[test]
    fn test_unexpected_field_types_keep_the_route() {
        let route: Route = serde_json::from_value(json!({
            "slug": "drifted",
            "name": 42,
            "world": "watopia",
            "stravaSegmentId": "123",
            "distance": "12.3",
            "sports": ["cycling", null],
            "stravaSegmentUrl": 12345,
            "lap": "yes",
        }))
        .unwrap();
        assert_eq!(route.slug, "drifted");
        assert_eq!(route.name, Some(json!(42)));
        assert_eq!(route.distance, Some(json!("12.3")));
        assert_eq!(route.sports, Some(json!(["cycling", null])));
        assert_eq!(route.strava_segment_url, Some(json!(12345)));
        assert_eq!(route.segment_id(), Some(SegmentId::new("123")));
    }

    #[test]
    fn test_non_string_world_is_empty_slug() {
        let route: Route =
            serde_json::from_value(json!({"slug": "a", "world": 5, "stravaSegmentId": 1})).unwrap();
        assert_eq!(route.world, "");
    }

    #[test]
    fn test_load_routes_skips_non_object_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("routes.ts");
        fs::write(
            &path,
            r#"export const routes = [
  { slug: "a", world: "watopia", stravaSegmentId: 1 },
  "not-a-route",
  { slug: "b", world: "london", distance: "far", sports: ["cycling", null] },
];
"#,
        )
        .unwrap();

        let routes = load_routes(&mut ModuleLoader::new(), &path).unwrap();
        let slugs: Vec<&str> = routes.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b"]);
        assert_eq!(routes[1].distance, Some(json!("far")));
    }

    #[test]
    fn test_missing_export_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("worlds.ts");
        fs::write(&path, "export const places = [];\n").unwrap();

        let worlds = load_worlds(&mut ModuleLoader::new(), &path).unwrap();
        assert!(worlds.is_empty());
    }
}
