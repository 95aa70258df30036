//! End-to-end build: load routes and worlds, resolve geometry, write
//! per-world GeoJSON and the manifest.
//!
//! Routes are processed strictly in dataset order, one at a time, so the
//! fetch counter that drives the rate limiter is simply a running total.

use crate::config::BuildConfig;
use crate::dataset::Dataset;
use crate::error::{BuildError, Result};
use crate::geojson::{write_json, Feature, Manifest, ManifestEntry, WorldFeatures};
use crate::geometry::GeometryResolver;
use crate::http::{RateLimiter, StravaStreamClient, StreamSource};
use crate::loader::ModuleLoader;
use crate::stream_cache::StreamCache;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub routes_seen: usize,
    pub features_written: usize,
    pub skipped_no_segment: usize,
    pub skipped_unknown_world: usize,
    pub skipped_no_geometry: usize,
    /// Segments retrieved over the network
    pub fetched: u32,
    pub from_cache: usize,
    /// GeoJSON files written, excluding the manifest
    pub files_written: Vec<PathBuf>,
    /// `None` when no world produced features
    pub manifest: Option<PathBuf>,
}

/// A configured build run.
pub struct Pipeline<S> {
    config: BuildConfig,
    resolver: GeometryResolver<S>,
}

impl Pipeline<StravaStreamClient> {
    /// Pipeline that fetches from strava.com.
    pub fn from_config(config: BuildConfig) -> Result<Self> {
        let client = StravaStreamClient::new(&config)?;
        Ok(Self::with_source(config, client))
    }
}

impl<S: StreamSource> Pipeline<S> {
    /// Pipeline that fetches segment streams from `source`.
    pub fn with_source(config: BuildConfig, source: S) -> Self {
        let resolver = GeometryResolver::new(
            StreamCache::new(config.cache_dir.clone()),
            source,
            RateLimiter::new(config.fetch_delay),
        );
        Self { config, resolver }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn resolver(&self) -> &GeometryResolver<S> {
        &self.resolver
    }

    /// Run the whole build.
    ///
    /// Fatal: directory creation, module loading, cache and output writes.
    /// Everything else skips the affected route.
    pub async fn run(&self) -> Result<RunSummary> {
        create_dir(&self.config.out_dir)?;
        create_dir(&self.config.cache_dir)?;

        let mut loader = ModuleLoader::new();
        let dataset = Dataset::load(&mut loader, &self.config)?;

        let (grouped, mut summary) = self.assemble(&dataset).await?;
        self.write_outputs(grouped, &mut summary)?;

        info!(
            "[Pipeline] {} routes, {} features, {} fetched, {} cached, skipped {} without segment, {} unknown world, {} without geometry",
            summary.routes_seen,
            summary.features_written,
            summary.fetched,
            summary.from_cache,
            summary.skipped_no_segment,
            summary.skipped_unknown_world,
            summary.skipped_no_geometry
        );
        Ok(summary)
    }

    /// Resolve every route of `dataset` into per-world features.
    pub async fn assemble(&self, dataset: &Dataset) -> Result<(WorldFeatures, RunSummary)> {
        let worlds = dataset.world_slugs();
        let mut grouped = WorldFeatures::new();
        let mut summary = RunSummary::default();

        for route in &dataset.routes {
            summary.routes_seen += 1;

            let Some(segment_id) = route.segment_id() else {
                warn!(
                    "[SKIP] Route \"{}\" has no Strava segment id; skipping",
                    route.slug
                );
                summary.skipped_no_segment += 1;
                continue;
            };

            if !worlds.contains(route.world.as_str()) {
                warn!(
                    "[SKIP] Route \"{}\" references unknown world \"{}\"",
                    route.slug, route.world
                );
                summary.skipped_unknown_world += 1;
                continue;
            }

            let Some(stream) = self.resolver.resolve(&segment_id, summary.fetched).await? else {
                warn!(
                    "[WARN] Unable to load lat/lng for \"{}\" ({})",
                    route.slug, segment_id
                );
                summary.skipped_no_geometry += 1;
                continue;
            };
            if stream.fetched {
                summary.fetched += 1;
            } else {
                summary.from_cache += 1;
            }

            if stream.is_empty() {
                warn!(
                    "[WARN] Lat/Lng stream empty for \"{}\" ({})",
                    route.slug, segment_id
                );
                summary.skipped_no_geometry += 1;
                continue;
            }

            let invalid = stream.invalid_point_count();
            if invalid > 0 {
                warn!(
                    "[WARN] {} of {} points for \"{}\" are outside WGS84 bounds",
                    invalid,
                    stream.latlng.len(),
                    route.slug
                );
            }

            grouped.push(&route.world, Feature::from_route(route, &stream));
        }

        Ok((grouped, summary))
    }

    fn write_outputs(&self, grouped: WorldFeatures, summary: &mut RunSummary) -> Result<()> {
        let mut entries = Vec::new();

        for collection in grouped.into_collections() {
            let file = collection.file_name();
            let path = self.config.out_dir.join(&file);
            write_json(&path, &collection)?;
            info!(
                "[OK] Wrote {} features for world \"{}\" -> {}",
                collection.features.len(),
                collection.name,
                path.display()
            );

            summary.features_written += collection.features.len();
            summary.files_written.push(path);
            entries.push(ManifestEntry {
                world: collection.name,
                file,
                feature_count: collection.features.len(),
            });
        }

        if entries.is_empty() {
            warn!("[WARN] No GeoJSON files were produced.");
            return Ok(());
        }

        let manifest_path = self.config.manifest_path();
        write_json(&manifest_path, &Manifest::new(entries))?;
        info!("[OK] Manifest written to {}", manifest_path.display());
        summary.manifest = Some(manifest_path);
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| BuildError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
