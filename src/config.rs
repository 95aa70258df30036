//! Run configuration: directory layout, module locations and fetch settings.

use crate::error::{BuildError, Result};
use crate::http::{DEFAULT_USER_AGENT, POLITE_DELAY_MS, REQUEST_TIMEOUT_SECS, STRAVA_STREAM_URL};
use crate::loader::normalize_path;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the default zwift-data directory.
pub const DATA_DIR_ENV: &str = "ZWIFT_DATA_DIR";

/// Default output directory name, relative to the working directory.
pub const DEFAULT_OUT_DIR: &str = "zwift-world-geojson";

/// Directory overrides as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct PathOptions {
    pub data: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub cache: Option<PathBuf>,
}

/// Configuration for a build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Root of the zwift-data checkout.
    pub data_dir: PathBuf,

    /// Where `<world>.geojson` files and `manifest.json` are written.
    pub out_dir: PathBuf,

    /// Segment stream cache directory.
    /// Default: `<out_dir>/.cache`
    pub cache_dir: PathBuf,

    /// Route list module, relative to `data_dir`.
    /// Default: `src/routes.ts`
    pub routes_module: PathBuf,

    /// World list module, relative to `data_dir`.
    /// Default: `src/worlds.ts`
    pub worlds_module: PathBuf,

    /// Stream endpoint with a `{segmentId}` placeholder.
    pub stream_url_template: String,

    /// User agent sent with every stream request.
    pub user_agent: String,

    /// Pause before each network fetch after the first successful one.
    /// Default: 250ms
    pub fetch_delay: Duration,

    /// Per-request timeout.
    /// Default: 30s
    pub request_timeout: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let out_dir = PathBuf::from(DEFAULT_OUT_DIR);
        Self {
            data_dir: PathBuf::from("..").join("zwift-data"),
            cache_dir: out_dir.join(".cache"),
            out_dir,
            routes_module: PathBuf::from("src").join("routes.ts"),
            worlds_module: PathBuf::from("src").join("worlds.ts"),
            stream_url_template: STRAVA_STREAM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_delay: Duration::from_millis(POLITE_DELAY_MS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl BuildConfig {
    /// Apply directory overrides relative to `cwd`.
    ///
    /// - data: `--data`, else `$ZWIFT_DATA_DIR`, else `<cwd>/../zwift-data`
    /// - out: `--out`, else `<cwd>/zwift-world-geojson`
    /// - cache: `--cache`, else `<out>/.cache`
    pub fn from_paths(options: PathOptions, cwd: &Path) -> Self {
        let defaults = Self::default();

        let data = options
            .data
            .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(|| defaults.data_dir.clone());
        let data_dir = normalize_path(&cwd.join(data));
        let out_dir = normalize_path(&cwd.join(options.out.unwrap_or(defaults.out_dir.clone())));
        let cache_dir = match options.cache {
            Some(cache) => normalize_path(&cwd.join(cache)),
            None => out_dir.join(".cache"),
        };

        Self {
            data_dir,
            out_dir,
            cache_dir,
            ..defaults
        }
    }

    /// Fail if the data directory cannot be accessed.
    pub fn validate(&self) -> Result<()> {
        std::fs::metadata(&self.data_dir)
            .map(|_| ())
            .map_err(|source| BuildError::DataDirMissing {
                path: self.data_dir.clone(),
                source,
            })
    }

    pub fn routes_path(&self) -> PathBuf {
        self.data_dir.join(&self.routes_module)
    }

    pub fn worlds_path(&self) -> PathBuf {
        self.data_dir.join(&self.worlds_module)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.out_dir.join("manifest.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_paths() {
        let cwd = Path::new("/work/ha");
        let config = BuildConfig::from_paths(
            PathOptions {
                data: Some(PathBuf::from("../zwift-data")),
                out: Some(PathBuf::from("www/geojson")),
                cache: None,
            },
            cwd,
        );
        assert_eq!(config.data_dir, PathBuf::from("/work/zwift-data"));
        assert_eq!(config.out_dir, PathBuf::from("/work/ha/www/geojson"));
        assert_eq!(config.cache_dir, PathBuf::from("/work/ha/www/geojson/.cache"));
        assert_eq!(
            config.routes_path(),
            PathBuf::from("/work/zwift-data/src/routes.ts")
        );
    }

    #[test]
    fn test_default_out_and_cache() {
        let config = BuildConfig::from_paths(
            PathOptions {
                data: Some(PathBuf::from("/srv/zwift-data")),
                out: None,
                cache: Some(PathBuf::from("/tmp/strava-cache")),
            },
            Path::new("/work"),
        );
        assert_eq!(config.data_dir, PathBuf::from("/srv/zwift-data"));
        assert_eq!(config.out_dir, PathBuf::from("/work/zwift-world-geojson"));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/strava-cache"));
        assert_eq!(config.fetch_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_missing_data_dir() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::from_paths(
            PathOptions {
                data: Some(tmp.path().join("absent")),
                ..Default::default()
            },
            tmp.path(),
        );
        assert!(matches!(
            config.validate(),
            Err(BuildError::DataDirMissing { .. })
        ));

        let config = BuildConfig::from_paths(
            PathOptions {
                data: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
            tmp.path(),
        );
        assert!(config.validate().is_ok());
    }
}
