use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use world_geojson::{BuildConfig, PathOptions, Pipeline, Result, DATA_DIR_ENV};

#[derive(Parser, Debug)]
#[command(
    name = "build-world-geojson",
    about = "Build one GeoJSON FeatureCollection per Zwift world from zwift-data routes"
)]
struct Cli {
    /// zwift-data checkout holding src/routes.ts and src/worlds.ts.
    /// Defaults to ../zwift-data.
    #[arg(long, env = DATA_DIR_ENV)]
    data: Option<PathBuf>,

    /// Output directory for <world>.geojson and manifest.json.
    /// Defaults to ./zwift-world-geojson.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Segment stream cache directory. Defaults to <out>/.cache.
    #[arg(long)]
    cache: Option<PathBuf>,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().map_err(|e| world_geojson::BuildError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    let config = BuildConfig::from_paths(
        PathOptions {
            data: cli.data,
            out: cli.out,
            cache: cli.cache,
        },
        &cwd,
    );
    config.validate()?;

    Pipeline::from_config(config)?.run().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::FAILURE
        }
    }
}
