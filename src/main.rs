//! Flight Globe - animated flight paths over a 3D globe
//!
//! CLI commands:
//! - view: Open the interactive globe window
//! - snapshot: Render one frame to a PNG
//! - inspect: Build the route visuals headlessly and print a summary

mod arc;
mod config;
mod flight_paths;
mod geo;
mod logging;
mod marker;
mod particle;
mod path;
mod routes;
mod scene;
mod viewer;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::flight_paths::{FlightPathSet, RebuildOutcome};
use crate::routes::Route;
use crate::scene::HeadlessScene;

#[derive(Parser)]
#[command(name = "flight_globe")]
#[command(about = "Animated flight-path arcs over a 3D globe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to globe.yaml config
    #[arg(short, long, default_value = "globe.yaml", global = true)]
    config: PathBuf,

    /// Route file (JSON array or YAML list); overrides FLIGHT_GLOBE_ROUTES
    #[arg(short, long, global = true)]
    routes: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive globe viewer
    View,

    /// Render a single frame to a PNG
    Snapshot {
        /// Animation time in seconds
        #[arg(short, long, default_value = "2.0")]
        time: f64,

        /// Image width and height in pixels
        #[arg(short, long, default_value = "800")]
        size: u32,

        /// Output PNG path
        #[arg(short, long, default_value = "snapshot.png")]
        output: PathBuf,
    },

    /// Build every route without a window and print what would be drawn
    Inspect {
        /// Animation time to advance to before reporting particle state
        #[arg(short, long, default_value = "0.0")]
        time: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // .env first so the log directory can be overridden
    let env = config::Environment::load();
    logging::init_logging(&env.log_dir)?;
    tracing::info!("Flight Globe starting up");
    tracing::debug!("CLI args parsed: config={:?} routes={:?}", cli.config, cli.routes);

    let config = if cli.config.exists() {
        tracing::info!("Loading config from {:?}", cli.config);
        config::Config::load(&cli.config)?
    } else {
        tracing::warn!("Config file not found: {:?}, using defaults", cli.config);
        config::Config::default()
    };

    let routes_file = cli.routes.or(env.routes_file);
    let routes = load_route_list(routes_file.as_ref()).await;
    tracing::info!("{} routes loaded", routes.len());

    match cli.command {
        Commands::View => {
            tracing::info!("Launching globe viewer");
            viewer::run_viewer(config, routes, routes_file)?;
        }

        Commands::Snapshot { time, size, output } => {
            tracing::info!("Rendering snapshot at t={} to {:?}", time, output);
            viewer::snapshot(config, routes, time, size, &output)?;
        }

        Commands::Inspect { time } => {
            inspect(&config, &routes, time)?;
        }
    }

    Ok(())
}

/// Routes from the given file, or the built-in sample set
async fn load_route_list(path: Option<&PathBuf>) -> Vec<Route> {
    let Some(path) = path else {
        tracing::info!("No route file given, using sample routes");
        return routes::sample_routes();
    };

    match routes::load_routes(path).await {
        Ok(batch) => {
            for e in &batch.rejected {
                tracing::warn!("Ignoring route record: {}", e);
            }
            batch.routes
        }
        Err(e) => {
            tracing::warn!("Failed to load routes from {:?}: {}, using sample routes", path, e);
            routes::sample_routes()
        }
    }
}

/// Print what the viewer would draw
fn inspect(config: &config::Config, routes: &[Route], time: f64) -> anyhow::Result<()> {
    let mut flight_paths = FlightPathSet::new(config.flight_path_settings());
    let mut scene = HeadlessScene::new();

    let (handle, skipped) = match flight_paths.apply_routes(routes, Some(&mut scene)) {
        RebuildOutcome::Rebuilt { handle, skipped, .. } => (handle, skipped),
        RebuildOutcome::Unchanged | RebuildOutcome::SceneNotReady => {
            anyhow::bail!("headless scene rejected the route list")
        }
    };
    flight_paths.tick(handle, time)?;

    println!("Globe radius {}, t={:.2}s", config.globe.radius, time);
    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>7} {:>6} {:>5}",
        "ROUTE", "CHORD", "APEX", "SAMPLES", "PHASE", "TRAIL", "OBJS"
    );
    for set in flight_paths.sets() {
        let (Some(path), Some(particle)) = (set.path(), set.particle()) else {
            continue;
        };
        println!(
            "{:<12} {:>8.3} {:>8.3} {:>8} {:>7.3} {:>6} {:>5}",
            set.route_id(),
            particle.curve().chord_length(),
            particle.curve().apex_height(),
            path.positions().len(),
            particle.phase(),
            particle.trail().len(),
            scene.count_for_route(set.route_id()),
        );
    }

    if !skipped.is_empty() {
        println!("\nNot drawn:");
        for (id, e) in &skipped {
            println!("  {:<12} {}", id, e);
        }
    }

    println!(
        "\n{} routes, {} scene objects ({} added, {} removed)",
        flight_paths.len(),
        scene.len(),
        scene.total_added(),
        scene.total_removed()
    );
    Ok(())
}
