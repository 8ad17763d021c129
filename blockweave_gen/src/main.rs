// CLI entry point: generate a box of slots and print a summary.
//
// Usage:
//   generate [OPTIONS]
//     --catalog <FILE>   Module catalog JSON (default: built-in demo catalog)
//     --config <FILE>    GenerationConfig JSON (default: built-in defaults)
//     --seed <N>         Overrides the config's seed
//     --size <X,Y,Z>     Box to collapse, from the origin (default: 16,8,16)
//     --dump             Print every collapsed slot as `x y z module`
//
// Logging goes through `tracing`'s `log` bridge to `env_logger`, so
// `RUST_LOG=blockweave_gen=debug` shows backtracking.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use blockweave_gen::catalog::{ModuleCatalog, demo_catalog};
use blockweave_gen::config::{GenerationConfig, MapShape};
use blockweave_gen::map::{CollapseOptions, Progress};
use blockweave_gen::types::Coord;
use blockweave_gen::world::World;
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "generate")]
#[command(about = "Collapse a box of blocks and report the result")]
struct Cli {
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_parser = parse_size, default_value = "16,8,16")]
    size: Coord,
    #[arg(long)]
    dump: bool,
}

fn parse_size(text: &str) -> Result<Coord, String> {
    let parts: Vec<i32> = text
        .split(',')
        .map(|p| p.trim().parse::<i32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts[..] {
        [x, y, z] if x > 0 && y > 0 && z > 0 => Ok(Coord::new(x, y, z)),
        [_, _, _] => Err("sizes must be positive".into()),
        _ => Err("expected X,Y,Z".into()),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("generate: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let catalog = match &cli.catalog {
        Some(path) => ModuleCatalog::from_json(&std::fs::read_to_string(path)?)?,
        None => demo_catalog()?,
    };
    let mut config = match &cli.config {
        Some(path) => GenerationConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => GenerationConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let MapShape::Unbounded { height, .. } = &mut config.shape {
        *height = (*height).max(cli.size.y);
    }

    let mut world = World::new(Arc::new(catalog), config)?;
    let start = Instant::now();
    let mut log_progress = |p: Progress| {
        info!(
            percent = (p.fraction() * 100.0).round() as u32,
            backtracks = p.backtracks,
            "generating"
        );
    };
    let mut options = CollapseOptions {
        progress: Some(&mut log_progress),
        ..CollapseOptions::default()
    };
    let report = world.collapse_box(Coord::ZERO, cli.size, &mut options)?;
    let elapsed = start.elapsed();

    let rooms = world.rooms();
    println!("collapsed slots:  {}", world.map().total_collapsed());
    println!("backtracks:       {}", report.backtracks);
    println!("rooms:            {}", rooms.rooms().count());
    println!("portals:          {}", rooms.portals().count());
    println!("exterior chunks:  {}", rooms.exterior_chunks().count());
    println!("elapsed:          {:.3}s", elapsed.as_secs_f64());

    if cli.dump {
        let catalog = world.catalog();
        for (pos, module) in world.map().collapsed_modules() {
            println!("{} {} {} {}", pos.x, pos.y, pos.z, catalog.module(module).name);
        }
    }
    Ok(())
}
