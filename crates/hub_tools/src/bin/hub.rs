#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use hub_storage::fixture::{demo_route_store, load_route_fixture};
use hub_tools::route_demo::execute_route_demo;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: hub demo [fixture.json]";

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) != Some("demo") {
        return Err(USAGE.to_string());
    }

    let fixture_path = args
        .get(1)
        .cloned()
        .or_else(|| env::var("HUB_FIXTURE_PATH").ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    let store = match &fixture_path {
        Some(path) => load_route_fixture(path)
            .map_err(|e| format!("failed to load {}: {e}", path.display()))?,
        None => demo_route_store().map_err(|e| format!("failed to load demo route: {e}"))?,
    };

    for line in execute_route_demo(store)? {
        println!("{line}");
    }
    Ok(())
}
