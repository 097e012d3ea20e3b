use std::process::ExitCode;

use chrono::Utc;
use gpusolver::{BackendInfo, LoadState, LoaderConfig, catalog, registry};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("usage: gpusolver-cli probe [--json]");
    eprintln!("       gpusolver-cli symbols");
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    probed_at: String,
    config: &'a LoaderConfig,
    backends: Vec<BackendInfo>,
}

fn print_backend(info: &BackendInfo) {
    match &info.state {
        LoadState::Loaded => {
            println!(
                "{}: loaded ({}, {} symbols)",
                info.kind,
                info.implementation.as_deref().unwrap_or("unknown"),
                info.symbols
            );
            if let Some(library) = &info.library {
                println!("  library: {}", library.display());
            }
            if let Some(space) = info.memory_space {
                println!("  memory_space: {space:?}");
            }
        }
        LoadState::Failed { reason } => println!("{}: unavailable ({reason})", info.kind),
        LoadState::Unloaded => println!("{}: not loaded", info.kind),
    }
}

fn probe(json: bool) -> ExitCode {
    let registry = registry();
    let backends = registry.load_all();
    let available = backends
        .iter()
        .filter(|info| info.state == LoadState::Loaded)
        .count();
    if json {
        let report = ProbeReport {
            probed_at: Utc::now().to_rfc3339(),
            config: registry.config(),
            backends,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("serialization error: {err}");
                return ExitCode::from(1);
            }
        }
    } else {
        for info in &backends {
            print_backend(info);
        }
    }
    if available == 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn symbols() -> ExitCode {
    if let Err(err) = catalog::symbol_table() {
        eprintln!("symbol catalog error: {err}");
        return ExitCode::from(1);
    }
    for entry in catalog::entry_points() {
        let backend = entry
            .backend
            .map_or_else(|| "-".to_string(), |kind| kind.to_string());
        for (symbol, convention) in entry.spellings() {
            let convention = format!("{convention:?}");
            println!("{symbol:<40} {convention:<8} {backend}");
        }
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.iter().skip(1).map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["probe"] => probe(false),
        ["probe", "--json"] => probe(true),
        ["symbols"] => symbols(),
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
