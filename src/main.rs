mod api;
mod catalog;
mod config;
mod cue;
mod error;
mod genre;
mod logger;
mod selection;
mod similarity;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use crate::api::AppState;
use crate::config::Config;
use crate::similarity::SimilarityEngine;

/// Serves acoustically-similar-track suggestions over HTTP for a local
/// music catalog.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// CRITICAL, ERROR, WARNING, INFO, or DEBUG.
    #[arg(short, long, default_value = "INFO")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if logger::init(logger::parse_level(&cli.log_level)).is_err() {
        eprintln!("failed to initialize logger");
    }

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (index, genres) = match catalog::load(&config.db_path, &config.genre_groups, &config.normalize) {
        Ok(pair) => pair,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("loaded {} tracks from {}", index.len(), config.db_path);

    let state = AppState {
        index: Arc::new(index),
        genres: Arc::new(genres),
        engine: Arc::new(SimilarityEngine::new()),
        config: Arc::new(config),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let bind_address = state.config.bind_address();
        let app = api::router(state);

        let listener = match tokio::net::TcpListener::bind(&bind_address).await {
            Ok(l) => l,
            Err(e) => {
                error!("failed to bind {bind_address}: {e}");
                return ExitCode::FAILURE;
            }
        };
        info!("listening on {bind_address}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {e}");
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    })
}
