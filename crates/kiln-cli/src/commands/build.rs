//! The build command

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio_util::sync::CancellationToken;

use kiln_build::{BuildConfig, DefaultSourceFactory, Orchestrator};
use kiln_core::Ingester;

use crate::exit_codes;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    paths: &[PathBuf],
    output: Option<&Path>,
    fail_fast: bool,
    workers: usize,
    api_versions: Vec<String>,
    kube_version: Option<String>,
    include_hooks: bool,
    cache_dir: Option<PathBuf>,
    timeout: Option<Duration>,
) -> i32 {
    // Ingestion failures are configuration errors.
    let mut ingester = Ingester::new();
    for path in paths {
        if let Err(e) = ingester.ingest_tree(path) {
            error(&format!("failed to ingest {}: {}", path.display(), e));
            return exit_codes::CONFIG_ERROR;
        }
    }
    let db = Arc::new(ingester.finish());
    tracing::debug!(documents = db.len(), "ingested input trees");

    let config = BuildConfig {
        fail_fast,
        workers,
        api_versions,
        kube_version,
        include_hooks,
        cache_dir,
        deterministic: true,
    };

    let factory = match DefaultSourceFactory::new() {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            error(&e.to_string());
            return exit_codes::CONFIG_ERROR;
        }
    };

    let orchestrator = match Orchestrator::new(config, factory) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error(&e.to_string());
            return exit_codes::CONFIG_ERROR;
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let build = orchestrator.run(db, cancel.clone());
    let report = match timeout {
        Some(limit) => match tokio::time::timeout(limit, build).await {
            Ok(report) => report,
            Err(_) => {
                cancel.cancel();
                error(&format!("build deadline of {}s exceeded", limit.as_secs()));
                return exit_codes::BUILD_ERROR;
            }
        },
        None => build.await,
    };

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error(&e.to_string());
            return exit_codes::BUILD_ERROR;
        }
    };

    let stream = report.to_yaml_stream();
    if let Some(path) = output {
        if let Err(e) = std::fs::write(path, &stream) {
            error(&format!("cannot write {}: {}", path.display(), e));
            return exit_codes::BUILD_ERROR;
        }
    } else {
        print!("{}", stream);
    }

    match report.into_error() {
        None => exit_codes::SUCCESS,
        Some(e) => {
            error(&e.to_string());
            exit_codes::BUILD_ERROR
        }
    }
}

/// Cancel the build on Ctrl-C; a second signal kills the process
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, canceling build");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(exit_codes::BUILD_ERROR);
            }
        }
    });
}

fn error(message: &str) {
    eprintln!("{} {}", style("error:").red().bold(), message);
}
