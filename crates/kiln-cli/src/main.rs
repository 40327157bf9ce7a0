//! kiln - render GitOps Helm and Kustomize declarations offline

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(about = "Render HelmRelease and Kustomize declarations to plain manifests, offline", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every HelmRelease found under the given paths
    Build {
        /// Input directories containing YAML declarations
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Write the YAML stream to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort on the first failure instead of aggregating errors
        #[arg(long)]
        fail_fast: bool,

        /// Maximum number of releases built concurrently
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Additional API versions for the install context (repeatable)
        #[arg(long = "api-versions")]
        api_versions: Vec<String>,

        /// Kubernetes version reported to charts
        #[arg(long)]
        kube_version: Option<String>,

        /// Include Helm hook manifests in the output
        #[arg(long)]
        include_hooks: bool,

        /// Directory for extracted chart artifacts (temporary when unset)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Overall build deadline, e.g. "5m"
        #[arg(long)]
        timeout: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Build {
            paths,
            output,
            fail_fast,
            workers,
            api_versions,
            kube_version,
            include_hooks,
            cache_dir,
            timeout,
        } => {
            let timeout = match timeout.as_deref().map(kiln_core::release::parse_duration) {
                Some(Ok(duration)) => Some(duration),
                Some(Err(e)) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(exit_codes::CONFIG_ERROR as u8);
                }
                None => None,
            };

            commands::build::run(
                &paths,
                output.as_deref(),
                fail_fast,
                workers,
                api_versions,
                kube_version,
                include_hooks,
                cache_dir,
                timeout,
            )
            .await
        }
    };

    ExitCode::from(code as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_args_parse() {
        let cli = Cli::parse_from([
            "kiln",
            "build",
            "overlays/prod",
            "--fail-fast",
            "--workers",
            "8",
            "--api-versions",
            "monitoring.coreos.com/v1",
            "--kube-version",
            "1.29.0",
            "--timeout",
            "5m",
        ]);

        match cli.command {
            Commands::Build {
                paths,
                fail_fast,
                workers,
                api_versions,
                kube_version,
                timeout,
                ..
            } => {
                assert_eq!(paths, vec![PathBuf::from("overlays/prod")]);
                assert!(fail_fast);
                assert_eq!(workers, 8);
                assert_eq!(api_versions, vec!["monitoring.coreos.com/v1".to_string()]);
                assert_eq!(kube_version.as_deref(), Some("1.29.0"));
                assert_eq!(timeout.as_deref(), Some("5m"));
            }
        }
    }
}
