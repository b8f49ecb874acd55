#![deny(unsafe_code)]

//! snap-sideloader CLI: runs the sideload web service or performs one-shot
//! sideload and list calls against snapd.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sideloader_config::AppConfig;
use sideloader_core::service::server::{valid_name, valid_revision};
use sideloader_core::service::{self, ServiceState};
use sideloader_core::snapd::{SnapClient, Snapd};

/// snap-sideloader: install pre-staged snaps through the local snapd.
#[derive(Parser)]
#[command(name = "snap-sideloader", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "sideloader.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sideload web service.
    Serve,

    /// Sideload a pre-staged snap once and exit.
    Sideload {
        /// Snap name.
        name: String,
        /// Snap revision.
        revision: String,
    },

    /// Print snapd's list of installed snaps as raw JSON.
    List,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Serve => cmd_serve(config).await?,
        Commands::Sideload { name, revision } => {
            cmd_sideload(&config, &name, &revision).await?;
            println!("Snap submitted");
        }
        Commands::List => println!("{}", cmd_list(&config).await?),
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// Log filter for the given `-v` count, falling back to the configured level.
fn log_filter(verbose: u8, config: &AppConfig) -> String {
    match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

async fn cmd_serve(config: AppConfig) -> Result<()> {
    info!(
        addr = %config.service.listen_addr,
        port = config.service.listen_port,
        download_dir = %config.snapd.download_dir.display(),
        "Starting snap-sideloader"
    );

    let client = Arc::new(Snapd::from_config(&config.snapd));
    let listener = service::bind(&config.service).await?;
    service::serve(listener, ServiceState::new(client), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, initiating graceful shutdown");
    })
    .await?;

    info!("snap-sideloader stopped");
    Ok(())
}

async fn cmd_sideload(config: &AppConfig, name: &str, revision: &str) -> Result<()> {
    if !valid_name(name) {
        bail!("snap name must be a single path component, got {name:?}");
    }
    if !valid_revision(revision) {
        bail!("revision must be a non-negative integer, got {revision:?}");
    }
    let client = Snapd::from_config(&config.snapd);
    client
        .sideload(name, revision)
        .await
        .with_context(|| format!("sideloading {name} revision {revision}"))?;
    Ok(())
}

async fn cmd_list(config: &AppConfig) -> Result<String> {
    let client = Snapd::from_config(&config.snapd);
    let body = client.list().await.context("listing installed snaps")?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config file, or the defaults when it does not exist. The flag
/// reports whether the file was found.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sideloader_test_utils::config::TestConfigBuilder;
    use sideloader_test_utils::fake_snapd::DEFAULT_LIST_BODY;
    use sideloader_test_utils::{FakeSnapd, StagedSnap};

    use super::*;

    #[test]
    fn test_parse_sideload_command() {
        let cli = Cli::try_parse_from(["snap-sideloader", "-v", "sideload", "hello", "42"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.config, PathBuf::from("sideloader.toml"));
        match cli.command {
            Commands::Sideload { name, revision } => {
                assert_eq!(name, "hello");
                assert_eq!(revision, "42");
            }
            _ => panic!("expected sideload command"),
        }
    }

    #[test]
    fn test_sideload_requires_revision() {
        assert!(Cli::try_parse_from(["snap-sideloader", "sideload", "hello"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        let config = TestConfigBuilder::new().log_level("warn").build();
        assert_eq!(log_filter(0, &config), "warn");
        assert_eq!(log_filter(1, &config), "debug");
        assert_eq!(log_filter(3, &config), "trace");
    }

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let (config, found) = load_config(&dir.path().join("sideloader.toml"))
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(config.service.listen_port, 5000);
    }

    #[tokio::test]
    async fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sideloader.toml");
        tokio::fs::write(&path, "[service]\nlisten_port = 0\n")
            .await
            .unwrap();
        assert!(load_config(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_cmd_sideload_against_fake_snapd() {
        let snapd = FakeSnapd::start().await;
        let staged = StagedSnap::new("hello", "42", b"ASSERT-BYTES", b"SNAP-BYTES");
        let config = TestConfigBuilder::new()
            .socket_path(snapd.socket_path())
            .download_dir(staged.dir())
            .build();

        cmd_sideload(&config, "hello", "42").await.unwrap();
        assert_eq!(snapd.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cmd_sideload_rejects_bad_revision() {
        let snapd = FakeSnapd::start().await;
        let config = TestConfigBuilder::new()
            .socket_path(snapd.socket_path())
            .build();

        let err = cmd_sideload(&config, "hello", "beta").await.unwrap_err();
        assert!(err.to_string().contains("non-negative integer"));
        assert!(snapd.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cmd_sideload_rejects_name_outside_download_dir() {
        let snapd = FakeSnapd::start().await;
        let config = TestConfigBuilder::new()
            .socket_path(snapd.socket_path())
            .build();

        for name in ["../../etc/shadow", "..", "a\\b"] {
            let err = cmd_sideload(&config, name, "1").await.unwrap_err();
            assert!(err.to_string().contains("single path component"), "{name}");
        }
        assert!(snapd.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cmd_list_prints_raw_json() {
        let snapd = FakeSnapd::start().await;
        let config = TestConfigBuilder::new()
            .socket_path(snapd.socket_path())
            .build();

        assert_eq!(cmd_list(&config).await.unwrap(), DEFAULT_LIST_BODY);
    }
}
