//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use composition_core::load_config;
use composition_digest::{compute_digest, decode_manifest, MinimalMetadata};
use composition_reconciler::memory::StaticResourceMapper;
use composition_reconciler::populate_managed_resources;
use tracing::{debug, info};

use crate::cli::Commands;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Config { file, json } => cmd_config(file, json),
        Commands::Digest { path, fast } => cmd_digest(&path, fast),
        Commands::Objects { path, json } => cmd_objects(&path, json).await,
    }
}

fn read_manifest(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut manifest = String::new();
        std::io::stdin()
            .read_to_string(&mut manifest)
            .context("Failed to read manifest from stdin")?;
        return Ok(manifest);
    }

    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))
}

fn cmd_config(file: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(file.as_deref()).context("Failed to load configuration")?;
    debug!(source = ?file, "Configuration resolved");

    let rendered = if json {
        serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?
    } else {
        toml::to_string_pretty(&config).context("Failed to serialize configuration")?
    };
    println!("{rendered}");
    Ok(())
}

fn cmd_digest(path: &Path, fast: bool) -> Result<()> {
    let manifest = read_manifest(path)?;

    let digest = if fast {
        compute_digest(&manifest)
    } else {
        let (objects, digest) = decode_manifest::<MinimalMetadata>(&manifest)
            .context("Failed to decode manifest")?;
        info!(objects = objects.len(), "Decoded manifest");
        digest
    };

    println!("{digest}");
    Ok(())
}

async fn cmd_objects(path: &Path, json: bool) -> Result<()> {
    let manifest = read_manifest(path)?;
    let (objects, digest) =
        decode_manifest::<MinimalMetadata>(&manifest).context("Failed to decode manifest")?;
    debug!(objects = objects.len(), digest = %digest, "Decoded manifest");

    let mapper = StaticResourceMapper::with_defaults();
    let managed = populate_managed_resources(&mapper, &objects)
        .await
        .context("Failed to resolve managed resources")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&managed).context("Failed to serialize resources")?;
        println!("{rendered}");
    } else {
        managed.iter().for_each(|resource| println!("{}", resource.path));
    }
    Ok(())
}
