//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Composition controller operator tooling
#[derive(Parser, Debug)]
#[command(name = "composition-controller")]
#[command(version)]
#[command(about = "Reconciles Composition records against installed chart releases")]
#[command(
    long_about = "Inspect the resolved controller configuration, digest release manifests the way drift detection does, and list the managed resources a manifest would produce."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved controller configuration
    Config {
        /// TOML configuration file (environment variables still override it)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print as JSON instead of TOML
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compute the digest of a rendered manifest
    Digest {
        /// Manifest file, or `-` for stdin
        path: PathBuf,

        /// Hash without decoding the documents
        #[arg(long, default_value_t = false)]
        fast: bool,
    },

    /// List the managed resources a rendered manifest would produce
    Objects {
        /// Manifest file, or `-` for stdin
        path: PathBuf,

        /// Print as JSON instead of one path per line
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
