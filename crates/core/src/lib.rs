//! Core types, errors, and configuration for the composition controller.
//!
//! - [`config`]: layered controller configuration (defaults, TOML, environment)
//! - [`release`]: package-manager release records shared by the digest engine
//!   and the reconciler
//! - [`error`] / [`result`]: typed errors and the crate `Result` alias

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod release;
pub mod result;

pub use config::{load_config, ControllerConfig};
pub use error::Error;
pub use release::{Release, ReleaseStatus};
pub use result::Result;
