//! Reconciliation of Composition records against chart releases.
//!
//! A Composition declares a chart and its values. The [`CompositionHandler`]
//! implements the four operations a Kubernetes-style host loop dispatches:
//!
//! - **Observe**: is the release installed, and does it still match what
//!   the record would install now? Drift is detected by digesting the
//!   upgraded manifest and comparing against the digest in status.
//! - **Create**: install (or upgrade a leftover) release, provision the
//!   permission bundle, record managed resources.
//! - **Update**: refresh status from the release after drift, and apply
//!   the graceful-pause protocol.
//! - **Delete**: uninstall, verify, remove the permission bundle.
//!
//! Every collaborator (package resolver, release backend, record store,
//! type mapper, event recorder, chart inspector, cluster API) is a trait in
//! [`ports`], with in-memory implementations in [`memory`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use composition_core::load_config;
//! use composition_reconciler::{configured_deadline, driver, memory::*, CompositionHandler};
//!
//! let config = load_config(None)?;
//! let handler = CompositionHandler::builder()
//!     .with_resolver(Arc::new(StaticPackageResolver::new(package)))
//!     .with_backend(Arc::new(InMemoryReleaseBackend::new()))
//!     .with_store(store.clone())
//!     .with_mapper(Arc::new(StaticResourceMapper::with_defaults()))
//!     .with_events(Arc::new(RecordingEventRecorder::new()))
//!     .with_controller_config(&config, inspector, Arc::new(InMemoryClusterApi::new()))
//!     .build()?;
//!
//! let outcome = driver::reconcile(&handler, &record, configured_deadline(&config)).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod composition;
pub mod condition;
pub mod driver;
pub mod error;
pub mod handler;
pub mod managed;
pub mod memory;
pub mod meta;
pub mod ports;
pub mod rbac;
pub mod status;
pub mod values;

pub use composition::{
    Composition, CompositionStatus, GroupVersionKind, GroupVersionResource, ManagedResource,
    ObjectMeta,
};
pub use condition::{Condition, ConditionStatus};
pub use driver::{configured_deadline, reconcile, ExternalClient, ReconcileOutcome};
pub use error::{Error, Result, ResultExt};
pub use handler::{CompositionHandler, CompositionHandlerBuilder, HandlerConfig, Observation};
pub use managed::{build_path, populate_managed_resources};
pub use ports::{
    ChartInspector, ClusterObjectApi, EventRecorder, PackageInfo, PackageResolver, RecordStore,
    ReleaseBackend, ResourceMapper,
};
pub use rbac::{PermissionBundle, PermissionGenerator, PermissionInstaller, RbacGenerator, RbacInstaller};
pub use status::{set_status, StatusOptions};
pub use values::{LabelPostRenderer, Values};
