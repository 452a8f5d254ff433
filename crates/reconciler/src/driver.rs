//! Single-invocation driver: dispatch one record the way the host loop does.
//!
//! Not a work queue. The host guarantees at most one invocation per record
//! at a time; this function runs exactly one.

use std::fmt;

use async_trait::async_trait;
use composition_core::ControllerConfig;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::composition::Composition;
use crate::error::{Error, Result};
use crate::handler::{CompositionHandler, Observation};

/// The four operations the host dispatches.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn observe(&self, composition: &Composition) -> Result<Observation>;
    async fn create(&self, composition: &Composition) -> Result<()>;
    async fn update(&self, composition: &Composition) -> Result<()>;
    async fn delete(&self, composition: &Composition) -> Result<()>;
}

#[async_trait]
impl ExternalClient for CompositionHandler {
    async fn observe(&self, composition: &Composition) -> Result<Observation> {
        CompositionHandler::observe(self, composition).await
    }

    async fn create(&self, composition: &Composition) -> Result<()> {
        CompositionHandler::create(self, composition).await
    }

    async fn update(&self, composition: &Composition) -> Result<()> {
        CompositionHandler::update(self, composition).await
    }

    async fn delete(&self, composition: &Composition) -> Result<()> {
        CompositionHandler::delete(self, composition).await
    }
}

/// What an invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    UpToDate,
    Deleted,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::UpToDate => "up-to-date",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

async fn dispatch(client: &dyn ExternalClient, composition: &Composition) -> Result<ReconcileOutcome> {
    if composition.is_being_deleted() {
        client.delete(composition).await?;
        return Ok(ReconcileOutcome::Deleted);
    }

    let observation = client.observe(composition).await?;
    debug!(
        key = %composition.key(),
        exists = observation.resource_exists,
        up_to_date = observation.resource_up_to_date,
        "Observed"
    );

    if !observation.resource_exists {
        client.create(composition).await?;
        Ok(ReconcileOutcome::Created)
    } else if !observation.resource_up_to_date {
        client.update(composition).await?;
        Ok(ReconcileOutcome::Updated)
    } else {
        Ok(ReconcileOutcome::UpToDate)
    }
}

/// Deadline for an invocation starting now, from the configured timeout.
///
/// `None` when the timeout is too large to represent, which leaves the
/// invocation unbounded.
#[must_use]
pub fn configured_deadline(config: &ControllerConfig) -> Option<Instant> {
    Instant::now().checked_add(config.reconcile_timeout())
}

/// Run one reconcile of `composition`.
///
/// A record marked for deletion goes to Delete. Otherwise Observe runs,
/// then Create when the release is absent or Update when it is out of date. When `deadline`
/// passes, the in-flight call is dropped and nothing further is written;
/// writes that already completed stay.
///
/// # Errors
///
/// Returns [`Error::DeadlineExceeded`] on expiry, or the operation's error.
pub async fn reconcile(
    client: &dyn ExternalClient,
    composition: &Composition,
    deadline: Option<Instant>,
) -> Result<ReconcileOutcome> {
    let started = Instant::now();
    let result = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, dispatch(client, composition))
            .await
            .map_err(|_| Error::DeadlineExceeded {
                elapsed_ms: started.elapsed().as_millis(),
            })?,
        None => dispatch(client, composition).await,
    };

    match &result {
        Ok(outcome) => info!(key = %composition.key(), outcome = %outcome, "Reconciled"),
        Err(e) => warn!(
            key = %composition.key(),
            error = %e,
            transient = e.is_transient(),
            "Reconcile failed"
        ),
    }
    result
}
