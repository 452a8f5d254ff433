//! Host-loop driver over the real handler - BDD style

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod common;

use std::time::Duration;

use chrono::Utc;
use composition_core::ControllerConfig;
use composition_reconciler::memory::{InMemoryReleaseBackend, Operation};
use composition_reconciler::{configured_deadline, reconcile, Error, ReconcileOutcome, Result};
use serde_json::json;

use common::{fixture, fixture_configured, NAMESPACE, RELEASE_NAME};

#[tokio::test]
async fn given_new_record_when_reconciled_through_lifecycle_then_outcomes_follow() -> Result<()> {
    let fx = fixture().await?;

    let first = reconcile(&fx.handler, &fx.stored().await, None).await?;
    assert_eq!(first, ReconcileOutcome::Created);

    let second = reconcile(&fx.handler, &fx.stored().await, None).await?;
    assert_eq!(second, ReconcileOutcome::UpToDate);

    let mut changed = fx.stored().await;
    changed.spec = json!({"replicas": 4, "greeting": "hi"});
    fx.store.insert(changed.clone()).await;
    let third = reconcile(&fx.handler, &changed, None).await?;
    assert_eq!(third, ReconcileOutcome::Updated);

    let fourth = reconcile(&fx.handler, &fx.stored().await, None).await?;
    assert_eq!(fourth, ReconcileOutcome::UpToDate);

    let mut deleting = fx.stored().await;
    deleting.metadata.deletion_timestamp = Some(Utc::now());
    let fifth = reconcile(&fx.handler, &deleting, None).await?;
    assert_eq!(fifth, ReconcileOutcome::Deleted);
    assert!(fx.backend.current(NAMESPACE, RELEASE_NAME).await.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn given_slow_backend_when_deadline_passes_then_nothing_installed() -> Result<()> {
    let backend = InMemoryReleaseBackend::new().with_latency(Duration::from_secs(30));
    let config = ControllerConfig {
        reconcile_timeout_secs: 5,
        ..ControllerConfig::default()
    };
    let fx = fixture_configured(backend, config).await?;

    let deadline = configured_deadline(&fx.config);
    let result = reconcile(&fx.handler, &fx.stored().await, deadline).await;

    assert!(matches!(result, Err(Error::DeadlineExceeded { .. })));
    assert!(result.as_ref().is_err_and(Error::is_transient));
    assert!(fx.backend.current(NAMESPACE, RELEASE_NAME).await.is_none());
    assert_eq!(fx.backend.count(Operation::Install).await, 0);
    Ok(())
}

#[tokio::test]
async fn given_failure_when_reconciled_then_error_propagates() -> Result<()> {
    let fx = fixture().await?;
    fx.backend.fail_on(Operation::Install, "registry unreachable").await;

    let result = reconcile(&fx.handler, &fx.stored().await, None).await;

    assert!(result.as_ref().is_err_and(Error::is_transient));
    assert!(result
        .as_ref()
        .err()
        .is_some_and(|e| e.to_string().contains("installing helm chart")));
    Ok(())
}
