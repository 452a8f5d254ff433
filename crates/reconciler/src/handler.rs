//! The Observe / Create / Update / Delete state machine.
//!
//! Each operation takes the current record and drives the release, the
//! permission bundle and the record's status toward the declared intent.
//! Operations are idempotent: the host may rerun any of them after a crash
//! and converge to the same state.

use std::sync::Arc;

use chrono::Utc;
use composition_core::{ControllerConfig, Release};
use composition_digest::{compute_release_digest, decode_min_release};
use tracing::{debug, info, warn};

use crate::composition::{Composition, GroupVersionResource};
use crate::condition::Condition;
use crate::error::{Error, Result, ResultExt};
use crate::managed::populate_managed_resources;
use crate::meta::{self, PauseState};
use crate::ports::{
    ActionConfig, ChartInspector, ClusterObjectApi, Event, EventRecorder, InstallConfig, PackageInfo, PackageResolver, RecordStore,
    ReleaseBackend, ResourceMapper, RollbackConfig, UninstallConfig, UpgradeConfig,
};
use crate::rbac::{
    PermissionGenerator, PermissionInstaller, RbacGenerator, RbacInstaller, RbacParameters,
};
use crate::status::{set_status, StatusOptions};
use crate::values::{LabelPostRenderer, Values};

pub const REASON_GRACEFULLY_PAUSED: &str = "ReconciliationGracefullyPaused";
pub const REASON_CREATED: &str = "CompositionCreated";
pub const REASON_UPDATED: &str = "CompositionUpdated";
pub const REASON_DELETED: &str = "CompositionDeleted";
pub const REASON_NOT_READY: &str = "CompositionNotReady";

const PAUSED_SHORT_CIRCUIT: &str =
    "Reconciliation is paused via the gracefully paused annotation.";

/// Result of Observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
}

impl Observation {
    const ABSENT: Self = Self {
        resource_exists: false,
        resource_up_to_date: false,
    };
    const CURRENT: Self = Self {
        resource_exists: true,
        resource_up_to_date: true,
    };
    const STALE: Self = Self {
        resource_exists: true,
        resource_up_to_date: false,
    };
}

/// Settings the handler needs from the controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub helm_max_history: u32,
    pub krateo_namespace: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for HandlerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            helm_max_history: config.helm_max_history,
            krateo_namespace: config.krateo_namespace.clone(),
        }
    }
}

/// Reconciles Composition records against chart releases.
pub struct CompositionHandler {
    resolver: Arc<dyn PackageResolver>,
    backend: Arc<dyn ReleaseBackend>,
    store: Arc<dyn RecordStore>,
    mapper: Arc<dyn ResourceMapper>,
    events: Arc<dyn EventRecorder>,
    permissions: Arc<dyn PermissionGenerator>,
    installer: Arc<dyn PermissionInstaller>,
    config: HandlerConfig,
}

impl CompositionHandler {
    /// Start building a handler.
    #[must_use]
    pub fn builder() -> CompositionHandlerBuilder {
        CompositionHandlerBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Compare the installed release with what the record would install now.
    ///
    /// Performs a real upgrade: the upgraded manifest's digest is compared
    /// against the digest recorded in status.
    ///
    /// # Errors
    ///
    /// Returns error on any collaborator failure. Permission and upgrade
    /// failures are recorded as an Unavailable condition first.
    pub async fn observe(&self, composition: &Composition) -> Result<Observation> {
        let mut record = composition.clone();
        let release_name = meta::calculate_release_name(&record);
        let mut changed = meta::set_release_name(&mut record, &release_name);

        if PauseState::of(&record) == PauseState::Paused {
            self.paused(&record, "Observe").await;
            return Ok(Observation::CURRENT);
        }
        changed |= meta::remove_gracefully_paused_time(&mut record);
        if changed {
            record = self.store.update(&record).await.context("updating record")?;
        }

        debug!(
            op = "Observe",
            name = record.name(),
            namespace = record.namespace(),
            release = %release_name,
            "Observing composition"
        );

        let pkg = self.resolve(&record).await?;
        if meta::set_composition_definition_labels(&mut record, &pkg.composition_definition) {
            record = self.store.update(&record).await.context("updating record")?;
        }

        let Some(mut release) = self.get_release(&record, &release_name).await? else {
            debug!(op = "Observe", release = %release_name, "Composition not found");
            return Ok(Observation::ABSENT);
        };

        if release.status.is_stuck() {
            warn!(
                op = "Observe",
                release = %release_name,
                status = %release.status,
                "Release stuck in pending state, rolling back before re-attempting"
            );
            release = self
                .backend
                .rollback(
                    record.namespace(),
                    &release_name,
                    &RollbackConfig {
                        max_history: self.config.helm_max_history,
                    },
                )
                .await
                .context("rolling back release")?;
        }

        let gvr = self.composition_gvr(&record).await?;

        if let Err(err) = self.install_permissions(&record, &release_name, &gvr, &pkg).await {
            return Err(self.record_unavailable(&mut record, err, "Observe").await);
        }

        let action = self.action_config(&record, &pkg, &gvr)?;
        let upgraded = match self
            .backend
            .upgrade(
                record.namespace(),
                &release_name,
                &pkg.url,
                &UpgradeConfig {
                    action,
                    max_history: self.config.helm_max_history,
                },
            )
            .await
        {
            Ok(upgraded) => upgraded,
            Err(err) => {
                let err = err.context("upgrading helm chart");
                return Err(self.record_unavailable(&mut record, err, "Observe").await);
            }
        };

        let digest = compute_release_digest(&upgraded);
        let previous_digest = if record.status.digest.is_empty() {
            debug!(release = %release_name, "Previous digest not in status, using pre-upgrade release");
            compute_release_digest(&release)
        } else {
            record.status.digest.clone()
        };

        if digest != previous_digest {
            info!(
                op = "Observe",
                name = record.name(),
                package = %pkg.url,
                current = %digest,
                expected = %previous_digest,
                "Composition out-of-date"
            );
            return Ok(Observation::STALE);
        }

        if release.chart_version != upgraded.chart_version {
            info!(
                op = "Observe",
                name = record.name(),
                installed = %release.chart_version,
                expected = %upgraded.chart_version,
                "Composition package version mismatch"
            );
            return Ok(Observation::STALE);
        }

        if PauseState::of(&record) == PauseState::Requested {
            debug!(op = "Observe", name = record.name(), "Pause requested, not yet in effect");
            return Ok(Observation::STALE);
        }

        let options = StatusOptions::available("Composition is up-to-date")
            .with_digests(previous_digest, digest)
            .with_chart(&pkg.url, &pkg.version);
        if set_status(&mut record.status, options) {
            self.store
                .update_status(&record)
                .await
                .context("updating status")?;
        }

        debug!(op = "Observe", name = record.name(), "Composition up-to-date");
        Ok(Observation::CURRENT)
    }

    /// Install the release for a record that has none.
    ///
    /// If a release with the derived name already exists (a previous Create
    /// failed after installing), it is upgraded instead.
    ///
    /// # Errors
    ///
    /// Returns error on any collaborator failure.
    pub async fn create(&self, composition: &Composition) -> Result<()> {
        let mut record = composition.clone();
        if PauseState::of(&record) == PauseState::Paused {
            self.paused(&record, "Create").await;
            return Ok(());
        }

        let release_name = meta::calculate_release_name(&record);
        if meta::set_release_name(&mut record, &release_name) {
            record = self.store.update(&record).await.context("updating record")?;
        }

        info!(
            op = "Create",
            name = record.name(),
            namespace = record.namespace(),
            release = %release_name,
            "Creating composition"
        );

        let pkg = self.resolve(&record).await?;
        let gvr = self.composition_gvr(&record).await?;
        self.install_permissions(&record, &release_name, &gvr, &pkg)
            .await
            .context("installing rbac")?;

        let action = self.action_config(&record, &pkg, &gvr)?;
        let existing = self.get_release(&record, &release_name).await?;
        let release = if existing.is_some() {
            debug!(release = %release_name, "Release already exists, upgrading instead of installing");
            self.backend
                .upgrade(
                    record.namespace(),
                    &release_name,
                    &pkg.url,
                    &UpgradeConfig {
                        action,
                        max_history: self.config.helm_max_history,
                    },
                )
                .await
                .context("upgrading helm chart")?
        } else {
            self.backend
                .install(
                    record.namespace(),
                    &release_name,
                    &pkg.url,
                    &InstallConfig { action },
                )
                .await
                .context("installing helm chart")?
        };

        let (objects, digest) = decode_min_release(&release).context("decoding release")?;
        let managed = populate_managed_resources(self.mapper.as_ref(), &objects)
            .await
            .context("populating managed resources")?;

        set_status(
            &mut record.status,
            StatusOptions::available("Composition created")
                .forced()
                .with_resources(managed)
                .with_digests("", digest)
                .with_chart(&pkg.url, &pkg.version),
        );

        self.events
            .record(
                &record,
                Event::normal(
                    REASON_CREATED,
                    "Create",
                    format!("Composition created: {}", record.name()),
                ),
            )
            .await;

        record = self
            .store
            .update_status(&record)
            .await
            .context("updating status")?;

        meta::remove_gracefully_paused_time(&mut record);
        self.store.update(&record).await.context("updating record")?;

        info!(op = "Create", name = record.name(), release = %release_name, "Composition created");
        Ok(())
    }

    /// Refresh status from the installed release after drift.
    ///
    /// Also applies the pause protocol: a requested pause takes effect here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseNotFound`] when the release is missing, or the
    /// collaborator error.
    pub async fn update(&self, composition: &Composition) -> Result<()> {
        let mut record = composition.clone();
        if PauseState::of(&record) == PauseState::Paused {
            self.paused(&record, "Update").await;
            return Ok(());
        }

        let release_name = meta::calculate_release_name(&record);
        debug!(
            op = "Update",
            name = record.name(),
            namespace = record.namespace(),
            release = %release_name,
            "Handling composition update"
        );

        let pkg = self.resolve(&record).await?;
        let release = self
            .get_release(&record, &release_name)
            .await?
            .ok_or_else(|| Error::release_not_found(&release_name))?;

        let previous_digest = record.status.digest.clone();
        let (objects, digest) = decode_min_release(&release).context("decoding release")?;
        let managed = populate_managed_resources(self.mapper.as_ref(), &objects)
            .await
            .context("populating managed resources")?;

        self.events
            .record(
                &record,
                Event::normal(
                    REASON_UPDATED,
                    "Update",
                    format!("Updated composition: {}", record.name()),
                ),
            )
            .await;

        // Replaced outright: a release that renders nothing clears the list.
        record.status.managed = managed;
        let options = StatusOptions::available("Composition values updated")
            .with_digests(previous_digest, digest)
            .with_chart(&pkg.url, &pkg.version);
        set_status(&mut record.status, options.clone());
        record = self
            .store
            .update_status(&record)
            .await
            .context("updating status")?;

        if meta::is_gracefully_paused(&record) {
            meta::set_gracefully_paused_time(&mut record, Utc::now());
            if set_status(&mut record.status, options.into_paused()) {
                self.store
                    .update_status(&record)
                    .await
                    .context("updating status")?;
            }
            self.events
                .record(
                    &record,
                    Event::normal(
                        REASON_GRACEFULLY_PAUSED,
                        "Update",
                        "Reconciliation paused via the gracefully paused annotation.",
                    ),
                )
                .await;
            info!(op = "Update", name = record.name(), "Composition gracefully paused");
        } else {
            meta::remove_gracefully_paused_time(&mut record);
        }

        self.store.update(&record).await.context("updating record")?;
        info!(op = "Update", name = record.name(), release = %release_name, "Composition updated");
        Ok(())
    }

    /// Uninstall the release and remove the permission bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseStillExists`] when the release survives the
    /// uninstall, or the collaborator error.
    pub async fn delete(&self, composition: &Composition) -> Result<()> {
        let mut record = composition.clone();
        if PauseState::of(&record) == PauseState::Paused {
            self.paused(&record, "Delete").await;
            return Ok(());
        }

        let release_name = meta::calculate_release_name(&record);
        let pkg = self.resolve(&record).await?;

        if self.get_release(&record, &release_name).await?.is_none() {
            debug!(op = "Delete", package = %pkg.url, "Composition not found, nothing to uninstall");
            self.events
                .record(
                    &record,
                    Event::normal(
                        REASON_DELETED,
                        "Delete",
                        format!(
                            "Composition not found, nothing to uninstall: {}",
                            record.name()
                        ),
                    ),
                )
                .await;
            return Ok(());
        }

        info!(
            op = "Delete",
            name = record.name(),
            namespace = record.namespace(),
            release = %release_name,
            "Uninstalling composition"
        );

        self.backend
            .uninstall(
                record.namespace(),
                &release_name,
                &UninstallConfig {
                    ignore_not_found: true,
                },
            )
            .await
            .context("uninstalling helm chart")?;

        if self.get_release(&record, &release_name).await?.is_some() {
            return Err(Error::release_still_exists(&release_name));
        }

        let gvr = self.composition_gvr(&record).await?;
        let bundle = self
            .permissions
            .generate(&release_name, &Self::rbac_parameters(&record, &gvr, &pkg))
            .await
            .context(&format!(
                "generating RBAC for composition {}",
                record.key()
            ))?;
        self.installer
            .remove(&bundle)
            .await
            .context("uninstalling rbac")?;

        self.events
            .record(
                &record,
                Event::normal(
                    REASON_DELETED,
                    "Delete",
                    format!("Deleted composition: {}", record.name()),
                ),
            )
            .await;

        meta::remove_gracefully_paused_time(&mut record);
        self.store.update(&record).await.context("updating record")?;

        info!(op = "Delete", name = record.name(), "Composition package removed");
        Ok(())
    }

    async fn paused(&self, record: &Composition, op: &str) {
        debug!(op, name = record.name(), "Composition is gracefully paused, skipping");
        self.events
            .record(
                record,
                Event::normal(REASON_GRACEFULLY_PAUSED, op, PAUSED_SHORT_CIRCUIT),
            )
            .await;
    }

    async fn resolve(&self, record: &Composition) -> Result<PackageInfo> {
        self.resolver
            .resolve(record)
            .await
            .context("getting package info")
    }

    async fn get_release(&self, record: &Composition, name: &str) -> Result<Option<Release>> {
        self.backend
            .get_release(record.namespace(), name)
            .await
            .context("finding helm release")
    }

    async fn composition_gvr(&self, record: &Composition) -> Result<GroupVersionResource> {
        self.mapper
            .gvk_to_gvr(&record.gvk())
            .await
            .context("converting GVK to GVR")
    }

    fn rbac_parameters(
        record: &Composition,
        gvr: &GroupVersionResource,
        pkg: &PackageInfo,
    ) -> RbacParameters {
        RbacParameters {
            composition_name: record.name().to_string(),
            composition_namespace: record.namespace().to_string(),
            composition_gvr: gvr.clone(),
            definition_name: pkg.composition_definition.name.clone(),
            definition_namespace: pkg.composition_definition.namespace.clone(),
            definition_gvr: pkg.composition_definition.gvr.clone(),
        }
    }

    async fn install_permissions(
        &self,
        record: &Composition,
        release_name: &str,
        gvr: &GroupVersionResource,
        pkg: &PackageInfo,
    ) -> Result<()> {
        let bundle = self
            .permissions
            .generate(release_name, &Self::rbac_parameters(record, gvr, pkg))
            .await
            .context("generating RBAC using chart-inspector")?;
        self.installer
            .apply(&bundle)
            .await
            .context("applying rbac")
    }

    fn action_config(
        &self,
        record: &Composition,
        pkg: &PackageInfo,
        gvr: &GroupVersionResource,
    ) -> Result<ActionConfig> {
        let mut values = Values::from_spec(record).context("getting spec values")?;
        values
            .inject_global_values(record, gvr, &self.config.krateo_namespace)
            .context("injecting global values")?;
        let post_renderer =
            LabelPostRenderer::from_composition(record, gvr, &self.config.krateo_namespace);

        Ok(ActionConfig {
            chart_name: pkg.repo.clone(),
            chart_version: pkg.version.clone(),
            values: values.into_value(),
            credentials: pkg.auth.clone(),
            insecure_skip_tls_verify: pkg.insecure_skip_tls_verify,
            post_renderer: Some(post_renderer),
        })
    }

    /// Record `err` as an Unavailable condition and hand it back.
    async fn record_unavailable(&self, record: &mut Composition, err: Error, op: &str) -> Error {
        warn!(op, name = record.name(), error = %err, "Composition unavailable");
        record
            .status
            .set_condition(Condition::unavailable().with_message(err.to_string()));
        self.events
            .record(record, Event::warning(REASON_NOT_READY, op, err.to_string()))
            .await;

        match self.store.update_status(record).await {
            Ok(_) => err,
            Err(status_err) => status_err.context("updating status after failure"),
        }
    }
}

/// Builder for [`CompositionHandler`].
#[derive(Default)]
pub struct CompositionHandlerBuilder {
    resolver: Option<Arc<dyn PackageResolver>>,
    backend: Option<Arc<dyn ReleaseBackend>>,
    store: Option<Arc<dyn RecordStore>>,
    mapper: Option<Arc<dyn ResourceMapper>>,
    events: Option<Arc<dyn EventRecorder>>,
    permissions: Option<Arc<dyn PermissionGenerator>>,
    installer: Option<Arc<dyn PermissionInstaller>>,
    config: HandlerConfig,
}

impl CompositionHandlerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn PackageResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ReleaseBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<dyn ResourceMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventRecorder>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_permissions(
        mut self,
        generator: Arc<dyn PermissionGenerator>,
        installer: Arc<dyn PermissionInstaller>,
    ) -> Self {
        self.permissions = Some(generator);
        self.installer = Some(installer);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Settings and the permission identity from the controller configuration.
    ///
    /// Permissions are generated for `config`'s service account from what
    /// `inspector` reports, and applied through `cluster`.
    #[must_use]
    pub fn with_controller_config(
        self,
        config: &ControllerConfig,
        inspector: Arc<dyn ChartInspector>,
        cluster: Arc<dyn ClusterObjectApi>,
    ) -> Self {
        self.with_config(HandlerConfig::from(config)).with_permissions(
            Arc::new(RbacGenerator::from_config(config, inspector)),
            Arc::new(RbacInstaller::new(cluster)),
        )
    }

    /// Build the handler.
    ///
    /// # Errors
    ///
    /// Returns error if a collaborator is missing.
    pub fn build(self) -> Result<CompositionHandler> {
        fn required<T: ?Sized>(value: Option<Arc<T>>, what: &str) -> Result<Arc<T>> {
            value.ok_or_else(|| Error::invalid_config(format!("{what} is required")))
        }

        Ok(CompositionHandler {
            resolver: required(self.resolver, "package resolver")?,
            backend: required(self.backend, "release backend")?,
            store: required(self.store, "record store")?,
            mapper: required(self.mapper, "resource mapper")?,
            events: required(self.events, "event recorder")?,
            permissions: required(self.permissions, "permission generator")?,
            installer: required(self.installer, "permission installer")?,
            config: self.config,
        })
    }
}
