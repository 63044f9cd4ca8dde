//! Controller client: multiplexed reads and unary writes
//!
//! One client per process. It owns a [`Multiplexer`] per streaming operation,
//! so every watcher created through it shares underlying streams.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::collection::Collection;
use crate::config::ClientConfig;
use crate::history::ReleaseHistory;
use crate::model::{
    App, Release, ScaleRequest, ScaleRequestState, StreamAppsResponse, StreamDeploymentsResponse, StreamReleasesResponse,
    StreamScalesResponse,
};
use crate::multiplexer::{Multiplexer, StreamSubscription};
use crate::request::{
    CreateDeploymentRequest, CreateReleaseRequest, CreateScaleRequest, Modifier, StreamAppsRequest,
    StreamDeploymentsRequest, StreamReleasesRequest, StreamScalesRequest, filter_scales_by_state,
    set_name_filters, set_page_size, set_stream_creates, set_stream_updates,
};
use crate::transport::{
    ControllerTransport, Metadata, StreamApps, StreamDeployments, StreamReleases, StreamScales,
    TransportError,
};

#[derive(Clone)]
pub struct ControllerClient {
    transport: Arc<dyn ControllerTransport>,
    metadata: Arc<Metadata>,
    apps: Multiplexer<StreamApps>,
    releases: Multiplexer<StreamReleases>,
    scales: Multiplexer<StreamScales>,
    deployments: Multiplexer<StreamDeployments>,
}

impl ControllerClient {
    pub fn new(transport: Arc<dyn ControllerTransport>, metadata: Metadata) -> Self {
        let metadata = Arc::new(metadata);
        Self {
            apps: Multiplexer::new(transport.clone(), metadata.clone()),
            releases: Multiplexer::new(transport.clone(), metadata.clone()),
            scales: Multiplexer::new(transport.clone(), metadata.clone()),
            deployments: Multiplexer::new(transport.clone(), metadata.clone()),
            transport,
            metadata,
        }
    }

    pub fn from_config(transport: Arc<dyn ControllerTransport>, config: &ClientConfig) -> Self {
        debug!(host = %config.controller_host, "creating controller client");
        Self::new(transport, config.metadata())
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Underlying streams open across all operations
    pub fn open_streams(&self) -> usize {
        self.apps.open_streams()
            + self.releases.open_streams()
            + self.scales.open_streams()
            + self.deployments.open_streams()
    }

    /// Cancel every open stream
    pub fn shutdown(&self) {
        self.apps.shutdown();
        self.releases.shutdown();
        self.scales.shutdown();
        self.deployments.shutdown();
    }

    pub fn stream_apps(&self, modifiers: &[Modifier<StreamAppsRequest>]) -> StreamSubscription<StreamAppsResponse> {
        self.apps.subscribe(modifiers)
    }

    pub fn stream_releases(
        &self,
        modifiers: &[Modifier<StreamReleasesRequest>],
    ) -> StreamSubscription<StreamReleasesResponse> {
        self.releases.subscribe(modifiers)
    }

    pub fn stream_scales(&self, modifiers: &[Modifier<StreamScalesRequest>]) -> StreamSubscription<StreamScalesResponse> {
        self.scales.subscribe(modifiers)
    }

    pub fn stream_deployments(
        &self,
        modifiers: &[Modifier<StreamDeploymentsRequest>],
    ) -> StreamSubscription<StreamDeploymentsResponse> {
        self.deployments.subscribe(modifiers)
    }

    pub fn watch_apps(&self, modifiers: &[Modifier<StreamAppsRequest>]) -> Collection<StreamAppsResponse> {
        Collection::new(self.stream_apps(modifiers))
    }

    /// A single app, kept up to date. An empty name watches nothing.
    pub fn watch_app(&self, name: &str) -> Collection<StreamAppsResponse> {
        if name.is_empty() {
            return Collection::idle();
        }
        self.watch_apps(&[set_name_filters([name]), set_page_size(1), set_stream_updates()])
    }

    /// A single release. An empty name watches nothing.
    pub fn watch_release(&self, name: &str) -> Collection<StreamReleasesResponse> {
        if name.is_empty() {
            return Collection::idle();
        }
        Collection::new(self.stream_releases(&[set_name_filters([name]), set_page_size(1)]))
    }

    /// Latest completed scale of `release`. An empty release watches nothing,
    /// which views as a completed placeholder.
    pub fn watch_app_scale(&self, release: &str) -> Collection<StreamScalesResponse> {
        if release.is_empty() {
            return Collection::idle();
        }
        Collection::new(self.stream_scales(&[
            set_name_filters([release]),
            filter_scales_by_state([ScaleRequestState::Complete]),
            set_page_size(1),
            set_stream_creates(),
            set_stream_updates(),
        ]))
    }

    /// Scale requests of an app, live
    pub fn watch_app_scales(
        &self,
        app: &str,
        enabled: bool,
        extra: &[Modifier<StreamScalesRequest>],
    ) -> Collection<StreamScalesResponse> {
        if !enabled {
            return Collection::idle();
        }
        Collection::new(self.stream_scales(&scale_history_modifiers(app, extra)))
    }

    pub fn watch_deployments(
        &self,
        enabled: bool,
        extra: &[Modifier<StreamDeploymentsRequest>],
    ) -> Collection<StreamDeploymentsResponse> {
        if !enabled {
            return Collection::idle();
        }
        Collection::new(self.stream_deployments(&deployment_history_modifiers(extra)))
    }

    /// Scale requests and deployments of `app` as one timeline
    pub fn watch_release_history(
        &self,
        app: &str,
        scale_modifiers: &[Modifier<StreamScalesRequest>],
        deployment_modifiers: &[Modifier<StreamDeploymentsRequest>],
        scales_enabled: bool,
        deployments_enabled: bool,
    ) -> ReleaseHistory {
        let scales = scales_enabled.then(|| self.stream_scales(&scale_history_modifiers(app, scale_modifiers)));
        let deployments =
            deployments_enabled.then(|| self.stream_deployments(&deployment_history_modifiers(deployment_modifiers)));
        ReleaseHistory::new(scales, deployments)
    }

    pub async fn update_app(&self, app: App) -> Result<App, TransportError> {
        let reply = self.transport.update_app(app, &self.metadata).await;
        value_or_unknown("update_app", reply)
    }

    pub async fn create_scale(&self, req: CreateScaleRequest) -> Result<ScaleRequest, TransportError> {
        let reply = self.transport.create_scale(req, &self.metadata).await;
        value_or_unknown("create_scale", reply)
    }

    pub async fn create_release(&self, parent: &str, release: Release) -> Result<Release, TransportError> {
        let req = CreateReleaseRequest {
            parent: parent.to_string(),
            release,
        };
        let reply = self.transport.create_release(req, &self.metadata).await;
        value_or_unknown("create_release", reply)
    }

    pub async fn create_deployment(
        &self,
        parent: &str,
        scale_request: Option<CreateScaleRequest>,
    ) -> Result<(), TransportError> {
        let req = CreateDeploymentRequest {
            parent: parent.to_string(),
            scale_request,
        };
        let status = self.transport.create_deployment(req, &self.metadata).await;
        if status.is_ok() {
            Ok(())
        } else {
            warn!(code = %status.code, details = %status.details, "create_deployment failed");
            Err(status.into())
        }
    }
}

fn scale_history_modifiers(
    app: &str,
    extra: &[Modifier<StreamScalesRequest>],
) -> Vec<Modifier<StreamScalesRequest>> {
    let mut modifiers = vec![set_name_filters([app]), set_stream_updates(), set_stream_creates()];
    modifiers.extend(extra.iter().cloned());
    modifiers
}

fn deployment_history_modifiers(extra: &[Modifier<StreamDeploymentsRequest>]) -> Vec<Modifier<StreamDeploymentsRequest>> {
    let mut modifiers = vec![set_stream_updates(), set_stream_creates()];
    modifiers.extend(extra.iter().cloned());
    modifiers
}

fn value_or_unknown<T>(call: &str, reply: Result<Option<T>, TransportError>) -> Result<T, TransportError> {
    match reply {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            warn!(call, "reply carried neither a value nor an error");
            Err(TransportError::unknown())
        }
        Err(err) => {
            warn!(call, error = %err, "write failed");
            Err(err)
        }
    }
}
