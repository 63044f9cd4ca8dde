use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use ctrlview_core::client::ControllerClient;
use ctrlview_core::merge::{by_display_name, newest_first};
use ctrlview_core::model::{
    App, DeploymentStatus, ExpandedDeployment, ProcessType, Record, Release, ReleaseType,
    ScaleRequest, ScaleRequestState, StreamAppsResponse, StreamDeploymentsResponse,
    StreamReleasesResponse, StreamScalesResponse, Timestamp, app_name_of,
};
use ctrlview_core::request::{
    CreateDeploymentRequest, CreateReleaseRequest, CreateScaleRequest, StreamAppsRequest,
    StreamDeploymentsRequest, StreamReleasesRequest, StreamScalesRequest,
};
use ctrlview_core::transport::{
    Code, ControllerTransport, Metadata, ResponseStream, Status, StreamSink, TransportError,
};

/// Name filters match a resource or anything nested under it
fn matches_names(name: &str, filters: &[String]) -> bool {
    filters.is_empty()
        || filters.iter().any(|f| {
            name == f || (name.starts_with(f.as_str()) && name[f.len()..].starts_with('/'))
        })
}

/// Read side of a streaming request, as the fake server interprets it
trait WatchRequest {
    type Item: Record + Clone;
    type Response;

    fn name_filters(&self) -> &[String];
    fn page_size(&self) -> u32;
    fn streams_creates(&self) -> bool;
    fn streams_updates(&self) -> bool;
    fn respond(items: Vec<Self::Item>, next_page_token: String) -> Self::Response;

    fn accepts(&self, item: &Self::Item) -> bool {
        matches_names(item.name(), self.name_filters())
    }
}

macro_rules! watch_request {
    ($item:ty, $resp:ty) => {
        fn name_filters(&self) -> &[String] {
            &self.name_filters
        }

        fn page_size(&self) -> u32 {
            self.page_size
        }

        fn streams_creates(&self) -> bool {
            self.stream_creates
        }

        fn streams_updates(&self) -> bool {
            self.stream_updates
        }

        fn respond(items: Vec<$item>, next_page_token: String) -> $resp {
            <$resp>::from_parts(items, next_page_token)
        }
    };
}

trait FromParts<T> {
    fn from_parts(items: Vec<T>, next_page_token: String) -> Self;
}

impl FromParts<App> for StreamAppsResponse {
    fn from_parts(apps: Vec<App>, next_page_token: String) -> Self {
        Self { apps, next_page_token }
    }
}

impl FromParts<Release> for StreamReleasesResponse {
    fn from_parts(releases: Vec<Release>, next_page_token: String) -> Self {
        Self { releases, next_page_token }
    }
}

impl FromParts<ScaleRequest> for StreamScalesResponse {
    fn from_parts(scale_requests: Vec<ScaleRequest>, next_page_token: String) -> Self {
        Self { scale_requests, next_page_token }
    }
}

impl FromParts<ExpandedDeployment> for StreamDeploymentsResponse {
    fn from_parts(deployments: Vec<ExpandedDeployment>, next_page_token: String) -> Self {
        Self { deployments, next_page_token }
    }
}

impl WatchRequest for StreamAppsRequest {
    type Item = App;
    type Response = StreamAppsResponse;
    watch_request!(App, StreamAppsResponse);

    fn accepts(&self, app: &App) -> bool {
        let excluded = self.label_filters.iter().any(|filter| {
            filter.expressions.iter().all(|expr| {
                app.labels
                    .get(&expr.key)
                    .is_some_and(|value| expr.values.contains(value))
            })
        });
        !excluded && matches_names(&app.name, &self.name_filters)
    }
}

impl WatchRequest for StreamReleasesRequest {
    type Item = Release;
    type Response = StreamReleasesResponse;
    watch_request!(Release, StreamReleasesResponse);
}

impl WatchRequest for StreamScalesRequest {
    type Item = ScaleRequest;
    type Response = StreamScalesResponse;
    watch_request!(ScaleRequest, StreamScalesResponse);

    fn accepts(&self, scale: &ScaleRequest) -> bool {
        (self.state_filters.is_empty() || self.state_filters.contains(&scale.state))
            && matches_names(&scale.name, &self.name_filters)
    }
}

impl WatchRequest for StreamDeploymentsRequest {
    type Item = ExpandedDeployment;
    type Response = StreamDeploymentsResponse;
    watch_request!(ExpandedDeployment, StreamDeploymentsResponse);

    fn accepts(&self, deployment: &ExpandedDeployment) -> bool {
        (self.type_filters.is_empty() || self.type_filters.contains(&deployment.release_type))
            && (self.status_filters.is_empty() || self.status_filters.contains(&deployment.status))
            && matches_names(&deployment.name, &self.name_filters)
    }
}

struct Watch<Q: WatchRequest> {
    req: Q,
    sink: StreamSink<Q::Response>,
}

/// Send the initial page, then keep the sink if the request streams changes
fn open_watch<Q: WatchRequest>(
    items: &[Q::Item],
    req: Q,
    watchers: &mut Vec<Watch<Q>>,
) -> ResponseStream<Q::Response> {
    let (sink, stream) = ResponseStream::channel();

    let mut page: Vec<Q::Item> = items.iter().filter(|item| req.accepts(item)).cloned().collect();
    let limit = req.page_size() as usize;
    let mut next_page_token = String::new();
    if limit > 0 && page.len() > limit {
        page.truncate(limit);
        next_page_token = format!("after:{}", page[limit - 1].name());
    }
    sink.send_data(Q::respond(page, next_page_token));

    if req.streams_creates() || req.streams_updates() {
        watchers.push(Watch { req, sink });
    } else {
        sink.end();
    }
    stream
}

fn publish<Q: WatchRequest>(watchers: &mut Vec<Watch<Q>>, item: &Q::Item, created: bool) {
    watchers.retain(|w| !w.sink.is_cancelled());
    for watch in watchers.iter() {
        let wanted = if created {
            watch.req.streams_creates()
        } else {
            watch.req.streams_updates()
        };
        if wanted && watch.req.accepts(item) {
            watch.sink.send_data(Q::respond(vec![item.clone()], String::new()));
        }
    }
}

fn live<Q: WatchRequest>(watchers: &[Watch<Q>]) -> usize {
    watchers.iter().filter(|w| !w.sink.is_cancelled()).count()
}

/// Replace `item` by name, or insert it; keeps `items` in `order`
fn upsert<T: Record>(items: &mut Vec<T>, item: T, order: fn(&T, &T) -> std::cmp::Ordering) {
    match items.iter().position(|existing| existing.name() == item.name()) {
        Some(at) => items[at] = item,
        None => items.push(item),
    }
    items.sort_by(order);
}

#[derive(Default)]
struct Store {
    apps: Vec<App>,
    releases: Vec<Release>,
    scales: Vec<ScaleRequest>,
    deployments: Vec<ExpandedDeployment>,
    app_watchers: Vec<Watch<StreamAppsRequest>>,
    release_watchers: Vec<Watch<StreamReleasesRequest>>,
    scale_watchers: Vec<Watch<StreamScalesRequest>>,
    deployment_watchers: Vec<Watch<StreamDeploymentsRequest>>,
}

impl Store {
    fn put_app(&mut self, app: App, created: bool) {
        publish(&mut self.app_watchers, &app, created);
        upsert(&mut self.apps, app, by_display_name);
    }

    fn put_release(&mut self, release: Release, created: bool) {
        publish(&mut self.release_watchers, &release, created);
        upsert(&mut self.releases, release, newest_first);
    }

    fn put_scale(&mut self, scale: ScaleRequest, created: bool) {
        publish(&mut self.scale_watchers, &scale, created);
        upsert(&mut self.scales, scale, newest_first);
    }

    fn put_deployment(&mut self, deployment: ExpandedDeployment, created: bool) {
        publish(&mut self.deployment_watchers, &deployment, created);
        upsert(&mut self.deployments, deployment, newest_first);
    }

    fn release(&self, name: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.name == name)
    }

    fn app_mut(&mut self, name: &str) -> Option<&mut App> {
        self.apps.iter_mut().find(|a| a.name == name)
    }

    /// Process counts of the app's most recent completed scale
    fn current_processes(&self, app: &str) -> BTreeMap<String, i32> {
        self.scales
            .iter()
            .find(|s| s.state == ScaleRequestState::Complete && app_name_of(&s.name) == Some(app))
            .map(|s| s.new_processes.clone())
            .unwrap_or_default()
    }

    fn open_watchers(&self) -> usize {
        live(&self.app_watchers)
            + live(&self.release_watchers)
            + live(&self.scale_watchers)
            + live(&self.deployment_watchers)
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn processes(web: i32, worker: i32) -> BTreeMap<String, i32> {
    BTreeMap::from([("web".to_string(), web), ("worker".to_string(), worker)])
}

/// In-memory controller that serves streams and applies writes.
/// Pending scale requests and deployments complete after `settle`.
#[derive(Clone)]
pub struct FakeController {
    store: Arc<Mutex<Store>>,
    settle: Duration,
}

impl FakeController {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            settle: Duration::from_millis(800),
        }
    }

    #[allow(dead_code)]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an app with `days` of past history, one event every few hours.
    /// Returns the app.
    pub fn seed_app(&self, display_name: &str, days: i64) -> App {
        let now = Utc::now();
        let app_name = format!("apps/{}", short_id());
        let mut store = self.store();

        let mut previous: Option<Release> = None;
        let mut web = 1;
        let steps = days * 24 / 5;
        for step in 0..steps {
            let at: Timestamp = now - TimeDelta::hours((steps - step) * 5);
            if step % 3 == 0 {
                let release = Release {
                    name: format!("{}/releases/{}", app_name, short_id()),
                    artifacts: vec![format!("artifacts/{}", short_id())],
                    env: BTreeMap::from([("RELEASE_STEP".to_string(), step.to_string())]),
                    processes: BTreeMap::from([("web".to_string(), ProcessType {
                        args: vec!["./bin/web".to_string()],
                        ports: vec![8080],
                    })]),
                    create_time: Some(at),
                    ..Default::default()
                };
                store.put_release(release.clone(), true);
                store.put_deployment(
                    ExpandedDeployment {
                        name: format!("{}/deployments/{}", app_name, short_id()),
                        old_release: previous.clone(),
                        new_release: Some(release.clone()),
                        release_type: if step % 2 == 0 { ReleaseType::Code } else { ReleaseType::Config },
                        strategy: "all-at-once".into(),
                        status: DeploymentStatus::Complete,
                        processes: processes(web, 1),
                        create_time: Some(at),
                        end_time: Some(at + TimeDelta::seconds(40)),
                    },
                    true,
                );
                previous = Some(release);
            } else if let Some(release) = &previous {
                let old = processes(web, 1);
                web = web % 4 + 1;
                store.put_scale(
                    ScaleRequest {
                        name: format!("{}/scales/{}", release.name, short_id()),
                        state: ScaleRequestState::Complete,
                        old_processes: old,
                        new_processes: processes(web, 1),
                        create_time: Some(at),
                        update_time: Some(at + TimeDelta::seconds(5)),
                    },
                    true,
                );
            }
        }

        let app = App {
            name: app_name,
            display_name: display_name.to_string(),
            release: previous.map(|r| r.name).unwrap_or_default(),
            create_time: Some(now - TimeDelta::days(days)),
            ..Default::default()
        };
        store.put_app(app.clone(), true);
        debug!(app = %app.name, events = steps, "seeded fake controller");
        app
    }

    /// Streams the server still holds open
    pub fn open_watchers(&self) -> usize {
        self.store().open_watchers()
    }

    /// Mark a pending scale or deployment complete after the settle delay
    fn settle_later(&self, name: String) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(controller.settle).await;
            let mut store = controller.store();
            let now = Utc::now();
            if let Some(mut scale) = store.scales.iter().find(|s| s.name == name).cloned() {
                scale.state = ScaleRequestState::Complete;
                scale.update_time = Some(now);
                store.put_scale(scale, false);
            } else if let Some(mut deployment) = store.deployments.iter().find(|d| d.name == name).cloned() {
                deployment.status = DeploymentStatus::Complete;
                deployment.end_time = Some(now);
                store.put_deployment(deployment, false);
            }
        });
    }
}

impl Default for FakeController {
    fn default() -> Self {
        Self::new()
    }
}

fn release_not_found(name: &str) -> TransportError {
    TransportError::not_found(format!("release {} not found", name))
}

#[async_trait]
impl ControllerTransport for FakeController {
    fn stream_apps(&self, req: StreamAppsRequest, _metadata: &Metadata) -> ResponseStream<StreamAppsResponse> {
        let mut guard = self.store();
        let store = &mut *guard;
        open_watch(&store.apps, req, &mut store.app_watchers)
    }

    fn stream_releases(
        &self,
        req: StreamReleasesRequest,
        _metadata: &Metadata,
    ) -> ResponseStream<StreamReleasesResponse> {
        let mut guard = self.store();
        let store = &mut *guard;
        open_watch(&store.releases, req, &mut store.release_watchers)
    }

    fn stream_scales(&self, req: StreamScalesRequest, _metadata: &Metadata) -> ResponseStream<StreamScalesResponse> {
        let mut guard = self.store();
        let store = &mut *guard;
        open_watch(&store.scales, req, &mut store.scale_watchers)
    }

    fn stream_deployments(
        &self,
        req: StreamDeploymentsRequest,
        _metadata: &Metadata,
    ) -> ResponseStream<StreamDeploymentsResponse> {
        let mut guard = self.store();
        let store = &mut *guard;
        open_watch(&store.deployments, req, &mut store.deployment_watchers)
    }

    async fn update_app(&self, app: App, _metadata: &Metadata) -> Result<Option<App>, TransportError> {
        let mut store = self.store();
        if store.app_mut(&app.name).is_none() {
            return Err(TransportError::not_found(format!("app {} not found", app.name)));
        }
        let mut updated = app;
        updated.update_time = Some(Utc::now());
        store.put_app(updated.clone(), false);
        Ok(Some(updated))
    }

    async fn create_scale(
        &self,
        req: CreateScaleRequest,
        _metadata: &Metadata,
    ) -> Result<Option<ScaleRequest>, TransportError> {
        let scale = {
            let mut store = self.store();
            if store.release(&req.parent).is_none() {
                return Err(release_not_found(&req.parent));
            }
            let app = app_name_of(&req.parent).unwrap_or_default();
            let scale = ScaleRequest {
                name: format!("{}/scales/{}", req.parent, short_id()),
                state: ScaleRequestState::Pending,
                old_processes: store.current_processes(app),
                new_processes: req.processes,
                create_time: Some(Utc::now()),
                update_time: None,
            };
            store.put_scale(scale.clone(), true);
            scale
        };
        self.settle_later(scale.name.clone());
        Ok(Some(scale))
    }

    async fn create_release(
        &self,
        req: CreateReleaseRequest,
        _metadata: &Metadata,
    ) -> Result<Option<Release>, TransportError> {
        let mut store = self.store();
        if store.app_mut(&req.parent).is_none() {
            return Err(TransportError::not_found(format!("app {} not found", req.parent)));
        }
        let release = Release {
            name: format!("{}/releases/{}", req.parent, short_id()),
            create_time: Some(Utc::now()),
            ..req.release
        };
        store.put_release(release.clone(), true);
        Ok(Some(release))
    }

    async fn create_deployment(&self, req: CreateDeploymentRequest, _metadata: &Metadata) -> Status {
        let name = {
            let mut store = self.store();
            let Some(new_release) = store.release(&req.parent).cloned() else {
                return Status::new(Code::NotFound, release_not_found(&req.parent).message);
            };
            let Some(app_name) = app_name_of(&req.parent).map(str::to_string) else {
                return Status::new(Code::InvalidArgument, "parent is not a release name");
            };

            let old_release = store
                .app_mut(&app_name)
                .map(|app| app.release.clone())
                .and_then(|name| store.release(&name).cloned());
            let processes = req
                .scale_request
                .map(|scale| scale.processes)
                .unwrap_or_else(|| store.current_processes(&app_name));

            let deployment = ExpandedDeployment {
                name: format!("{}/deployments/{}", app_name, short_id()),
                old_release,
                release_type: ReleaseType::Code,
                new_release: Some(new_release),
                strategy: "all-at-once".into(),
                status: DeploymentStatus::Pending,
                processes,
                create_time: Some(Utc::now()),
                end_time: None,
            };
            let name = deployment.name.clone();
            store.put_deployment(deployment, true);

            if let Some(mut app) = store.app_mut(&app_name).cloned() {
                app.release = req.parent.clone();
                store.put_app(app, false);
            }
            name
        };
        self.settle_later(name);
        Status::ok()
    }
}

/// Keep the fake controller busy through the client's write API: mostly
/// scale requests, with a new release deployed every third step.
pub fn spawn_activity(client: ControllerClient, app: App, rate: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut release = app.release.clone();
        let mut tick = tokio::time::interval(rate);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick fires immediately
        tick.tick().await;

        for step in 1u64.. {
            tick.tick().await;
            let web = (step % 5 + 1) as i32;

            if step % 3 == 0 {
                let created = client
                    .create_release(
                        &app.name,
                        Release {
                            artifacts: vec![format!("artifacts/{}", short_id())],
                            ..Default::default()
                        },
                    )
                    .await;
                match created {
                    Ok(new_release) => {
                        let scale = CreateScaleRequest {
                            parent: new_release.name.clone(),
                            processes: processes(web, 1),
                            ..Default::default()
                        };
                        if let Err(e) = client.create_deployment(&new_release.name, Some(scale)).await {
                            warn!(error = %e, "deployment failed");
                        } else {
                            release = new_release.name;
                        }
                    }
                    Err(e) => warn!(error = %e, "release failed"),
                }
            } else if !release.is_empty() {
                let req = CreateScaleRequest {
                    parent: release.clone(),
                    processes: processes(web, 1),
                    ..Default::default()
                };
                if let Err(e) = client.create_scale(req).await {
                    warn!(error = %e, "scale failed");
                }
            }
        }
    })
}
