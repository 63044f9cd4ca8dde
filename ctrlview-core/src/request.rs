//! Streaming request messages and composable request modifiers
//!
//! A modifier sets one aspect of an outgoing request (filters, pagination,
//! streaming flags) and exposes a stable key. The sorted set of keys forms
//! the filter signature used to share one server stream between identical
//! subscriptions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{DeploymentStatus, Release, ReleaseType, ScaleRequestState};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LabelOperator {
    #[default]
    In,
    NotIn,
    Exists,
    NotExists,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelExpression {
    pub key: String,
    pub op: LabelOperator,
    pub values: Vec<String>,
}

/// Expressions within a filter are ANDed; separate filters are ORed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelFilter {
    pub expressions: Vec<LabelExpression>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamAppsRequest {
    pub page_size: u32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub label_filters: Vec<LabelFilter>,
    pub stream_updates: bool,
    pub stream_creates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamReleasesRequest {
    pub page_size: u32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub stream_updates: bool,
    pub stream_creates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamScalesRequest {
    pub page_size: u32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub state_filters: Vec<ScaleRequestState>,
    pub stream_updates: bool,
    pub stream_creates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamDeploymentsRequest {
    pub page_size: u32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub type_filters: Vec<ReleaseType>,
    pub status_filters: Vec<DeploymentStatus>,
    pub stream_updates: bool,
    pub stream_creates: bool,
}

/// Requested process counts (and optional per-process tags) for a release
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateScaleRequest {
    /// Release being scaled
    pub parent: String,
    pub processes: BTreeMap<String, i32>,
    pub tags: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateReleaseRequest {
    /// App the release belongs to
    pub parent: String,
    pub release: Release,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateDeploymentRequest {
    /// Release to deploy
    pub parent: String,
    pub scale_request: Option<CreateScaleRequest>,
}

pub trait Paginated {
    fn set_page_size(&mut self, size: u32);
    fn set_page_token(&mut self, token: String);
}

pub trait NameFilterable {
    fn set_name_filters(&mut self, names: Vec<String>);
}

pub trait Streamable {
    fn set_stream_creates(&mut self, on: bool);
    fn set_stream_updates(&mut self, on: bool);
}

macro_rules! impl_request_capabilities {
    ($($req:ty),+ $(,)?) => {
        $(
            impl Paginated for $req {
                fn set_page_size(&mut self, size: u32) {
                    self.page_size = size;
                }

                fn set_page_token(&mut self, token: String) {
                    self.page_token = token;
                }
            }

            impl NameFilterable for $req {
                fn set_name_filters(&mut self, names: Vec<String>) {
                    self.name_filters = names;
                }
            }

            impl Streamable for $req {
                fn set_stream_creates(&mut self, on: bool) {
                    self.stream_creates = on;
                }

                fn set_stream_updates(&mut self, on: bool) {
                    self.stream_updates = on;
                }
            }
        )+
    };
}

impl_request_capabilities!(
    StreamAppsRequest,
    StreamReleasesRequest,
    StreamScalesRequest,
    StreamDeploymentsRequest,
);

/// Mutates an outgoing request of type `R`
pub trait RequestModifier<R>: Send + Sync {
    fn apply(&self, req: &mut R);

    /// Stable identity of this modification
    fn key(&self) -> String;
}

pub type Modifier<R> = Arc<dyn RequestModifier<R>>;

/// Build a request by applying `modifiers` in order to a default request
pub fn build_request<R: Default>(modifiers: &[Modifier<R>]) -> R {
    let mut req = R::default();
    for modifier in modifiers {
        modifier.apply(&mut req);
    }
    req
}

/// Order-independent signature of a modifier list
pub fn filter_signature<R>(modifiers: &[Modifier<R>]) -> String {
    let mut keys: Vec<String> = modifiers.iter().map(|m| m.key()).collect();
    keys.sort();
    keys.dedup();
    keys.join(":")
}

struct PageSize(u32);

impl<R: Paginated> RequestModifier<R> for PageSize {
    fn apply(&self, req: &mut R) {
        req.set_page_size(self.0);
    }

    fn key(&self) -> String {
        format!("pageSize--{}", self.0)
    }
}

struct PageToken(String);

impl<R: Paginated> RequestModifier<R> for PageToken {
    fn apply(&self, req: &mut R) {
        req.set_page_token(self.0.clone());
    }

    fn key(&self) -> String {
        format!("pageToken--{}", self.0)
    }
}

struct NameFilters(Vec<String>);

impl<R: NameFilterable> RequestModifier<R> for NameFilters {
    fn apply(&self, req: &mut R) {
        req.set_name_filters(self.0.clone());
    }

    fn key(&self) -> String {
        format!("nameFilters--{}", self.0.join("|"))
    }
}

struct StreamCreates;

impl<R: Streamable> RequestModifier<R> for StreamCreates {
    fn apply(&self, req: &mut R) {
        req.set_stream_creates(true);
    }

    fn key(&self) -> String {
        "streamCreates".to_string()
    }
}

struct StreamUpdates;

impl<R: Streamable> RequestModifier<R> for StreamUpdates {
    fn apply(&self, req: &mut R) {
        req.set_stream_updates(true);
    }

    fn key(&self) -> String {
        "streamUpdates".to_string()
    }
}

struct DeploymentTypeFilters(Vec<ReleaseType>);

impl RequestModifier<StreamDeploymentsRequest> for DeploymentTypeFilters {
    fn apply(&self, req: &mut StreamDeploymentsRequest) {
        req.type_filters = self.0.clone();
    }

    fn key(&self) -> String {
        let types: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        format!("filterTypes--{}", types.join("|"))
    }
}

struct DeploymentStatusFilters(Vec<DeploymentStatus>);

impl RequestModifier<StreamDeploymentsRequest> for DeploymentStatusFilters {
    fn apply(&self, req: &mut StreamDeploymentsRequest) {
        req.status_filters = self.0.clone();
    }

    fn key(&self) -> String {
        let statuses: Vec<&str> = self.0.iter().map(|s| s.as_str()).collect();
        format!("filterStatus--{}", statuses.join("|"))
    }
}

struct ExcludeAppsWithLabels(Vec<(String, String)>);

impl RequestModifier<StreamAppsRequest> for ExcludeAppsWithLabels {
    fn apply(&self, req: &mut StreamAppsRequest) {
        for (key, value) in &self.0 {
            req.label_filters.push(LabelFilter {
                expressions: vec![LabelExpression {
                    key: key.clone(),
                    op: LabelOperator::NotIn,
                    values: vec![value.clone()],
                }],
            });
        }
    }

    fn key(&self) -> String {
        let json = serde_json::to_string(&self.0).unwrap_or_default();
        format!("excludeAppsWithLabels--{}", json)
    }
}

struct ScaleStateFilters(Vec<ScaleRequestState>);

impl RequestModifier<StreamScalesRequest> for ScaleStateFilters {
    fn apply(&self, req: &mut StreamScalesRequest) {
        req.state_filters = self.0.clone();
    }

    fn key(&self) -> String {
        let states: Vec<&str> = self.0.iter().map(|s| s.as_str()).collect();
        let json = serde_json::to_string(&states).unwrap_or_default();
        format!("stateFilters--{}", json)
    }
}

pub fn set_page_size<R: Paginated + 'static>(size: u32) -> Modifier<R> {
    Arc::new(PageSize(size))
}

pub fn set_page_token<R: Paginated + 'static>(token: impl Into<String>) -> Modifier<R> {
    Arc::new(PageToken(token.into()))
}

pub fn set_name_filters<R, I, S>(names: I) -> Modifier<R>
where
    R: NameFilterable + 'static,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(NameFilters(names.into_iter().map(Into::into).collect()))
}

pub fn set_stream_creates<R: Streamable + 'static>() -> Modifier<R> {
    Arc::new(StreamCreates)
}

pub fn set_stream_updates<R: Streamable + 'static>() -> Modifier<R> {
    Arc::new(StreamUpdates)
}

pub fn set_deployment_type_filters(
    types: impl IntoIterator<Item = ReleaseType>,
) -> Modifier<StreamDeploymentsRequest> {
    Arc::new(DeploymentTypeFilters(types.into_iter().collect()))
}

pub fn set_deployment_status_filters(
    statuses: impl IntoIterator<Item = DeploymentStatus>,
) -> Modifier<StreamDeploymentsRequest> {
    Arc::new(DeploymentStatusFilters(statuses.into_iter().collect()))
}

pub fn exclude_apps_with_labels<K, V>(
    labels: impl IntoIterator<Item = (K, V)>,
) -> Modifier<StreamAppsRequest>
where
    K: Into<String>,
    V: Into<String>,
{
    Arc::new(ExcludeAppsWithLabels(
        labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    ))
}

pub fn filter_scales_by_state(
    states: impl IntoIterator<Item = ScaleRequestState>,
) -> Modifier<StreamScalesRequest> {
    Arc::new(ScaleStateFilters(states.into_iter().collect()))
}
