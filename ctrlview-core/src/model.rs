//! Controller resources as delivered by the streaming API
//!
//! Every resource is identified by its resource name (`apps/<id>`,
//! `apps/<id>/releases/<id>`, ...). Creation times order releases, scale
//! requests and deployments; a record without one sorts after every dated
//! record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Identity contract shared by all streamed resources
pub trait Record {
    /// Unique resource name
    fn name(&self) -> &str;

    fn create_time(&self) -> Option<Timestamp> {
        None
    }
}

/// Last path segment of a resource name (`apps/a/scales/x` -> `x`)
pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// `apps/<id>` prefix of a nested resource name
pub fn app_name_of(name: &str) -> Option<&str> {
    let mut parts = name.splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some("apps"), Some(id)) if !id.is_empty() => Some(&name[..5 + id.len()]),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Resource name of the current release, empty if none
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    #[serde(default)]
    pub update_time: Option<Timestamp>,
    /// Set once the app has been deleted
    #[serde(default)]
    pub delete_time: Option<Timestamp>,
}

impl App {
    pub fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }
}

impl Record for App {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    #[default]
    Any,
    Code,
    Config,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Any => "any",
            ReleaseType::Code => "code",
            ReleaseType::Config => "config",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessType {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessType>,
    #[serde(default)]
    pub create_time: Option<Timestamp>,
}

impl Record for Release {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleRequestState {
    #[default]
    Pending,
    Cancelled,
    Complete,
}

impl ScaleRequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleRequestState::Pending => "pending",
            ScaleRequestState::Cancelled => "cancelled",
            ScaleRequestState::Complete => "complete",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleRequest {
    /// `apps/<app>/releases/<release>/scales/<id>`
    pub name: String,
    #[serde(default)]
    pub state: ScaleRequestState,
    #[serde(default)]
    pub old_processes: BTreeMap<String, i32>,
    #[serde(default)]
    pub new_processes: BTreeMap<String, i32>,
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    #[serde(default)]
    pub update_time: Option<Timestamp>,
}

impl ScaleRequest {
    /// Placeholder used when an app has no scale request yet
    pub fn completed_placeholder() -> Self {
        Self {
            state: ScaleRequestState::Complete,
            ..Self::default()
        }
    }

    /// Resource name of the release this request scales
    pub fn release_name(&self) -> Option<&str> {
        self.name.find("/scales/").map(|at| &self.name[..at])
    }
}

impl Record for ScaleRequest {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Failed,
    Complete,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Complete => "complete",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandedDeployment {
    /// `apps/<app>/deployments/<id>`
    pub name: String,
    #[serde(default)]
    pub old_release: Option<Release>,
    #[serde(default)]
    pub new_release: Option<Release>,
    #[serde(default)]
    pub release_type: ReleaseType,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default)]
    pub processes: BTreeMap<String, i32>,
    #[serde(default)]
    pub create_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
}

impl Record for ExpandedDeployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }
}

/// One entry of an app's release history timeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseHistoryItem {
    Scale(ScaleRequest),
    Deployment(ExpandedDeployment),
}

impl ReleaseHistoryItem {
    pub fn is_scale_request(&self) -> bool {
        matches!(self, ReleaseHistoryItem::Scale(_))
    }

    pub fn is_deployment(&self) -> bool {
        matches!(self, ReleaseHistoryItem::Deployment(_))
    }
}

impl Record for ReleaseHistoryItem {
    fn name(&self) -> &str {
        match self {
            ReleaseHistoryItem::Scale(s) => &s.name,
            ReleaseHistoryItem::Deployment(d) => &d.name,
        }
    }

    fn create_time(&self) -> Option<Timestamp> {
        match self {
            ReleaseHistoryItem::Scale(s) => s.create_time,
            ReleaseHistoryItem::Deployment(d) => d.create_time,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamAppsResponse {
    pub apps: Vec<App>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamReleasesResponse {
    pub releases: Vec<Release>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamScalesResponse {
    pub scale_requests: Vec<ScaleRequest>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDeploymentsResponse {
    pub deployments: Vec<ExpandedDeployment>,
    #[serde(default)]
    pub next_page_token: String,
}
