//! Controller transport contract
//!
//! The transport is an external collaborator: an RPC client that opens
//! server-push streams and performs unary writes. Streams are modelled as a
//! channel of [`TransportEvent`]s plus a cancel handle; the producer side is a
//! [`StreamSink`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::merge::MergeResponse;
use crate::model::{
    App, Release, ScaleRequest, StreamAppsResponse, StreamDeploymentsResponse,
    StreamReleasesResponse, StreamScalesResponse,
};
use crate::request::{
    CreateDeploymentRequest, CreateReleaseRequest, CreateScaleRequest, StreamAppsRequest,
    StreamDeploymentsRequest, StreamReleasesRequest, StreamScalesRequest,
};
use crate::subscription::Subscription;

/// Request metadata sent with every call
pub type Metadata = BTreeMap<String, String>;

pub const AUTH_KEY_HEADER: &str = "Auth-Key";

/// RPC status codes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Code {
    #[default]
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    pub fn as_i32(self) -> i32 {
        match self {
            Code::Ok => 0,
            Code::Cancelled => 1,
            Code::Unknown => 2,
            Code::InvalidArgument => 3,
            Code::DeadlineExceeded => 4,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::ResourceExhausted => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted => 10,
            Code::OutOfRange => 11,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
            Code::DataLoss => 15,
            Code::Unauthenticated => 16,
        }
    }

    /// Unrecognised numbers map to `Unknown`
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }
}

impl From<i32> for Code {
    fn from(code: i32) -> Self {
        Code::from_i32(code)
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Terminal status of a call or stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub details: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: Code, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// A non-OK status surfaced to callers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub code: Code,
    pub message: String,
}

impl TransportError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unknown() -> Self {
        Self::new(Code::Unknown, "Unknown error")
    }

    /// The requested resource does not exist; callers usually treat this as
    /// an empty state
    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.as_i32(), self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<Status> for TransportError {
    fn from(status: Status) -> Self {
        Self {
            code: status.code,
            message: status.details,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent<M> {
    Data(M),
    /// Terminal status. OK statuses are followed by `End`.
    Status(Status),
    End,
}

/// Producer half of a response stream
#[derive(Debug)]
pub struct StreamSink<M> {
    tx: mpsc::UnboundedSender<TransportEvent<M>>,
    cancelled: Arc<AtomicBool>,
}

impl<M> Clone for StreamSink<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl<M> StreamSink<M> {
    /// Returns false once the consumer has cancelled or gone away
    pub fn send_data(&self, message: M) -> bool {
        self.send(TransportEvent::Data(message))
    }

    pub fn send_status(&self, status: Status) -> bool {
        self.send(TransportEvent::Status(status))
    }

    /// OK status followed by end-of-stream
    pub fn end(&self) -> bool {
        self.send_status(Status::ok()) && self.send(TransportEvent::End)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    fn send(&self, event: TransportEvent<M>) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

/// Consumer half of a server-push stream
#[derive(Debug)]
pub struct ResponseStream<M> {
    events: mpsc::UnboundedReceiver<TransportEvent<M>>,
    cancel: Subscription,
}

impl<M> ResponseStream<M> {
    /// A connected sink/stream pair. Cancelling the stream marks the sink
    /// cancelled.
    pub fn channel() -> (StreamSink<M>, Self) {
        let (tx, events) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let stream = Self {
            events,
            cancel: Subscription::new(move || flag.store(true, Ordering::SeqCst)),
        };
        (StreamSink { tx, cancelled }, stream)
    }

    pub async fn recv(&mut self) -> Option<TransportEvent<M>> {
        self.events.recv().await
    }

    /// Cancel the underlying call. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.dispose();
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<TransportEvent<M>>, Subscription) {
        (self.events, self.cancel)
    }
}

/// RPC client for the controller API
#[async_trait]
pub trait ControllerTransport: Send + Sync {
    fn stream_apps(&self, req: StreamAppsRequest, metadata: &Metadata) -> ResponseStream<StreamAppsResponse>;

    fn stream_releases(
        &self,
        req: StreamReleasesRequest,
        metadata: &Metadata,
    ) -> ResponseStream<StreamReleasesResponse>;

    fn stream_scales(&self, req: StreamScalesRequest, metadata: &Metadata) -> ResponseStream<StreamScalesResponse>;

    fn stream_deployments(
        &self,
        req: StreamDeploymentsRequest,
        metadata: &Metadata,
    ) -> ResponseStream<StreamDeploymentsResponse>;

    /// `Ok(None)` means the server replied with neither a value nor an error
    async fn update_app(&self, app: App, metadata: &Metadata) -> Result<Option<App>, TransportError>;

    async fn create_scale(
        &self,
        req: CreateScaleRequest,
        metadata: &Metadata,
    ) -> Result<Option<ScaleRequest>, TransportError>;

    async fn create_release(
        &self,
        req: CreateReleaseRequest,
        metadata: &Metadata,
    ) -> Result<Option<Release>, TransportError>;

    /// Creating a deployment only reports a terminal status
    async fn create_deployment(&self, req: CreateDeploymentRequest, metadata: &Metadata) -> Status;
}

/// A streaming RPC that can be shared through the multiplexer
pub trait StreamOperation: Send + Sync + 'static {
    type Request: Default + Send + 'static;
    type Response: MergeResponse + Clone + Send + Sync + 'static;

    /// Operation name, the first part of a registry key
    const NAME: &'static str;

    fn open(
        transport: &dyn ControllerTransport,
        req: Self::Request,
        metadata: &Metadata,
    ) -> ResponseStream<Self::Response>;
}

pub struct StreamApps;
pub struct StreamReleases;
pub struct StreamScales;
pub struct StreamDeployments;

impl StreamOperation for StreamApps {
    type Request = StreamAppsRequest;
    type Response = StreamAppsResponse;
    const NAME: &'static str = "streamApps";

    fn open(transport: &dyn ControllerTransport, req: Self::Request, metadata: &Metadata) -> ResponseStream<Self::Response> {
        transport.stream_apps(req, metadata)
    }
}

impl StreamOperation for StreamReleases {
    type Request = StreamReleasesRequest;
    type Response = StreamReleasesResponse;
    const NAME: &'static str = "streamReleases";

    fn open(transport: &dyn ControllerTransport, req: Self::Request, metadata: &Metadata) -> ResponseStream<Self::Response> {
        transport.stream_releases(req, metadata)
    }
}

impl StreamOperation for StreamScales {
    type Request = StreamScalesRequest;
    type Response = StreamScalesResponse;
    const NAME: &'static str = "streamAppScales";

    fn open(transport: &dyn ControllerTransport, req: Self::Request, metadata: &Metadata) -> ResponseStream<Self::Response> {
        transport.stream_scales(req, metadata)
    }
}

impl StreamOperation for StreamDeployments {
    type Request = StreamDeploymentsRequest;
    type Response = StreamDeploymentsResponse;
    const NAME: &'static str = "streamDeployments";

    fn open(transport: &dyn ControllerTransport, req: Self::Request, metadata: &Metadata) -> ResponseStream<Self::Response> {
        transport.stream_deployments(req, metadata)
    }
}

/// Scriptable in-memory transport for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    pub struct Opened<Req, Resp> {
        pub request: Req,
        pub metadata: Metadata,
        pub sink: StreamSink<Resp>,
    }

    #[derive(Default)]
    pub struct FakeTransport {
        pub apps: Mutex<Vec<Opened<StreamAppsRequest, StreamAppsResponse>>>,
        pub releases: Mutex<Vec<Opened<StreamReleasesRequest, StreamReleasesResponse>>>,
        pub scales: Mutex<Vec<Opened<StreamScalesRequest, StreamScalesResponse>>>,
        pub deployments: Mutex<Vec<Opened<StreamDeploymentsRequest, StreamDeploymentsResponse>>>,
        pub writes: Mutex<Vec<String>>,
        /// Reply to unary writes with nothing at all
        pub empty_replies: AtomicBool,
    }

    fn open<Req, Resp>(
        log: &Mutex<Vec<Opened<Req, Resp>>>,
        request: Req,
        metadata: &Metadata,
    ) -> ResponseStream<Resp> {
        let (sink, stream) = ResponseStream::channel();
        log.lock().unwrap().push(Opened {
            request,
            metadata: metadata.clone(),
            sink,
        });
        stream
    }

    impl FakeTransport {
        pub fn scale_sink(&self, index: usize) -> StreamSink<StreamScalesResponse> {
            self.scales.lock().unwrap()[index].sink.clone()
        }

        pub fn deployment_sink(&self, index: usize) -> StreamSink<StreamDeploymentsResponse> {
            self.deployments.lock().unwrap()[index].sink.clone()
        }

        pub fn release_sink(&self, index: usize) -> StreamSink<StreamReleasesResponse> {
            self.releases.lock().unwrap()[index].sink.clone()
        }

        pub fn app_sink(&self, index: usize) -> StreamSink<StreamAppsResponse> {
            self.apps.lock().unwrap()[index].sink.clone()
        }
    }

    #[async_trait]
    impl ControllerTransport for FakeTransport {
        fn stream_apps(&self, req: StreamAppsRequest, metadata: &Metadata) -> ResponseStream<StreamAppsResponse> {
            open(&self.apps, req, metadata)
        }

        fn stream_releases(
            &self,
            req: StreamReleasesRequest,
            metadata: &Metadata,
        ) -> ResponseStream<StreamReleasesResponse> {
            open(&self.releases, req, metadata)
        }

        fn stream_scales(&self, req: StreamScalesRequest, metadata: &Metadata) -> ResponseStream<StreamScalesResponse> {
            open(&self.scales, req, metadata)
        }

        fn stream_deployments(
            &self,
            req: StreamDeploymentsRequest,
            metadata: &Metadata,
        ) -> ResponseStream<StreamDeploymentsResponse> {
            open(&self.deployments, req, metadata)
        }

        async fn update_app(&self, app: App, _metadata: &Metadata) -> Result<Option<App>, TransportError> {
            self.writes.lock().unwrap().push(format!("update_app {}", app.name));
            if self.empty_replies.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(app))
        }

        async fn create_scale(
            &self,
            req: CreateScaleRequest,
            _metadata: &Metadata,
        ) -> Result<Option<ScaleRequest>, TransportError> {
            self.writes.lock().unwrap().push(format!("create_scale {}", req.parent));
            if self.empty_replies.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(ScaleRequest {
                name: format!("{}/scales/new", req.parent),
                new_processes: req.processes,
                ..Default::default()
            }))
        }

        async fn create_release(
            &self,
            req: CreateReleaseRequest,
            _metadata: &Metadata,
        ) -> Result<Option<Release>, TransportError> {
            self.writes.lock().unwrap().push(format!("create_release {}", req.parent));
            if req.parent.is_empty() {
                return Err(TransportError::new(Code::InvalidArgument, "parent is required"));
            }
            if self.empty_replies.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(Release {
                name: format!("{}/releases/new", req.parent),
                ..req.release
            }))
        }

        async fn create_deployment(&self, req: CreateDeploymentRequest, _metadata: &Metadata) -> Status {
            self.writes.lock().unwrap().push(format!("create_deployment {}", req.parent));
            if req.parent.is_empty() {
                return Status::new(Code::InvalidArgument, "parent is required");
            }
            Status::ok()
        }
    }
}
