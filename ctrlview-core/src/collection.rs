//! Consumer-side state of a streamed collection
//!
//! A [`Collection`] owns one multiplexed subscription and folds its updates
//! into a [`CollectionState`] through [`reduce`]. Singular views (one app,
//! one release, the current scale) are projections of a collection state.

use crate::model::{
    App, ExpandedDeployment, Release, ScaleRequest, StreamAppsResponse, StreamDeploymentsResponse,
    StreamReleasesResponse, StreamScalesResponse,
};
use crate::multiplexer::{StreamSubscription, StreamUpdate};
use crate::transport::TransportError;

/// A stream response that carries a list of records
pub trait Listing {
    type Item: Clone;

    fn items(&self) -> &[Self::Item];
    fn next_page_token(&self) -> &str;
}

impl Listing for StreamAppsResponse {
    type Item = App;

    fn items(&self) -> &[App] {
        &self.apps
    }

    fn next_page_token(&self) -> &str {
        &self.next_page_token
    }
}

impl Listing for StreamReleasesResponse {
    type Item = Release;

    fn items(&self) -> &[Release] {
        &self.releases
    }

    fn next_page_token(&self) -> &str {
        &self.next_page_token
    }
}

impl Listing for StreamScalesResponse {
    type Item = ScaleRequest;

    fn items(&self) -> &[ScaleRequest] {
        &self.scale_requests
    }

    fn next_page_token(&self) -> &str {
        &self.next_page_token
    }
}

impl Listing for StreamDeploymentsResponse {
    type Item = ExpandedDeployment;

    fn items(&self) -> &[ExpandedDeployment] {
        &self.deployments
    }

    fn next_page_token(&self) -> &str {
        &self.next_page_token
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CollectionEvent<T> {
    Data { items: Vec<T>, next_page_token: String },
    Error(TransportError),
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionState<T> {
    pub loading: bool,
    pub items: Vec<T>,
    pub next_page_token: String,
    pub error: Option<TransportError>,
    /// The server closed the stream
    pub ended: bool,
}

impl<T> CollectionState<T> {
    /// Waiting for the first message
    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::idle()
        }
    }

    /// No stream was opened
    pub fn idle() -> Self {
        Self {
            loading: false,
            items: Vec::new(),
            next_page_token: String::new(),
            error: None,
            ended: false,
        }
    }
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

pub fn reduce<T: Clone>(state: &mut CollectionState<T>, event: &CollectionEvent<T>) {
    match event {
        CollectionEvent::Data { items, next_page_token } => {
            state.items = items.clone();
            state.next_page_token = next_page_token.clone();
            state.error = None;
            state.loading = false;
        }
        CollectionEvent::Error(err) => {
            // keep the last items on screen
            state.error = Some(err.clone());
            state.loading = false;
        }
        CollectionEvent::End => {
            state.ended = true;
            state.loading = false;
        }
    }
}

fn event_of<R: Listing>(update: &StreamUpdate<R>) -> CollectionEvent<R::Item> {
    match update {
        StreamUpdate::Data(data) => CollectionEvent::Data {
            items: data.items().to_vec(),
            next_page_token: data.next_page_token().to_string(),
        },
        StreamUpdate::Error(err) => CollectionEvent::Error(err.clone()),
        StreamUpdate::End => CollectionEvent::End,
    }
}

/// A subscribed collection and its folded state
#[derive(Debug)]
pub struct Collection<R: Listing> {
    subscription: Option<StreamSubscription<R>>,
    state: CollectionState<R::Item>,
}

impl<R: Listing> Collection<R> {
    pub fn new(subscription: StreamSubscription<R>) -> Self {
        Self {
            subscription: Some(subscription),
            state: CollectionState::loading(),
        }
    }

    /// A collection that never receives data
    pub fn idle() -> Self {
        Self {
            subscription: None,
            state: CollectionState::idle(),
        }
    }

    pub fn state(&self) -> &CollectionState<R::Item> {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Wait for the next update and fold it in. Returns false once no more
    /// updates can arrive.
    pub async fn changed(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.next().await {
            Some(update) => {
                self.apply(&update);
                true
            }
            None => {
                self.subscription = None;
                false
            }
        }
    }

    /// Fold every update already queued. Returns true if the state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Some(update) = self.subscription.as_mut().and_then(|s| s.try_next()) {
            self.apply(&update);
            changed = true;
        }
        changed
    }

    /// Release the subscription. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn apply(&mut self, update: &StreamUpdate<R>) {
        reduce(&mut self.state, &event_of(update));
        if matches!(update, StreamUpdate::End) {
            self.subscription = None;
        }
    }
}

/// A single resource projected from a collection
#[derive(Clone, Debug, PartialEq)]
pub struct SingleState<T> {
    pub loading: bool,
    pub value: Option<T>,
    pub error: Option<TransportError>,
}

impl<T> SingleState<T> {
    fn from_error(loading: bool, error: Option<TransportError>) -> Self {
        Self {
            loading,
            value: None,
            error,
        }
    }
}

/// First app of a name-filtered query. Loaded but empty is NotFound.
pub fn app_view(state: &CollectionState<App>, requested: bool) -> SingleState<App> {
    if state.error.is_some() || state.loading || !requested {
        return SingleState::from_error(state.loading, state.error.clone());
    }
    match state.items.first() {
        Some(app) => SingleState {
            loading: false,
            value: Some(app.clone()),
            error: None,
        },
        None => SingleState::from_error(false, Some(TransportError::not_found("App not found"))),
    }
}

/// First release, if any
pub fn release_view(state: &CollectionState<Release>) -> SingleState<Release> {
    SingleState {
        loading: state.loading,
        value: state.items.first().cloned(),
        error: state.error.clone(),
    }
}

/// Most recent completed scale, or a synthetic completed one when the app
/// has none yet
pub fn app_scale_view(state: &CollectionState<ScaleRequest>) -> SingleState<ScaleRequest> {
    let value = match state.items.first() {
        Some(scale) => Some(scale.clone()),
        None if state.loading => None,
        None => Some(ScaleRequest::completed_placeholder()),
    };
    SingleState {
        loading: state.loading,
        value,
        error: state.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScaleRequestState;
    use crate::transport::Code;

    fn data<T: Clone>(items: &[T], token: &str) -> CollectionEvent<T> {
        CollectionEvent::Data {
            items: items.to_vec(),
            next_page_token: token.into(),
        }
    }

    fn app(name: &str) -> App {
        App {
            name: name.into(),
            display_name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_data_clears_loading_and_error() {
        let mut state = CollectionState::loading();
        reduce(&mut state, &CollectionEvent::Error(TransportError::unknown()));
        assert!(!state.loading);
        assert!(state.error.is_some());

        reduce(&mut state, &data(&[app("apps/a")], "next"));
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.next_page_token, "next");
        assert!(state.error.is_none());
    }

    #[test]
    fn test_error_keeps_items() {
        let mut state = CollectionState::loading();
        reduce(&mut state, &data(&[app("apps/a"), app("apps/b")], ""));
        reduce(&mut state, &CollectionEvent::Error(TransportError::new(Code::Unavailable, "down")));
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.error.as_ref().map(|e| e.code), Some(Code::Unavailable));
    }

    #[test]
    fn test_end_marks_state() {
        let mut state: CollectionState<App> = CollectionState::loading();
        reduce(&mut state, &CollectionEvent::End);
        assert!(state.ended);
        assert!(!state.loading);
    }

    #[test]
    fn test_app_view_not_found_on_empty() {
        let mut state = CollectionState::loading();
        assert!(app_view(&state, true).loading);

        reduce(&mut state, &data(&[], ""));
        let view = app_view(&state, true);
        assert!(view.value.is_none());
        let err = view.error.expect("not found");
        assert!(err.is_not_found());
        assert_eq!(err.message, "App not found");

        reduce(&mut state, &data(&[app("apps/a")], ""));
        assert_eq!(app_view(&state, true).value.map(|a| a.name), Some("apps/a".to_string()));
    }

    #[test]
    fn test_app_view_without_name_is_noop() {
        let view = app_view(&CollectionState::idle(), false);
        assert!(!view.loading);
        assert!(view.value.is_none());
        assert!(view.error.is_none());
    }

    #[test]
    fn test_release_view() {
        let mut state = CollectionState::loading();
        reduce(&mut state, &data(&[], ""));
        assert_eq!(release_view(&state).value, None);

        let release = Release {
            name: "apps/a/releases/r1".into(),
            ..Default::default()
        };
        reduce(&mut state, &data(&[release.clone()], ""));
        assert_eq!(release_view(&state).value, Some(release));
    }

    #[test]
    fn test_app_scale_placeholder() {
        let idle = app_scale_view(&CollectionState::idle());
        assert_eq!(idle.value.map(|s| s.state), Some(ScaleRequestState::Complete));

        let loading = app_scale_view(&CollectionState::loading());
        assert!(loading.loading);
        assert!(loading.value.is_none());
    }
}
