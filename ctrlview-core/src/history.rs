//! Release history: an app's scale requests and deployments as one timeline

use chrono::NaiveDate;
use tracing::debug;

use crate::collection::{CollectionEvent, CollectionState, reduce};
use crate::merge::merge_history;
use crate::model::{
    ExpandedDeployment, Record, Release, ReleaseHistoryItem, ScaleRequest, StreamDeploymentsResponse,
    StreamScalesResponse, short_name,
};
use crate::multiplexer::{StreamSubscription, StreamUpdate};

enum Source {
    Scales(Option<StreamUpdate<StreamScalesResponse>>),
    Deployments(Option<StreamUpdate<StreamDeploymentsResponse>>),
}

async fn next_of<R>(subscription: &mut Option<StreamSubscription<R>>) -> Option<StreamUpdate<R>> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Combined history of two optional sources
#[derive(Debug)]
pub struct ReleaseHistory {
    scales: Option<StreamSubscription<StreamScalesResponse>>,
    deployments: Option<StreamSubscription<StreamDeploymentsResponse>>,
    state: CollectionState<ReleaseHistoryItem>,
}

impl ReleaseHistory {
    /// `None` disables a source. With both disabled nothing loads.
    pub fn new(
        scales: Option<StreamSubscription<StreamScalesResponse>>,
        deployments: Option<StreamSubscription<StreamDeploymentsResponse>>,
    ) -> Self {
        let state = if scales.is_some() || deployments.is_some() {
            CollectionState::loading()
        } else {
            CollectionState::idle()
        };
        Self {
            scales,
            deployments,
            state,
        }
    }

    pub fn state(&self) -> &CollectionState<ReleaseHistoryItem> {
        &self.state
    }

    pub fn items(&self) -> &[ReleaseHistoryItem] {
        &self.state.items
    }

    pub fn is_active(&self) -> bool {
        self.scales.is_some() || self.deployments.is_some()
    }

    /// Wait for an update from either source and fold it in. Returns false
    /// once both sources are finished.
    pub async fn changed(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let source = tokio::select! {
            update = next_of(&mut self.scales) => Source::Scales(update),
            update = next_of(&mut self.deployments) => Source::Deployments(update),
        };
        match source {
            Source::Scales(update) => self.absorb_scales(update),
            Source::Deployments(update) => self.absorb_deployments(update),
        }
        true
    }

    /// Fold every queued update. Returns true if anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Some(update) = self.scales.as_mut().and_then(|s| s.try_next()) {
            self.absorb_scales(Some(update));
            changed = true;
        }
        while let Some(update) = self.deployments.as_mut().and_then(|s| s.try_next()) {
            self.absorb_deployments(Some(update));
            changed = true;
        }
        changed
    }

    /// Release both subscriptions. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(mut scales) = self.scales.take() {
            scales.unsubscribe();
        }
        if let Some(mut deployments) = self.deployments.take() {
            deployments.unsubscribe();
        }
    }

    fn absorb_scales(&mut self, update: Option<StreamUpdate<StreamScalesResponse>>) {
        match update {
            Some(StreamUpdate::Data(data)) => {
                let items: Vec<ReleaseHistoryItem> = data
                    .scale_requests
                    .iter()
                    .cloned()
                    .map(ReleaseHistoryItem::Scale)
                    .collect();
                self.absorb_items(&items, &data.next_page_token);
            }
            Some(StreamUpdate::Error(err)) => reduce(&mut self.state, &CollectionEvent::Error(err)),
            Some(StreamUpdate::End) | None => {
                debug!("scale history source ended");
                self.scales = None;
                self.end_if_finished();
            }
        }
    }

    fn absorb_deployments(&mut self, update: Option<StreamUpdate<StreamDeploymentsResponse>>) {
        match update {
            Some(StreamUpdate::Data(data)) => {
                let items: Vec<ReleaseHistoryItem> = data
                    .deployments
                    .iter()
                    .cloned()
                    .map(ReleaseHistoryItem::Deployment)
                    .collect();
                self.absorb_items(&items, &data.next_page_token);
            }
            Some(StreamUpdate::Error(err)) => reduce(&mut self.state, &CollectionEvent::Error(err)),
            Some(StreamUpdate::End) | None => {
                debug!("deployment history source ended");
                self.deployments = None;
                self.end_if_finished();
            }
        }
    }

    fn absorb_items(&mut self, incoming: &[ReleaseHistoryItem], next_page_token: &str) {
        let items = merge_history(Some(self.state.items.as_slice()), incoming);
        reduce(
            &mut self.state,
            &CollectionEvent::Data {
                items,
                next_page_token: next_page_token.to_string(),
            },
        );
    }

    fn end_if_finished(&mut self) {
        if !self.is_active() {
            reduce(&mut self.state, &CollectionEvent::End);
        }
    }
}

/// One rendered line group of the timeline
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryRow<'a> {
    /// Starts a new calendar day (UTC)
    DateHeader(NaiveDate),
    Scale {
        index: usize,
        short_name: &'a str,
        scale: &'a ScaleRequest,
    },
    Release {
        index: usize,
        short_name: &'a str,
        new_release: Option<&'a Release>,
        old_release: Option<&'a Release>,
        deployment: &'a ExpandedDeployment,
    },
}

impl HistoryRow<'_> {
    /// Index of the history item, `None` for headers
    pub fn index(&self) -> Option<usize> {
        match self {
            HistoryRow::DateHeader(_) => None,
            HistoryRow::Scale { index, .. } | HistoryRow::Release { index, .. } => Some(*index),
        }
    }
}

/// Calendar day an item is grouped under
pub fn item_date(item: &ReleaseHistoryItem) -> NaiveDate {
    item.create_time().map(|t| t.date_naive()).unwrap_or_default()
}

/// Rows for `items[start..start + len]`, with a day header before the first
/// row and before every row dated earlier than the one above it.
pub fn history_rows(items: &[ReleaseHistoryItem], start: usize, len: usize) -> Vec<HistoryRow<'_>> {
    let end = start.saturating_add(len).min(items.len());
    let mut rows = Vec::new();
    let mut prev: Option<NaiveDate> = None;

    for (index, item) in items.iter().enumerate().take(end).skip(start) {
        let date = item_date(item);
        if prev.is_none_or(|p| date < p) {
            rows.push(HistoryRow::DateHeader(date));
        }
        prev = Some(date);

        rows.push(match item {
            ReleaseHistoryItem::Scale(scale) => HistoryRow::Scale {
                index,
                short_name: short_name(&scale.name),
                scale,
            },
            ReleaseHistoryItem::Deployment(deployment) => HistoryRow::Release {
                index,
                short_name: short_name(&deployment.name),
                new_release: deployment.new_release.as_ref(),
                old_release: deployment.old_release.as_ref(),
                deployment,
            },
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::Multiplexer;
    use crate::request::{set_name_filters, set_stream_creates, set_stream_updates};
    use crate::transport::fake::FakeTransport;
    use crate::transport::{Code, Metadata, Status, StreamDeployments, StreamScales};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn at(day: u32, hour: u32) -> Option<chrono::DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap())
    }

    fn scale(name: &str, day: u32, hour: u32) -> ScaleRequest {
        ScaleRequest {
            name: format!("apps/a/releases/r1/scales/{}", name),
            create_time: at(day, hour),
            ..Default::default()
        }
    }

    fn deployment(name: &str, day: u32, hour: u32) -> ExpandedDeployment {
        ExpandedDeployment {
            name: format!("apps/a/deployments/{}", name),
            new_release: Some(Release {
                name: format!("apps/a/releases/{}", name),
                ..Default::default()
            }),
            create_time: at(day, hour),
            ..Default::default()
        }
    }

    #[test]
    fn test_rows_insert_day_headers() {
        let items = vec![
            ReleaseHistoryItem::Deployment(deployment("d2", 3, 12)),
            ReleaseHistoryItem::Scale(scale("s2", 3, 9)),
            ReleaseHistoryItem::Scale(scale("s1", 2, 18)),
            ReleaseHistoryItem::Deployment(deployment("d1", 1, 8)),
        ];
        let rows = history_rows(&items, 0, 10);
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();

        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0], HistoryRow::DateHeader(day(3)));
        assert!(matches!(rows[1], HistoryRow::Release { short_name: "d2", index: 0, .. }));
        assert!(matches!(rows[2], HistoryRow::Scale { short_name: "s2", index: 1, .. }));
        assert_eq!(rows[3], HistoryRow::DateHeader(day(2)));
        assert_eq!(rows[5], HistoryRow::DateHeader(day(1)));
        assert_eq!(rows[6].index(), Some(3));
    }

    #[test]
    fn test_rows_window_starts_with_header() {
        let items = vec![
            ReleaseHistoryItem::Scale(scale("s3", 3, 9)),
            ReleaseHistoryItem::Scale(scale("s2", 3, 8)),
            ReleaseHistoryItem::Scale(scale("s1", 3, 7)),
        ];
        let rows = history_rows(&items, 1, 1);
        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[0], HistoryRow::DateHeader(_)));
        assert_eq!(rows[1].index(), Some(1));

        assert!(history_rows(&items, 5, 3).is_empty());
    }

    #[test]
    fn test_release_row_carries_both_releases() {
        let mut d = deployment("d1", 1, 1);
        d.old_release = Some(Release {
            name: "apps/a/releases/old".into(),
            ..Default::default()
        });
        let items = vec![ReleaseHistoryItem::Deployment(d)];
        match &history_rows(&items, 0, 1)[1] {
            HistoryRow::Release {
                new_release,
                old_release,
                ..
            } => {
                assert_eq!(new_release.map(|r| r.name.as_str()), Some("apps/a/releases/d1"));
                assert_eq!(old_release.map(|r| r.name.as_str()), Some("apps/a/releases/old"));
            }
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_both_disabled_is_idle() {
        let history = ReleaseHistory::new(None, None);
        assert!(!history.state().loading);
        assert!(!history.is_active());
    }

    #[tokio::test]
    async fn test_combines_both_sources() {
        let fake = Arc::new(FakeTransport::default());
        let metadata = Arc::new(Metadata::new());
        let scales = Multiplexer::<StreamScales>::new(fake.clone(), metadata.clone());
        let deployments = Multiplexer::<StreamDeployments>::new(fake.clone(), metadata);

        let mut history = ReleaseHistory::new(
            Some(scales.subscribe(&[set_name_filters(["apps/a"]), set_stream_creates(), set_stream_updates()])),
            Some(deployments.subscribe(&[set_stream_creates(), set_stream_updates()])),
        );
        assert!(history.state().loading);

        fake.scale_sink(0).send_data(StreamScalesResponse {
            scale_requests: vec![scale("s1", 2, 0)],
            next_page_token: String::new(),
        });
        assert!(history.changed().await);
        assert!(!history.state().loading);
        assert_eq!(history.items().len(), 1);

        fake.deployment_sink(0).send_data(StreamDeploymentsResponse {
            deployments: vec![deployment("d1", 3, 0), deployment("d0", 1, 0)],
            next_page_token: String::new(),
        });
        assert!(history.changed().await);
        let names: Vec<&str> = history.items().iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec!["apps/a/deployments/d1", "apps/a/releases/r1/scales/s1", "apps/a/deployments/d0"]
        );

        fake.scale_sink(0).send_status(Status::new(Code::Internal, "boom"));
        assert!(history.changed().await);
        assert_eq!(history.state().error.as_ref().map(|e| e.code), Some(Code::Internal));
        assert_eq!(history.items().len(), 3);

        history.dispose();
        assert!(fake.deployment_sink(0).is_cancelled());
        assert!(!history.changed().await);
    }

    #[tokio::test]
    async fn test_single_source_end_finishes() {
        let fake = Arc::new(FakeTransport::default());
        let deployments = Multiplexer::<StreamDeployments>::new(fake.clone(), Arc::new(Metadata::new()));
        let mut history = ReleaseHistory::new(None, Some(deployments.subscribe(&[set_stream_creates()])));

        fake.deployment_sink(0).end();
        assert!(history.changed().await);
        assert!(history.state().ended);
        assert!(!history.is_active());
    }
}
