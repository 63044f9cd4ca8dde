//! Snapshot reconciliation for streamed collections
//!
//! A stream delivers batches of created or updated records. Each batch is
//! merged into the previous snapshot by resource name: known names are
//! replaced in place, unknown names are appended, and the result is sorted
//! (stably) by the collection's order. The previous snapshot is never
//! modified.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{
    App, ExpandedDeployment, Record, Release, ReleaseHistoryItem, ScaleRequest,
    StreamAppsResponse, StreamDeploymentsResponse, StreamReleasesResponse, StreamScalesResponse,
};

/// Suffix appended to the display name of an app that was deleted while
/// being watched
pub const DELETED_SUFFIX: &str = " [DELETED]";

/// Merge `incoming` into `prev` by name. `replace` builds the stored record
/// from the existing and incoming ones.
pub fn merge_by_name<T, R, C>(prev: Option<&[T]>, incoming: &[T], mut replace: R, compare: C) -> Vec<T>
where
    T: Record + Clone,
    R: FnMut(&T, &T) -> T,
    C: FnMut(&T, &T) -> Ordering,
{
    let mut items: Vec<T> = prev.map(<[T]>::to_vec).unwrap_or_default();
    let mut positions: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.name().to_string(), i))
        .collect();

    for record in incoming {
        match positions.get(record.name()) {
            Some(&at) => {
                items[at] = replace(&items[at], record);
            }
            None => {
                positions.insert(record.name().to_string(), items.len());
                items.push(record.clone());
            }
        }
    }

    items.sort_by(compare);
    items
}

/// Most recent first; missing timestamps sort last
pub fn newest_first<T: Record>(a: &T, b: &T) -> Ordering {
    b.create_time().cmp(&a.create_time())
}

/// Case-insensitive display-name order, with exact comparison to break ties
pub fn by_display_name(a: &App, b: &App) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.display_name.cmp(&b.display_name))
}

pub fn merge_apps(prev: Option<&[App]>, incoming: &[App]) -> Vec<App> {
    merge_by_name(
        prev,
        incoming,
        |existing, app| {
            let mut app = app.clone();
            if app.is_deleted() {
                app.display_name = format!("{}{}", existing.display_name, DELETED_SUFFIX);
            }
            app
        },
        by_display_name,
    )
}

pub fn merge_releases(prev: Option<&[Release]>, incoming: &[Release]) -> Vec<Release> {
    merge_by_name(prev, incoming, |_, r| r.clone(), newest_first)
}

pub fn merge_scales(prev: Option<&[ScaleRequest]>, incoming: &[ScaleRequest]) -> Vec<ScaleRequest> {
    merge_by_name(prev, incoming, |_, s| s.clone(), newest_first)
}

pub fn merge_deployments(
    prev: Option<&[ExpandedDeployment]>,
    incoming: &[ExpandedDeployment],
) -> Vec<ExpandedDeployment> {
    merge_by_name(prev, incoming, |_, d| d.clone(), newest_first)
}

pub fn merge_history(
    prev: Option<&[ReleaseHistoryItem]>,
    incoming: &[ReleaseHistoryItem],
) -> Vec<ReleaseHistoryItem> {
    merge_by_name(prev, incoming, |_, item| item.clone(), newest_first)
}

/// A stream response that can absorb the next response of the same stream
pub trait MergeResponse: Sized {
    fn merge(prev: Option<&Self>, next: Self) -> Self;

    /// Number of records held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MergeResponse for StreamAppsResponse {
    fn merge(prev: Option<&Self>, next: Self) -> Self {
        Self {
            apps: merge_apps(prev.map(|p| p.apps.as_slice()), &next.apps),
            next_page_token: next.next_page_token,
        }
    }

    fn len(&self) -> usize {
        self.apps.len()
    }
}

impl MergeResponse for StreamReleasesResponse {
    fn merge(prev: Option<&Self>, next: Self) -> Self {
        Self {
            releases: merge_releases(prev.map(|p| p.releases.as_slice()), &next.releases),
            next_page_token: next.next_page_token,
        }
    }

    fn len(&self) -> usize {
        self.releases.len()
    }
}

impl MergeResponse for StreamScalesResponse {
    fn merge(prev: Option<&Self>, next: Self) -> Self {
        Self {
            scale_requests: merge_scales(
                prev.map(|p| p.scale_requests.as_slice()),
                &next.scale_requests,
            ),
            next_page_token: next.next_page_token,
        }
    }

    fn len(&self) -> usize {
        self.scale_requests.len()
    }
}

impl MergeResponse for StreamDeploymentsResponse {
    fn merge(prev: Option<&Self>, next: Self) -> Self {
        Self {
            deployments: merge_deployments(prev.map(|p| p.deployments.as_slice()), &next.deployments),
            next_page_token: next.next_page_token,
        }
    }

    fn len(&self) -> usize {
        self.deployments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn release(name: &str, secs: i64) -> Release {
        Release {
            name: name.into(),
            create_time: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            ..Default::default()
        }
    }

    fn app(name: &str, display: &str) -> App {
        App {
            name: name.into(),
            display_name: display.into(),
            ..Default::default()
        }
    }

    fn names<T: Record>(items: &[T]) -> Vec<&str> {
        items.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_empty_batch_is_identity() {
        let snapshot = merge_releases(None, &[release("r1", 30), release("r2", 20), release("r3", 10)]);
        let merged = merge_releases(Some(&snapshot), &[]);
        assert_eq!(merged, snapshot);
    }

    #[test]
    fn test_replace_not_duplicate() {
        let snapshot = vec![release("r1", 30), release("r2", 20), release("r3", 10)];
        let mut updated = release("r2", 20);
        updated.labels.insert("k".into(), "v".into());

        let merged = merge_releases(Some(&snapshot), &[updated.clone()]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1], updated);
        // previous snapshot untouched
        assert!(snapshot[1].labels.is_empty());
    }

    #[test]
    fn test_new_records_sorted_newest_first() {
        let snapshot = vec![release("r1", 30), release("r2", 10)];
        let merged = merge_releases(Some(&snapshot), &[release("r3", 20), release("r4", 40)]);
        assert_eq!(names(&merged), vec!["r4", "r1", "r3", "r2"]);
    }

    #[test]
    fn test_missing_timestamp_sorts_last() {
        let undated = Release {
            name: "r0".into(),
            ..Default::default()
        };
        let merged = merge_releases(None, &[undated, release("r1", 1)]);
        assert_eq!(names(&merged), vec!["r1", "r0"]);
    }

    #[test]
    fn test_equal_keys_keep_relative_order() {
        let batch = vec![release("a", 5), release("b", 5), release("c", 5)];
        let first = merge_releases(None, &batch);
        assert_eq!(names(&first), vec!["a", "b", "c"]);

        let second = merge_releases(Some(&first), &[release("b", 5), release("d", 5)]);
        assert_eq!(names(&second), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_apps_sorted_by_display_name() {
        let merged = merge_apps(None, &[app("apps/1", "zeta"), app("apps/2", "Alpha"), app("apps/3", "beta")]);
        assert_eq!(names(&merged), vec!["apps/2", "apps/3", "apps/1"]);
    }

    #[test]
    fn test_deleted_app_is_relabelled() {
        let snapshot = merge_apps(None, &[app("apps/1", "api"), app("apps/2", "web")]);
        let mut deleted = app("apps/1", "api");
        deleted.delete_time = Some(Utc.timestamp_opt(100, 0).unwrap());

        let merged = merge_apps(Some(&snapshot), &[deleted]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].display_name, "api [DELETED]");
        assert!(merged[0].is_deleted());
    }

    #[test]
    fn test_unknown_deleted_app_is_appended_as_is() {
        let mut deleted = app("apps/9", "gone");
        deleted.delete_time = Some(Utc.timestamp_opt(100, 0).unwrap());
        let merged = merge_apps(None, &[deleted]);
        assert_eq!(merged[0].display_name, "gone");
    }

    #[test]
    fn test_response_merge_keeps_latest_token() {
        let first = StreamReleasesResponse {
            releases: vec![release("r1", 1)],
            next_page_token: "p1".into(),
        };
        let second = StreamReleasesResponse {
            releases: vec![release("r2", 2)],
            next_page_token: "p2".into(),
        };
        let merged = StreamReleasesResponse::merge(Some(&first), second);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.next_page_token, "p2");
        assert_eq!(first.releases.len(), 1);
    }

    #[test]
    fn test_history_mixes_kinds() {
        let scale = ReleaseHistoryItem::Scale(ScaleRequest {
            name: "apps/a/releases/r/scales/s1".into(),
            create_time: Some(Utc.timestamp_opt(20, 0).unwrap()),
            ..Default::default()
        });
        let deployment = ReleaseHistoryItem::Deployment(ExpandedDeployment {
            name: "apps/a/deployments/d1".into(),
            create_time: Some(Utc.timestamp_opt(30, 0).unwrap()),
            ..Default::default()
        });
        let merged = merge_history(None, &[scale, deployment]);
        assert!(merged[0].is_deployment());
        assert!(merged[1].is_scale_request());
    }
}
