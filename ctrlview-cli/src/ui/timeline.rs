//! Release history timeline
//!
//! The terminal plays the layout host for the windowed list engine: every
//! history item is a block of text lines, its height is its line count, and
//! the body pane is the scrolling ancestor. Only the blocks inside the live
//! range are built each frame.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use ratatui::{
    Frame,
    layout::{Constraint, Layout},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use ctrlview_core::history::{HistoryRow, history_rows, item_date};
use ctrlview_core::model::{ReleaseHistoryItem, Timestamp, short_name};
use ctrlview_core::renderer::{
    ItemDimensions, LayoutHost, ListEvent, ListRenderer, Overflow, RendererOptions, ScrollTarget,
};
use ctrlview_core::subscription::Subscription;
use ctrlview_core::window::WindowSnapshot;

use super::styles;

/// Layout passes per frame before giving up on a stable window
const MAX_LAYOUT_PASSES: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineNode {
    /// The bordered body pane
    Scroller,
    List,
    Item(usize),
}

/// Line-based layout of the timeline pane
#[derive(Debug, Default)]
pub struct TerminalHost {
    scroll_top: f64,
    viewport_height: f64,
    laid_out: BTreeMap<usize, ItemDimensions>,
    listening: Arc<AtomicBool>,
}

impl TerminalHost {
    pub fn offset(&self) -> f64 {
        self.scroll_top
    }

    pub fn viewport_rows(&self) -> usize {
        self.viewport_height as usize
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Move the scroll offset, clamped to the scrollable range. Returns true
    /// when it moved.
    pub fn scroll_to(&mut self, offset: f64, content_height: f64) -> bool {
        let max = (content_height - self.viewport_height).max(0.0).floor();
        let next = if offset.is_finite() { offset.floor().clamp(0.0, max) } else { 0.0 };
        if next == self.scroll_top {
            return false;
        }
        self.scroll_top = next;
        true
    }

    fn set_viewport_rows(&mut self, rows: u16) -> bool {
        let rows = f64::from(rows);
        if rows == self.viewport_height {
            return false;
        }
        self.viewport_height = rows;
        true
    }

    /// Replace the laid out blocks. Returns true if an item that was already
    /// laid out changed height.
    fn lay_out(&mut self, layout: BTreeMap<usize, ItemDimensions>) -> bool {
        let changed = layout.iter().any(|(index, dims)| {
            self.laid_out
                .get(index)
                .is_some_and(|old| old.height != dims.height)
        });
        self.laid_out = layout;
        changed
    }
}

impl LayoutHost for TerminalHost {
    type Node = TimelineNode;

    fn parent(&self, node: &TimelineNode) -> Option<TimelineNode> {
        match node {
            TimelineNode::Scroller => None,
            TimelineNode::List => Some(TimelineNode::Scroller),
            TimelineNode::Item(_) => Some(TimelineNode::List),
        }
    }

    fn overflow_y(&self, node: &TimelineNode) -> Overflow {
        match node {
            TimelineNode::Scroller => Overflow::Auto,
            _ => Overflow::Visible,
        }
    }

    fn measure(&self, node: &TimelineNode) -> Option<ItemDimensions> {
        match node {
            TimelineNode::Item(index) => self.laid_out.get(index).copied(),
            _ => None,
        }
    }

    fn scroll_top(&self, _target: &ScrollTarget<TimelineNode>) -> f64 {
        self.scroll_top
    }

    fn client_height(&self, _target: &ScrollTarget<TimelineNode>) -> f64 {
        self.viewport_height
    }

    fn listen(&self, _target: &ScrollTarget<TimelineNode>) -> Subscription {
        // key events are forwarded by the run loop while this is set
        self.listening.store(true, Ordering::SeqCst);
        let listening = self.listening.clone();
        Subscription::new(move || listening.store(false, Ordering::SeqCst))
    }
}

/// Lines of one history item, including a day header above it
#[derive(Debug, Clone)]
struct ItemBlock {
    index: usize,
    lines: Vec<Line<'static>>,
}

/// Windowed view over a release history
pub struct TimelineView {
    renderer: ListRenderer<TerminalHost>,
    mounted: BTreeSet<usize>,
    blocks: Vec<ItemBlock>,
    blocks_top: f64,
}

impl TimelineView {
    pub fn new(options: RendererOptions) -> Self {
        Self {
            renderer: ListRenderer::new(TerminalHost::default(), options),
            mounted: BTreeSet::new(),
            blocks: Vec::new(),
            blocks_top: 0.0,
        }
    }

    pub fn host(&self) -> &TerminalHost {
        self.renderer.host()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.renderer.snapshot()
    }

    pub fn content_height(&self) -> f64 {
        self.renderer.state().content_height()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.renderer.next_deadline()
    }

    /// Bring the window up to date with `items` and a body of `rows` lines
    pub fn sync(&mut self, items: &[ReleaseHistoryItem], rows: u16, now: Instant) {
        if self.renderer.state().length() != items.len() {
            self.renderer.set_length(items.len());
            self.renderer.handle_event(ListEvent::Mutation, now);
        }
        if self.renderer.host_mut().set_viewport_rows(rows) {
            self.renderer.handle_event(ListEvent::Resize, now);
        }
        // the first mount resolves the scroll parent and the viewport size
        if self.renderer.scroll_target().is_none() && !items.is_empty() {
            self.renderer.on_item_mounted(0, TimelineNode::Item(0));
            self.mounted.insert(0);
        }

        for _ in 0..MAX_LAYOUT_PASSES {
            self.lay_out(items, now);
            if !self.renderer.on_frame(now) {
                return;
            }
        }
        self.lay_out(items, now);
    }

    pub fn scroll_by(&mut self, delta: f64, now: Instant) {
        self.scroll_to(self.host().offset() + delta, now);
    }

    pub fn scroll_to(&mut self, offset: f64, now: Instant) {
        let content_height = self.content_height();
        if self.renderer.host_mut().scroll_to(offset, content_height) {
            self.renderer.handle_event(ListEvent::Scroll, now);
        }
    }

    pub fn scroll_to_end(&mut self, now: Instant) {
        self.scroll_to(f64::MAX, now);
    }

    /// Rows moved by a page key
    pub fn page(&self) -> f64 {
        (self.host().viewport_rows().max(2) - 1) as f64
    }

    /// Lines currently inside the viewport
    pub fn visible_lines(&self) -> Vec<Line<'static>> {
        let skip = (self.host().offset() - self.blocks_top).max(0.0) as usize;
        self.blocks
            .iter()
            .flat_map(|b| b.lines.iter())
            .skip(skip)
            .take(self.host().viewport_rows())
            .cloned()
            .collect()
    }

    pub fn dispose(&mut self) {
        self.renderer.dispose();
        self.mounted.clear();
        self.blocks.clear();
    }

    fn lay_out(&mut self, items: &[ReleaseHistoryItem], now: Instant) {
        let live = self.renderer.live_range();
        let blocks = item_blocks(items, live.clone());

        self.blocks_top = self.renderer.state().offset_of(live.start);
        let mut top = self.blocks_top;
        let mut layout = BTreeMap::new();
        for block in &blocks {
            let height = block.lines.len() as f64;
            layout.insert(block.index, ItemDimensions { top, height });
            top += height;
        }
        if self.renderer.host_mut().lay_out(layout) {
            self.renderer.handle_event(ListEvent::Mutation, now);
        }

        let stale: Vec<usize> = self
            .mounted
            .iter()
            .copied()
            .filter(|index| !live.contains(index))
            .collect();
        for index in stale {
            self.mounted.remove(&index);
            self.renderer.on_item_unmounted(index);
        }
        for index in live {
            if self.mounted.insert(index) {
                self.renderer.on_item_mounted(index, TimelineNode::Item(index));
            }
        }

        self.blocks = blocks;
    }
}

impl Drop for TimelineView {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Blocks for `items[live]`. A day header belongs to the item below it, and
/// the window's leading header is dropped unless the full list has one there,
/// so an item's height does not depend on where the window starts.
fn item_blocks(items: &[ReleaseHistoryItem], live: Range<usize>) -> Vec<ItemBlock> {
    let start = live.start;
    let leading_header = start == 0
        || items
            .get(start)
            .zip(start.checked_sub(1).and_then(|p| items.get(p)))
            .is_some_and(|(item, above)| item_date(item) < item_date(above));

    let mut blocks = Vec::new();
    let mut pending = Vec::new();
    for (n, row) in history_rows(items, start, live.len()).iter().enumerate() {
        match row.index() {
            None => {
                if n == 0 && !leading_header {
                    continue;
                }
                if let HistoryRow::DateHeader(date) = row {
                    pending.push(date_line(*date));
                }
            }
            Some(index) => {
                let mut lines = std::mem::take(&mut pending);
                lines.extend(row_lines(row));
                blocks.push(ItemBlock { index, lines });
            }
        }
    }
    blocks
}

fn date_line(date: NaiveDate) -> Line<'static> {
    Line::from(Span::styled(
        format!("── {} ", date.format("%a %b %d %Y")),
        styles::date_header(),
    ))
}

fn row_lines(row: &HistoryRow<'_>) -> Vec<Line<'static>> {
    match row {
        HistoryRow::DateHeader(date) => vec![date_line(*date)],
        HistoryRow::Scale { short_name, scale, .. } => vec![Line::from(vec![
            Span::styled(format!(" {} ", styles::scale_icon(scale.state)), styles::scale(scale.state)),
            Span::styled(format!("{} ", time_of(scale.create_time)), styles::text_muted()),
            Span::styled(format!("scale {:<12}", short_name), styles::text()),
            Span::styled(format!("{:<10}", scale.state.as_str()), styles::scale(scale.state)),
            Span::styled(process_changes(&scale.old_processes, &scale.new_processes), styles::text_dim()),
        ])],
        HistoryRow::Release {
            new_release,
            old_release,
            deployment,
            ..
        } => {
            let status = deployment.status;
            let new_name = new_release.map(|r| short_name(&r.name)).unwrap_or("-");
            let from = match old_release {
                Some(old) => format!("from {}", short_name(&old.name)),
                None => "initial release".to_string(),
            };
            vec![
                Line::from(vec![
                    Span::styled(format!(" {} ", styles::deployment_icon(status)), styles::deployment(status)),
                    Span::styled(format!("{} ", time_of(deployment.create_time)), styles::text_muted()),
                    Span::styled(format!("release {:<10}", new_name), styles::text()),
                    Span::styled(format!("{:<10}", status.as_str()), styles::deployment(status)),
                    Span::styled(deployment.release_type.as_str(), styles::text_dim()),
                ]),
                Line::from(Span::styled(format!("         {}", from), styles::text_dim())),
            ]
        }
    }
}

fn time_of(time: Option<Timestamp>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// `web 1→3 worker 0→2`, or `no change`
fn process_changes(old: &BTreeMap<String, i32>, new: &BTreeMap<String, i32>) -> String {
    let types: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let changes: Vec<String> = types
        .into_iter()
        .filter_map(|t| {
            let before = old.get(t).copied().unwrap_or(0);
            let after = new.get(t).copied().unwrap_or(0);
            (before != after).then(|| format!("{} {}→{}", t, before, after))
        })
        .collect();
    if changes.is_empty() {
        "no change".to_string()
    } else {
        changes.join(" ")
    }
}

/// Header line data gathered by the run loop
pub struct StatusInfo<'a> {
    pub app: &'a str,
    pub open_streams: usize,
    pub loading: bool,
    pub error: Option<String>,
}

pub fn render(
    frame: &mut Frame,
    view: &mut TimelineView,
    items: &[ReleaseHistoryItem],
    status: &StatusInfo<'_>,
    now: Instant,
) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border())
        .title(Span::styled(format!(" {} ", status.app), styles::title()));
    let inner = block.inner(body);
    view.sync(items, inner.height, now);

    let mut spans = vec![
        Span::styled(" ctrlview ", styles::title()),
        Span::styled(format!(" {} items ", items.len()), styles::text_dim()),
        Span::styled(format!(" {} streams ", status.open_streams), styles::text_muted()),
    ];
    if status.loading {
        spans.push(Span::styled(" loading… ", styles::text_muted()));
    }
    if let Some(error) = &status.error {
        spans.push(Span::styled(format!(" {} ", error), styles::error()));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), header);

    frame.render_widget(Paragraph::new(view.visible_lines()).block(block), body);

    let snapshot = view.snapshot();
    let footer_line = Line::from(vec![
        Span::styled(" j/k", styles::key_hint()),
        Span::styled(" scroll ", styles::text_dim()),
        Span::styled(" PgUp/PgDn", styles::key_hint()),
        Span::styled(" page ", styles::text_dim()),
        Span::styled(" g/G", styles::key_hint()),
        Span::styled(" top/end ", styles::text_dim()),
        Span::styled(" q", styles::key_hint()),
        Span::styled(" quit ", styles::text_dim()),
        Span::styled(
            format!(
                "  items {}+{}  pad {}/{}",
                snapshot.visible_index_top,
                snapshot.visible_length,
                snapshot.padding_top,
                snapshot.padding_bottom
            ),
            styles::text_muted(),
        ),
    ]);
    frame.render_widget(Paragraph::new(footer_line), footer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ctrlview_core::model::{ScaleRequest, ScaleRequestState};
    use ctrlview_core::renderer::find_scroll_parent;
    use std::time::Duration;

    fn scale(n: usize, day: u32, hour: u32) -> ReleaseHistoryItem {
        ReleaseHistoryItem::Scale(ScaleRequest {
            name: format!("apps/a/scales/s{}", n),
            state: ScaleRequestState::Complete,
            create_time: Some(Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()),
            ..Default::default()
        })
    }

    fn same_day(count: usize) -> Vec<ReleaseHistoryItem> {
        (0..count).map(|n| scale(n, 10, 20 - n as u32)).collect()
    }

    fn options() -> RendererOptions {
        RendererOptions {
            default_height: 2.0,
            overscan: 0.0,
            scroll_debounce: Duration::from_millis(16),
        }
    }

    fn text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_scroll_parent_is_body_pane() {
        let host = TerminalHost::default();
        assert_eq!(
            find_scroll_parent(&host, host.parent(&TimelineNode::Item(4))),
            ScrollTarget::Element(TimelineNode::Scroller)
        );
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut host = TerminalHost::default();
        host.set_viewport_rows(10);
        assert!(host.scroll_to(7.6, 30.0));
        assert_eq!(host.offset(), 7.0);
        assert!(host.scroll_to(100.0, 30.0));
        assert_eq!(host.offset(), 20.0);
        assert!(host.scroll_to(-5.0, 30.0));
        assert_eq!(host.offset(), 0.0);
        assert!(!host.scroll_to(3.0, 5.0));
    }

    #[test]
    fn test_listen_flag_follows_subscription() {
        let host = TerminalHost::default();
        let mut sub = host.listen(&ScrollTarget::Viewport);
        assert!(host.is_listening());
        sub.dispose();
        assert!(!host.is_listening());
    }

    #[test]
    fn test_header_attaches_to_next_item() {
        let items = vec![scale(0, 11, 9), scale(1, 11, 8), scale(2, 10, 23)];
        let blocks = item_blocks(&items, 0..3);
        let heights: Vec<usize> = blocks.iter().map(|b| b.lines.len()).collect();
        assert_eq!(heights, vec![2, 1, 2]);
        assert!(text(&blocks[0].lines[0]).contains("Mon Mar 11 2024"));
        assert!(text(&blocks[2].lines[0]).contains("Sun Mar 10 2024"));
    }

    #[test]
    fn test_leading_header_only_at_day_boundary() {
        let items = vec![scale(0, 11, 9), scale(1, 11, 8), scale(2, 10, 23)];

        // same day as the item above: no header
        let blocks = item_blocks(&items, 1..3);
        assert_eq!(blocks[0].index, 1);
        assert_eq!(blocks[0].lines.len(), 1);

        // earlier day than the item above: header kept
        let blocks = item_blocks(&items, 2..3);
        assert_eq!(blocks[0].lines.len(), 2);
    }

    #[test]
    fn test_process_changes() {
        let old = BTreeMap::from([("web".to_string(), 1), ("worker".to_string(), 2)]);
        let new = BTreeMap::from([("web".to_string(), 3), ("worker".to_string(), 2)]);
        assert_eq!(process_changes(&old, &new), "web 1→3");
        assert_eq!(process_changes(&new, &new), "no change");
        assert_eq!(process_changes(&BTreeMap::new(), &old), "web 0→1 worker 0→2");
    }

    #[test]
    fn test_sync_measures_line_heights() {
        let items = same_day(10);
        let mut view = TimelineView::new(options());
        let now = Instant::now();

        view.sync(&items, 5, now);

        assert!(view.host().is_listening());
        assert_eq!(view.snapshot().visible_index_top, 0);
        assert_eq!(view.snapshot().visible_length, 4);
        // header + 4 rows measured, 6 estimated at 2 lines
        assert_eq!(view.content_height(), 5.0 + 12.0);

        let lines = view.visible_lines();
        assert_eq!(lines.len(), 5);
        assert!(text(&lines[0]).starts_with("──"));
        assert!(text(&lines[1]).contains("scale s0"));
    }

    #[test]
    fn test_scroll_moves_window() {
        let items = same_day(10);
        let mut view = TimelineView::new(options());
        let now = Instant::now();
        view.sync(&items, 5, now);

        view.scroll_by(100.0, now);
        assert_eq!(view.host().offset(), view.content_height() - 5.0);
        view.sync(&items, 5, now);
        assert!(view.snapshot().visible_index_top > 0);

        let later = now + Duration::from_millis(100);
        view.scroll_to(0.0, later);
        view.sync(&items, 5, later);
        assert_eq!(view.snapshot().visible_index_top, 0);
        assert!(text(&view.visible_lines()[0]).starts_with("──"));
    }

    #[test]
    fn test_dispose_stops_listening() {
        let items = same_day(3);
        let mut view = TimelineView::new(options());
        view.sync(&items, 5, Instant::now());
        assert!(view.host().is_listening());
        view.dispose();
        assert!(!view.host().is_listening());
    }
}
