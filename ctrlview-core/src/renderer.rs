//! Windowed list rendering
//!
//! `ListRenderer` connects a `WindowState` to a concrete layout host: it
//! discovers the scrolling ancestor of the list, turns scroll/resize/mutation
//! notifications into window updates, decides which items are live, and
//! feeds measured item heights back into the window.
//!
//! The host is whatever owns real layout (a DOM, a terminal grid, a test
//! double). Measurements are taken on the next frame after a mount, never
//! synchronously inside `on_item_mounted`, because layout read immediately
//! after a state change can be stale.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::height::quantize;
use crate::schedule::Debounce;
use crate::subscription::{Subscription, SubscriptionSet};
use crate::window::{WindowSnapshot, WindowState};

/// Vertical overflow behaviour of a layout node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Auto,
    Scroll,
}

impl Overflow {
    pub fn scrolls(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemDimensions {
    /// Offset of the item's top edge relative to the host's coordinate origin
    pub top: f64,
    /// Rendered height including vertical margins
    pub height: f64,
}

/// Where scroll offsets are read from
#[derive(Clone, Debug, PartialEq)]
pub enum ScrollTarget<N> {
    Element(N),
    /// The global viewport (no scrolling ancestor found)
    Viewport,
}

/// Notifications a host forwards to the renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListEvent {
    Scroll,
    Resize,
    Mutation,
}

/// The rendering collaborator that owns real layout.
pub trait LayoutHost {
    type Node: Clone + PartialEq;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    fn overflow_y(&self, node: &Self::Node) -> Overflow;

    /// `None` while the node has not been laid out yet
    fn measure(&self, node: &Self::Node) -> Option<ItemDimensions>;

    fn scroll_top(&self, target: &ScrollTarget<Self::Node>) -> f64;

    /// Height of the visible region of `target`
    fn client_height(&self, target: &ScrollTarget<Self::Node>) -> f64;

    /// Start delivering scroll, resize and mutation events for `target`.
    /// The returned subscription stops delivery when disposed.
    fn listen(&self, target: &ScrollTarget<Self::Node>) -> Subscription;
}

/// Nearest ancestor (starting at `node` itself) whose vertical overflow
/// scrolls, or the viewport.
pub fn find_scroll_parent<H: LayoutHost>(
    host: &H,
    node: Option<H::Node>,
) -> ScrollTarget<H::Node> {
    let mut current = node;
    while let Some(n) = current {
        if host.overflow_y(&n).scrolls() {
            return ScrollTarget::Element(n);
        }
        current = host.parent(&n);
    }
    ScrollTarget::Viewport
}

#[derive(Clone, Debug)]
pub struct RendererOptions {
    /// Height estimate for items never measured
    pub default_height: f64,
    /// Extra distance above and below the viewport whose items stay live
    pub overscan: f64,
    /// Quiet period that ends a burst of scroll events
    pub scroll_debounce: Duration,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            default_height: 100.0,
            overscan: 0.0,
            scroll_debounce: Duration::from_millis(16),
        }
    }
}

/// How one item should be rendered this frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemSlot {
    Live,
    /// Unmounted stand-in of the given height (zero if never measured)
    Placeholder(f64),
}

/// Live range plus the padding standing in for everything outside it
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPlan {
    pub padding_top: f64,
    pub live: Range<usize>,
    pub padding_bottom: f64,
}

pub struct ListRenderer<H: LayoutHost> {
    host: H,
    state: WindowState,
    overscan: f64,
    nodes: BTreeMap<usize, H::Node>,
    dimensions: BTreeMap<usize, ItemDimensions>,
    pending_measure: BTreeSet<usize>,
    scroll_target: Option<ScrollTarget<H::Node>>,
    scroll_debounce: Debounce,
    relayout_pending: bool,
    listeners: SubscriptionSet,
}

impl<H: LayoutHost> ListRenderer<H> {
    pub fn new(host: H, options: RendererOptions) -> Self {
        let mut state = WindowState::new();
        state.set_default_height(options.default_height);
        Self {
            host,
            state,
            overscan: options.overscan.max(0.0),
            nodes: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            pending_measure: BTreeSet::new(),
            scroll_target: None,
            scroll_debounce: Debounce::leading(options.scroll_debounce),
            relayout_pending: false,
            listeners: SubscriptionSet::new(),
        }
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scroll_target(&self) -> Option<&ScrollTarget<H::Node>> {
        self.scroll_target.as_ref()
    }

    pub fn set_length(&mut self, length: usize) {
        if length == self.state.length() {
            return;
        }
        self.nodes.retain(|&index, _| index < length);
        self.pending_measure.retain(|&index| index < length);
        self.dimensions.retain(|&index, _| index < length);
        self.state.set_length(length);
    }

    /// An item was mounted at `node`. Its measurement is taken on the next
    /// frame. The first mount also discovers the scrolling ancestor and
    /// subscribes to it.
    pub fn on_item_mounted(&mut self, index: usize, node: H::Node) {
        if self.scroll_target.is_none() {
            let target = find_scroll_parent(&self.host, self.host.parent(&node));
            tracing::debug!(index, viewport = matches!(target, ScrollTarget::Viewport), "scroll parent resolved");
            self.listeners.push(self.host.listen(&target));
            let viewport_height = self.host.client_height(&target);
            let scroll_top = self.host.scroll_top(&target);
            self.scroll_target = Some(target);
            self.state.set_viewport_height(viewport_height);
            self.state.update_scroll_position(scroll_top);
        }
        self.nodes.insert(index, node);
        self.pending_measure.insert(index);
    }

    pub fn on_item_unmounted(&mut self, index: usize) {
        self.nodes.remove(&index);
        self.pending_measure.remove(&index);
    }

    /// Forward a host notification. Returns true when the window changed
    /// right away (leading edge of a scroll burst).
    pub fn handle_event(&mut self, event: ListEvent, now: Instant) -> bool {
        match event {
            ListEvent::Scroll => {
                if self.scroll_debounce.signal(now) {
                    return self.apply_scroll();
                }
                false
            }
            ListEvent::Resize | ListEvent::Mutation => {
                self.relayout_pending = true;
                false
            }
        }
    }

    /// Earliest instant at which `on_frame` has deferred work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scroll_debounce.deadline()
    }

    /// Run deferred work for a frame: trailing scroll updates, relayout, and
    /// pending measurements. Returns true if the window moved.
    pub fn on_frame(&mut self, now: Instant) -> bool {
        let before = self.state.snapshot();

        if self.scroll_debounce.poll(now) {
            self.apply_scroll();
        }
        if self.relayout_pending {
            self.relayout_pending = false;
            // relayout re-reads the scroll offset, which settles a pending trailing scroll
            self.scroll_debounce.flush();
            self.relayout();
        }
        self.measure_pending();

        self.state.snapshot() != before
    }

    /// Whether `index` should be mounted: inside the window, widened by the
    /// overscan distance.
    pub fn should_item_render(&self, index: usize) -> bool {
        self.live_range().contains(&index)
    }

    /// Last dimensions measured for `index`
    pub fn item_dimensions(&self, index: usize) -> Option<ItemDimensions> {
        self.dimensions.get(&index).copied()
    }

    pub fn slot(&self, index: usize) -> ItemSlot {
        if self.should_item_render(index) {
            ItemSlot::Live
        } else {
            ItemSlot::Placeholder(self.state.heights().measured(index).unwrap_or(0.0))
        }
    }

    pub fn live_range(&self) -> Range<usize> {
        let window = self.state.visible_range();
        let length = self.state.length();

        let mut start = window.start.min(length);
        let mut above = 0.0;
        while start > 0 && above < self.overscan {
            start -= 1;
            above += self.state.item_height(start);
        }

        let mut end = window.end;
        let mut below = 0.0;
        while end < length && below < self.overscan {
            below += self.state.item_height(end);
            end += 1;
        }
        start..end
    }

    pub fn render_plan(&self) -> RenderPlan {
        let live = self.live_range();
        RenderPlan {
            padding_top: self.state.offset_of(live.start),
            padding_bottom: self.state.heights().sum(live.end, self.state.length()),
            live,
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.state.snapshot()
    }

    /// Release host listeners and mounted node references
    pub fn dispose(&mut self) {
        self.listeners.dispose_all();
        self.nodes.clear();
        self.pending_measure.clear();
        self.scroll_target = None;
    }

    fn apply_scroll(&mut self) -> bool {
        let Some(target) = &self.scroll_target else {
            return false;
        };
        let before = self.state.snapshot();
        let scroll_top = self.host.scroll_top(target);
        self.state.update_scroll_position(scroll_top);
        self.state.snapshot() != before
    }

    fn relayout(&mut self) {
        if let Some(target) = &self.scroll_target {
            let viewport_height = self.host.client_height(target);
            let scroll_top = self.host.scroll_top(target);
            self.state.set_viewport_height(viewport_height);
            self.state.update_scroll_position(scroll_top);
        }
        self.pending_measure.extend(self.nodes.keys().copied());
    }

    fn measure_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_measure);
        for index in pending {
            let Some(node) = self.nodes.get(&index) else {
                continue;
            };
            match self.host.measure(node) {
                Some(dimensions) => {
                    self.dimensions.insert(index, dimensions);
                    if self.state.heights().measured(index) != Some(quantize(dimensions.height)) {
                        self.state.update_height_at_index(index, dimensions.height);
                    }
                }
                None => {
                    // not laid out yet, retry next frame
                    self.pending_measure.insert(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LIST: u32 = 1;
    const SCROLLER: u32 = 2;

    #[derive(Default)]
    struct TestHost {
        parents: HashMap<u32, u32>,
        overflow: HashMap<u32, Overflow>,
        heights: HashMap<u32, f64>,
        scroll_top: f64,
        client_height: f64,
        listens: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl TestHost {
        /// item nodes are 100 + index, children of LIST, inside SCROLLER
        fn new(items: u32, scrolls: bool) -> Self {
            let mut host = TestHost {
                client_height: 400.0,
                ..Default::default()
            };
            host.parents.insert(LIST, SCROLLER);
            if scrolls {
                host.overflow.insert(SCROLLER, Overflow::Auto);
            }
            for i in 0..items {
                host.parents.insert(100 + i, LIST);
            }
            host
        }
    }

    impl LayoutHost for TestHost {
        type Node = u32;

        fn parent(&self, node: &u32) -> Option<u32> {
            self.parents.get(node).copied()
        }

        fn overflow_y(&self, node: &u32) -> Overflow {
            self.overflow.get(node).copied().unwrap_or_default()
        }

        fn measure(&self, node: &u32) -> Option<ItemDimensions> {
            self.heights
                .get(node)
                .map(|&height| ItemDimensions { top: 0.0, height })
        }

        fn scroll_top(&self, _target: &ScrollTarget<u32>) -> f64 {
            self.scroll_top
        }

        fn client_height(&self, _target: &ScrollTarget<u32>) -> f64 {
            self.client_height
        }

        fn listen(&self, _target: &ScrollTarget<u32>) -> Subscription {
            self.listens.fetch_add(1, Ordering::SeqCst);
            let releases = self.releases.clone();
            Subscription::new(move || {
                releases.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn renderer(scrolls: bool) -> ListRenderer<TestHost> {
        let mut renderer = ListRenderer::new(
            TestHost::new(1000, scrolls),
            RendererOptions {
                default_height: 100.0,
                ..Default::default()
            },
        );
        renderer.set_length(1000);
        renderer
    }

    #[test]
    fn test_find_scroll_parent() {
        let host = TestHost::new(3, true);
        assert_eq!(
            find_scroll_parent(&host, Some(LIST)),
            ScrollTarget::Element(SCROLLER)
        );

        let host = TestHost::new(3, false);
        assert_eq!(find_scroll_parent(&host, Some(LIST)), ScrollTarget::Viewport);
        assert_eq!(find_scroll_parent(&host, None), ScrollTarget::Viewport);
    }

    #[test]
    fn test_first_mount_subscribes_once() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        r.on_item_mounted(1, 101);

        assert_eq!(r.scroll_target(), Some(&ScrollTarget::Element(SCROLLER)));
        assert_eq!(r.host().listens.load(Ordering::SeqCst), 1);
        assert_eq!(r.state().viewport_height(), 400.0);
        assert_eq!(r.state().visible_length(), 4);
    }

    #[test]
    fn test_measurement_is_deferred_to_frame() {
        let mut r = renderer(true);
        r.host_mut().heights.insert(101, 250.0);
        r.on_item_mounted(1, 101);
        assert_eq!(r.item_dimensions(1), None);

        let changed = r.on_frame(Instant::now());
        assert!(changed);
        assert_eq!(r.item_dimensions(1).map(|d| d.height), Some(250.0));
        assert_eq!(r.state().visible_length(), 3);
    }

    #[test]
    fn test_unmeasurable_node_is_retried() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        r.on_frame(Instant::now());
        assert_eq!(r.item_dimensions(0), None);

        r.host_mut().heights.insert(100, 60.0);
        r.on_frame(Instant::now());
        assert_eq!(r.item_dimensions(0).map(|d| d.height), Some(60.0));
    }

    #[test]
    fn test_scroll_burst_collapses() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        let start = Instant::now();

        r.host_mut().scroll_top = 120.0;
        assert!(r.handle_event(ListEvent::Scroll, start));
        assert_eq!(r.state().visible_index_top(), 1);

        r.host_mut().scroll_top = 250.0;
        assert!(!r.handle_event(ListEvent::Scroll, start + Duration::from_millis(1)));
        r.host_mut().scroll_top = 530.0;
        assert!(!r.handle_event(ListEvent::Scroll, start + Duration::from_millis(2)));
        assert_eq!(r.state().visible_index_top(), 1);

        let deadline = r.next_deadline().unwrap();
        assert!(r.on_frame(deadline));
        assert_eq!(r.state().visible_index_top(), 5);
        assert_eq!(r.state().padding_top(), 500.0);
    }

    #[test]
    fn test_relayout_settles_pending_scroll() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        let start = Instant::now();

        r.host_mut().scroll_top = 120.0;
        r.handle_event(ListEvent::Scroll, start);
        r.host_mut().scroll_top = 530.0;
        r.handle_event(ListEvent::Scroll, start + Duration::from_millis(1));
        assert!(r.next_deadline().is_some());

        r.handle_event(ListEvent::Mutation, start + Duration::from_millis(2));
        r.on_frame(start + Duration::from_millis(2));
        assert_eq!(r.next_deadline(), None);
        assert_eq!(r.state().visible_index_top(), 5);
    }

    #[test]
    fn test_resize_rereads_viewport_and_remeasures() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        r.host_mut().heights.insert(100, 100.0);
        r.on_frame(Instant::now());

        r.host_mut().client_height = 200.0;
        r.host_mut().heights.insert(100, 150.0);
        r.handle_event(ListEvent::Resize, Instant::now());
        r.on_frame(Instant::now());

        assert_eq!(r.state().viewport_height(), 200.0);
        assert_eq!(r.item_dimensions(0).map(|d| d.height), Some(150.0));
        assert_eq!(r.state().visible_length(), 2);
    }

    #[test]
    fn test_should_render_and_overscan() {
        let mut r = ListRenderer::new(
            TestHost::new(1000, true),
            RendererOptions {
                default_height: 100.0,
                overscan: 150.0,
                ..Default::default()
            },
        );
        r.set_length(1000);
        r.on_item_mounted(0, 100);
        r.host_mut().scroll_top = 520.0;
        r.handle_event(ListEvent::Scroll, Instant::now());

        assert_eq!(r.state().visible_range(), 5..9);
        assert_eq!(r.live_range(), 3..11);
        assert!(r.should_item_render(3));
        assert!(!r.should_item_render(2));
        assert!(r.should_item_render(10));
        assert!(!r.should_item_render(11));

        let plan = r.render_plan();
        assert_eq!(plan.padding_top, 300.0);
        assert_eq!(plan.padding_bottom, 98_900.0);
    }

    #[test]
    fn test_placeholders_use_measured_height() {
        let mut r = renderer(true);
        r.host_mut().heights.insert(100, 80.0);
        r.on_item_mounted(0, 100);
        r.on_frame(Instant::now());

        r.host_mut().scroll_top = 2_000.0;
        r.handle_event(ListEvent::Scroll, Instant::now());

        assert_eq!(r.slot(0), ItemSlot::Placeholder(80.0));
        assert_eq!(r.slot(1), ItemSlot::Placeholder(0.0));
        assert_eq!(r.slot(r.state().visible_index_top()), ItemSlot::Live);
    }

    #[test]
    fn test_dispose_releases_listeners() {
        let mut r = renderer(true);
        r.on_item_mounted(0, 100);
        r.dispose();
        r.dispose();
        assert_eq!(r.host().releases.load(Ordering::SeqCst), 1);
        assert_eq!(r.scroll_target(), None);
    }
}
