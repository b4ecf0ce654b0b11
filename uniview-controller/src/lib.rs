use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uniview_core::{
    next_zoom_step, CanvasSize, ChmEngine, DisplayMode, DisplayState, DocumentProperty, EbookDoc,
    EngineKind, NavHistory, NavPoint, PageAnnotation, PageDestination, PageEngine, Point,
    ReflowEngine, RenderedBitmap, TocItem, Zoom,
};
use url::Url;

const LAYOUT_TIMER_DELAY: Duration = Duration::from_millis(200);

/// Final result of a thumbnail request.
#[derive(Debug)]
pub enum ThumbnailOutcome {
    Rendered(RenderedBitmap),
    Failed,
}

/// Single-shot completion handle for a thumbnail request. Exactly one
/// outcome is delivered per handle: either an explicit `deliver`, or
/// `Failed` when the handle is dropped undelivered. Delivery may happen on
/// a different thread than the request.
pub struct ThumbnailReply {
    deliver: Option<Box<dyn FnOnce(ThumbnailOutcome) + Send>>,
}

impl ThumbnailReply {
    pub fn new(f: impl FnOnce(ThumbnailOutcome) + Send + 'static) -> Self {
        Self {
            deliver: Some(Box::new(f)),
        }
    }

    /// Pairs a reply handle with a receiver for hosts that poll or block.
    pub fn channel() -> (Self, mpsc::Receiver<ThumbnailOutcome>) {
        let (tx, rx) = mpsc::channel();
        let reply = Self::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (reply, rx)
    }

    pub fn deliver(mut self, outcome: ThumbnailOutcome) {
        if let Some(f) = self.deliver.take() {
            f(outcome);
        }
    }
}

impl Drop for ThumbnailReply {
    fn drop(&mut self) {
        if let Some(f) = self.deliver.take() {
            f(ThumbnailOutcome::Failed);
        }
    }
}

impl std::fmt::Debug for ThumbnailReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailReply")
            .field("delivered", &self.deliver.is_none())
            .finish()
    }
}

/// Progress report for an asynchronous reflow pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflowLayoutInfo {
    pub page_count: usize,
    pub complete: bool,
}

/// Outbound notifications from a controller to its host. Every UI side
/// effect a controller produces goes through this trait; controllers never
/// touch host windows directly. All notifications are fire-and-forget.
pub trait ControllerCallback: Send + Sync {
    fn repaint(&self);
    fn page_no_changed(&self, page_no: usize);
    fn update_scrollbars(&self, canvas: CanvasSize);
    fn request_rendering(&self, page_no: usize);
    fn clean_up(&self, model: &DisplayModel);
    fn render_thumbnail(&self, model: &DisplayModel, size: CanvasSize, reply: ThumbnailReply);
    fn goto_link(&self, dest: &PageDestination);
    fn launch_browser(&self, url: &Url);
    fn focus_frame(&self, always: bool);
    fn save_download(&self, url: &Url, data: &[u8]);
    fn layout_complete(&self, info: ReflowLayoutInfo);
    fn request_delayed_layout(&self, delay: Duration);
}

/// Uniform navigation/view/state-export contract over every document kind.
///
/// Out-of-range navigation is a silent no-op and missing optional data is
/// `None`; neither is an error. Page numbers are 1-based and
/// `valid_page_no` is the single source of truth for range checks.
pub trait Controller {
    // metadata
    fn file_path(&self) -> &Path;
    fn default_file_ext(&self) -> &str;
    fn page_count(&self) -> usize;
    fn property(&self, prop: DocumentProperty) -> Option<String>;

    // page navigation
    fn current_page_no(&self) -> usize;
    fn go_to_page(&mut self, page_no: usize, add_nav_point: bool);
    fn can_navigate(&self, dir: i32) -> bool;
    fn navigate(&mut self, dir: i32);

    // view settings
    fn set_display_mode(&mut self, mode: DisplayMode, keep_continuous: bool);
    fn display_mode(&self) -> DisplayMode;
    fn set_presentation_mode(&mut self, enable: bool);
    fn set_zoom_virtual(&mut self, zoom: Zoom, fix_pt: Option<Point>);
    fn zoom_virtual(&self) -> Zoom;
    fn next_zoom_step(&self, towards: f32) -> f32;
    fn set_view_port_size(&mut self, size: CanvasSize);

    // table of contents
    fn has_toc_tree(&self) -> bool;
    fn toc_tree(&self) -> Option<TocItem>;
    fn goto_link(&mut self, dest: &PageDestination);
    fn named_dest(&self, name: &str) -> Option<PageDestination>;

    // state export
    fn update_display_state(&self, ds: &mut DisplayState);
    fn create_thumbnail(&mut self, size: CanvasSize, reply: ThumbnailReply);

    // page labels (optional capability)
    fn has_page_labels(&self) -> bool {
        false
    }
    fn page_label(&self, page_no: usize) -> String {
        page_no.to_string()
    }
    fn page_by_label(&self, label: &str) -> Option<usize> {
        label
            .trim()
            .parse()
            .ok()
            .filter(|&page_no| self.valid_page_no(page_no))
    }

    // common shortcuts
    fn valid_page_no(&self, page_no: usize) -> bool {
        (1..=self.page_count()).contains(&page_no)
    }
    fn go_to_next_page(&mut self) -> bool {
        if self.current_page_no() == self.page_count() {
            return false;
        }
        let next = self.current_page_no() + 1;
        self.go_to_page(next, false);
        true
    }
    fn go_to_prev_page(&mut self) -> bool {
        if self.current_page_no() == 1 {
            return false;
        }
        let prev = self.current_page_no() - 1;
        self.go_to_page(prev, false);
        true
    }
    fn go_to_first_page(&mut self) -> bool {
        if self.current_page_no() == 1 {
            return false;
        }
        self.go_to_page(1, true);
        true
    }
    fn go_to_last_page(&mut self) -> bool {
        if self.current_page_no() == self.page_count() {
            return false;
        }
        self.go_to_page(self.page_count(), true);
        true
    }

    // capability queries; exactly one pair is overridden per concrete kind
    fn as_fixed(&self) -> Option<&FixedPageController> {
        None
    }
    fn as_fixed_mut(&mut self) -> Option<&mut FixedPageController> {
        None
    }
    fn as_chm(&self) -> Option<&ChmController> {
        None
    }
    fn as_chm_mut(&mut self) -> Option<&mut ChmController> {
        None
    }
    fn as_ebook(&self) -> Option<&EbookController> {
        None
    }
    fn as_ebook_mut(&mut self) -> Option<&mut EbookController> {
        None
    }
}

/// View model for paginated rendering: current page, mode, zoom, viewport,
/// scroll and jump history for one open fixed-layout document.
pub struct DisplayModel {
    engine: Arc<dyn PageEngine>,
    current_page: usize,
    display_mode: DisplayMode,
    presentation: bool,
    saved_view: Option<(DisplayMode, Zoom)>,
    zoom: Zoom,
    rotation: i32,
    viewport: CanvasSize,
    scroll: Point,
    nav: NavHistory,
}

impl DisplayModel {
    fn new(engine: Arc<dyn PageEngine>) -> Self {
        let current_page = if engine.page_count() == 0 { 0 } else { 1 };
        Self {
            engine,
            current_page,
            display_mode: DisplayMode::default(),
            presentation: false,
            saved_view: None,
            zoom: Zoom::default(),
            rotation: 0,
            viewport: CanvasSize::default(),
            scroll: Point::default(),
            nav: NavHistory::new(),
        }
    }

    pub fn engine(&self) -> &dyn PageEngine {
        self.engine.as_ref()
    }

    pub fn page_count(&self) -> usize {
        self.engine.page_count()
    }

    pub fn current_page_no(&self) -> usize {
        self.current_page
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn zoom_virtual(&self) -> Zoom {
        self.zoom
    }

    pub fn is_presentation(&self) -> bool {
        self.presentation
    }

    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn viewport(&self) -> CanvasSize {
        self.viewport
    }

    pub fn scroll(&self) -> Point {
        self.scroll
    }

    pub fn set_scroll(&mut self, pt: Point) {
        self.scroll = pt;
    }

    pub fn nav_point(&self) -> NavPoint {
        NavPoint {
            page_no: self.current_page,
            scroll: self.scroll,
        }
    }

    fn go_to(&mut self, page_no: usize) {
        self.current_page = page_no;
        self.scroll = Point::default();
    }

    fn record_position(&mut self) {
        let pt = self.nav_point();
        self.nav.record(pt);
    }

    fn can_navigate(&self, dir: i32) -> bool {
        self.nav.can_navigate(dir)
    }

    fn navigate(&mut self, dir: i32) -> Option<NavPoint> {
        let current = self.nav_point();
        self.nav.navigate(dir, current)
    }

    fn set_display_mode(&mut self, mode: DisplayMode, keep_continuous: bool) {
        let target = if keep_continuous && self.display_mode.is_continuous() {
            mode.with_continuous(true)
        } else {
            mode
        };
        self.display_mode = target;
    }

    fn set_presentation(&mut self, enable: bool) {
        if enable == self.presentation {
            return;
        }
        if enable {
            self.saved_view = Some((self.display_mode, self.zoom));
            self.zoom = Zoom::FitPage;
            self.presentation = true;
        } else {
            if let Some((mode, zoom)) = self.saved_view.take() {
                self.display_mode = mode;
                self.zoom = zoom;
            }
            self.presentation = false;
        }
    }

    /// The mode/zoom pair worth persisting; presentation mode reports the
    /// settings it will restore, not the temporary full-screen ones.
    pub fn view_for_state(&self) -> (DisplayMode, Zoom) {
        match (self.presentation, self.saved_view) {
            (true, Some(saved)) => saved,
            _ => (self.display_mode, self.zoom),
        }
    }

    /// Resolves the zoom setting to a concrete percentage against the
    /// viewport and the current page's dimensions.
    pub fn effective_zoom(&self) -> f32 {
        let (page_w, page_h) = self.engine.page_size(self.current_page.max(1));
        if page_w <= 0.0 || page_h <= 0.0 || self.viewport.is_empty() {
            return match self.zoom {
                Zoom::Percent(p) => p,
                _ => 100.0,
            };
        }
        match self.zoom {
            Zoom::Percent(p) => p,
            Zoom::ActualSize => 100.0,
            Zoom::FitWidth => self.viewport.width as f32 / page_w * 100.0,
            Zoom::FitPage => {
                let fit_w = self.viewport.width as f32 / page_w;
                let fit_h = self.viewport.height as f32 / page_h;
                fit_w.min(fit_h) * 100.0
            }
        }
    }

    fn set_zoom(&mut self, zoom: Zoom, fix_pt: Option<Point>) {
        let before = self.effective_zoom();
        self.zoom = zoom.clamped();
        let after = self.effective_zoom();
        if let Some(pt) = fix_pt {
            if before > 0.0 && (after - before).abs() > f32::EPSILON {
                // keep the anchor point stationary on screen
                let factor = after / before;
                self.scroll.x = ((self.scroll.x + pt.x) as f32 * factor) as i32 - pt.x;
                self.scroll.y = ((self.scroll.y + pt.y) as f32 * factor) as i32 - pt.y;
            }
        }
    }

    fn set_viewport(&mut self, size: CanvasSize) {
        self.viewport = size;
    }

    pub fn rotate_by(&mut self, delta: i32) {
        self.rotation = (((self.rotation + delta) % 360) + 360) % 360;
    }

    /// Size of the rendered page at the effective zoom, as reported to the
    /// host for scrollbar ranges.
    pub fn canvas_size(&self) -> CanvasSize {
        let (page_w, page_h) = self.engine.page_size(self.current_page.max(1));
        let factor = self.effective_zoom() / 100.0;
        CanvasSize::new(
            (page_w * factor).round() as i32,
            (page_h * factor).round() as i32,
        )
    }
}

/// Source-file location resolved by a `Synchronizer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub col: usize,
}

/// Forward/inverse synchronization between rendered positions and source
/// locations, for round-trip editing workflows.
pub trait Synchronizer: Send {
    fn source_of(&self, page_no: usize, pt: Point) -> Option<SourceLocation>;
    fn target_of(&self, file: &Path, line: usize) -> Option<(usize, Point)>;
}

/// Controller for fixed-layout paginated documents. Takes ownership of the
/// already-open engine; the display model, annotations and synchronizer are
/// torn down with the controller.
pub struct FixedPageController {
    model: DisplayModel,
    kind: EngineKind,
    cb: Arc<dyn ControllerCallback>,
    annotations: Vec<PageAnnotation>,
    annotations_modified: bool,
    synchronizer: Option<Box<dyn Synchronizer>>,
}

impl FixedPageController {
    pub fn create(
        engine: Arc<dyn PageEngine>,
        kind: EngineKind,
        cb: Arc<dyn ControllerCallback>,
    ) -> Self {
        Self {
            model: DisplayModel::new(engine),
            kind,
            cb,
            annotations: Vec::new(),
            annotations_modified: false,
            synchronizer: None,
        }
    }

    pub fn model(&self) -> &DisplayModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut DisplayModel {
        &mut self.model
    }

    pub fn engine(&self) -> &dyn PageEngine {
        self.model.engine()
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn annotations(&self) -> &[PageAnnotation] {
        &self.annotations
    }

    pub fn add_annotation(&mut self, annotation: PageAnnotation) {
        let page_no = annotation.page_no;
        self.annotations.push(annotation);
        self.annotations_modified = true;
        self.cb.request_rendering(page_no);
        self.cb.repaint();
    }

    pub fn clear_annotations(&mut self) {
        if self.annotations.is_empty() {
            return;
        }
        self.annotations.clear();
        self.annotations_modified = true;
        self.cb.repaint();
    }

    pub fn annotations_modified(&self) -> bool {
        self.annotations_modified
    }

    pub fn mark_annotations_saved(&mut self) {
        self.annotations_modified = false;
    }

    pub fn set_synchronizer(&mut self, sync: Option<Box<dyn Synchronizer>>) {
        self.synchronizer = sync;
    }

    pub fn synchronizer(&self) -> Option<&dyn Synchronizer> {
        self.synchronizer.as_deref()
    }

    fn page_changed(&self) {
        let page_no = self.model.current_page_no();
        self.cb.page_no_changed(page_no);
        self.cb.request_rendering(page_no);
        self.cb.repaint();
    }

    fn view_changed(&self) {
        self.cb.update_scrollbars(self.model.canvas_size());
        self.cb.repaint();
    }
}

impl Controller for FixedPageController {
    fn file_path(&self) -> &Path {
        self.engine().file_path()
    }

    fn default_file_ext(&self) -> &str {
        self.engine().default_file_ext()
    }

    fn page_count(&self) -> usize {
        self.model.page_count()
    }

    fn property(&self, prop: DocumentProperty) -> Option<String> {
        self.engine().property(prop)
    }

    fn current_page_no(&self) -> usize {
        self.model.current_page_no()
    }

    #[instrument(skip(self))]
    fn go_to_page(&mut self, page_no: usize, add_nav_point: bool) {
        if !self.valid_page_no(page_no) {
            debug!(page_no, "ignoring out-of-range page");
            return;
        }
        if add_nav_point {
            self.model.record_position();
        }
        self.model.go_to(page_no);
        self.page_changed();
    }

    fn can_navigate(&self, dir: i32) -> bool {
        self.model.can_navigate(dir)
    }

    fn navigate(&mut self, dir: i32) {
        if let Some(pt) = self.model.navigate(dir) {
            self.model.go_to(pt.page_no);
            self.model.set_scroll(pt.scroll);
            self.page_changed();
        }
    }

    fn set_display_mode(&mut self, mode: DisplayMode, keep_continuous: bool) {
        self.model.set_display_mode(mode, keep_continuous);
        self.cb.request_rendering(self.model.current_page_no());
        self.cb.repaint();
    }

    fn display_mode(&self) -> DisplayMode {
        self.model.display_mode()
    }

    fn set_presentation_mode(&mut self, enable: bool) {
        self.model.set_presentation(enable);
        self.view_changed();
    }

    fn set_zoom_virtual(&mut self, zoom: Zoom, fix_pt: Option<Point>) {
        self.model.set_zoom(zoom, fix_pt);
        self.view_changed();
    }

    fn zoom_virtual(&self) -> Zoom {
        self.model.zoom_virtual()
    }

    fn next_zoom_step(&self, towards: f32) -> f32 {
        next_zoom_step(self.model.effective_zoom(), towards)
    }

    fn set_view_port_size(&mut self, size: CanvasSize) {
        self.model.set_viewport(size);
        self.view_changed();
    }

    fn has_toc_tree(&self) -> bool {
        self.engine().toc().is_some()
    }

    fn toc_tree(&self) -> Option<TocItem> {
        self.engine().toc()
    }

    #[instrument(skip(self))]
    fn goto_link(&mut self, dest: &PageDestination) {
        match dest {
            PageDestination::Page { page_no, scroll } => {
                self.go_to_page(*page_no, true);
                if let Some(pt) = scroll {
                    self.model.set_scroll(*pt);
                }
            }
            PageDestination::Named { name } => match self.named_dest(name) {
                Some(PageDestination::Named { .. }) | None => {
                    debug!(name, "unresolved named destination");
                }
                Some(resolved) => self.goto_link(&resolved),
            },
            PageDestination::Url { url } => self.cb.launch_browser(url),
            PageDestination::File { .. } => self.cb.goto_link(dest),
        }
    }

    fn named_dest(&self, name: &str) -> Option<PageDestination> {
        self.engine().named_dest(name)
    }

    fn update_display_state(&self, ds: &mut DisplayState) {
        let (mode, zoom) = self.model.view_for_state();
        ds.file_path = Some(self.file_path().to_path_buf());
        ds.page_no = self.model.current_page_no();
        ds.display_mode = mode;
        ds.zoom = zoom;
        ds.scroll_pos = self.model.scroll();
        ds.rotation = self.model.rotation();
    }

    fn create_thumbnail(&mut self, size: CanvasSize, reply: ThumbnailReply) {
        self.cb.render_thumbnail(&self.model, size, reply);
    }

    fn has_page_labels(&self) -> bool {
        self.engine().has_page_labels()
    }

    fn page_label(&self, page_no: usize) -> String {
        self.engine()
            .page_label(page_no)
            .unwrap_or_else(|| page_no.to_string())
    }

    fn page_by_label(&self, label: &str) -> Option<usize> {
        self.engine().page_by_label(label).or_else(|| {
            label
                .trim()
                .parse()
                .ok()
                .filter(|&page_no| self.valid_page_no(page_no))
        })
    }

    fn as_fixed(&self) -> Option<&FixedPageController> {
        Some(self)
    }

    fn as_fixed_mut(&mut self) -> Option<&mut FixedPageController> {
        Some(self)
    }
}

impl Drop for FixedPageController {
    fn drop(&mut self) {
        self.cb.clean_up(&self.model);
    }
}

/// Controller for compiled-help archives rendered by an embedded-browser
/// style engine. The engine is shared with the host; this variant mostly
/// routes between it and the callback.
pub struct ChmController {
    engine: Arc<dyn ChmEngine>,
    cb: Arc<dyn ControllerCallback>,
    zoom: Zoom,
    presentation: bool,
    nav: NavHistory,
}

impl ChmController {
    pub fn create(engine: Arc<dyn ChmEngine>, cb: Arc<dyn ControllerCallback>) -> Self {
        Self {
            engine,
            cb,
            zoom: Zoom::ActualSize,
            presentation: false,
            nav: NavHistory::new(),
        }
    }

    pub fn engine(&self) -> &dyn ChmEngine {
        self.engine.as_ref()
    }

    /// Download initiated inside the embedded view; forwarded to the host
    /// for persistence.
    pub fn save_download(&self, url: &Url, data: &[u8]) {
        self.cb.save_download(url, data);
    }

    pub fn focus_frame(&self, always: bool) {
        self.cb.focus_frame(always);
    }

    pub fn is_presentation(&self) -> bool {
        self.presentation
    }

    fn effective_zoom(&self) -> f32 {
        match self.zoom {
            Zoom::Percent(p) => p,
            _ => 100.0,
        }
    }

    fn display_and_notify(&self, page_no: usize) {
        if self.engine.display_page(page_no) {
            self.cb.page_no_changed(page_no);
            self.cb.repaint();
        } else {
            warn!(page_no, "archive engine refused page");
        }
    }
}

impl Controller for ChmController {
    fn file_path(&self) -> &Path {
        self.engine.file_path()
    }

    fn default_file_ext(&self) -> &str {
        ".chm"
    }

    fn page_count(&self) -> usize {
        self.engine.page_count()
    }

    fn property(&self, prop: DocumentProperty) -> Option<String> {
        self.engine.property(prop)
    }

    fn current_page_no(&self) -> usize {
        self.engine.current_page_no()
    }

    fn go_to_page(&mut self, page_no: usize, add_nav_point: bool) {
        if !self.valid_page_no(page_no) {
            debug!(page_no, "ignoring out-of-range page");
            return;
        }
        if add_nav_point {
            let current = NavPoint::new(self.engine.current_page_no());
            self.nav.record(current);
        }
        self.display_and_notify(page_no);
    }

    fn can_navigate(&self, dir: i32) -> bool {
        self.nav.can_navigate(dir)
    }

    fn navigate(&mut self, dir: i32) {
        let current = NavPoint::new(self.engine.current_page_no());
        if let Some(pt) = self.nav.navigate(dir, current) {
            self.display_and_notify(pt.page_no);
        }
    }

    fn set_display_mode(&mut self, _mode: DisplayMode, _keep_continuous: bool) {
        // the embedded view paginates itself; modes do not apply
    }

    fn display_mode(&self) -> DisplayMode {
        DisplayMode::SinglePage
    }

    fn set_presentation_mode(&mut self, enable: bool) {
        self.presentation = enable;
        self.cb.repaint();
    }

    fn set_zoom_virtual(&mut self, zoom: Zoom, _fix_pt: Option<Point>) {
        self.zoom = zoom.clamped();
        self.engine.zoom_to(self.effective_zoom());
    }

    fn zoom_virtual(&self) -> Zoom {
        self.zoom
    }

    fn next_zoom_step(&self, towards: f32) -> f32 {
        next_zoom_step(self.effective_zoom(), towards)
    }

    fn set_view_port_size(&mut self, _size: CanvasSize) {
        // the embedded view tracks its own window size
    }

    fn has_toc_tree(&self) -> bool {
        self.engine.toc().is_some()
    }

    fn toc_tree(&self) -> Option<TocItem> {
        self.engine.toc()
    }

    fn goto_link(&mut self, dest: &PageDestination) {
        match dest {
            PageDestination::Page { page_no, .. } => self.go_to_page(*page_no, true),
            PageDestination::Named { name } => match self.named_dest(name) {
                Some(PageDestination::Named { .. }) | None => {
                    debug!(name, "unresolved named destination");
                }
                Some(resolved) => self.goto_link(&resolved),
            },
            PageDestination::Url { url } => self.cb.launch_browser(url),
            PageDestination::File { .. } => self.cb.goto_link(dest),
        }
    }

    fn named_dest(&self, name: &str) -> Option<PageDestination> {
        self.engine.named_dest(name)
    }

    fn update_display_state(&self, ds: &mut DisplayState) {
        ds.file_path = Some(self.engine.file_path().to_path_buf());
        ds.page_no = self.engine.current_page_no();
        ds.display_mode = DisplayMode::SinglePage;
        ds.zoom = self.zoom;
        ds.scroll_pos = Point::default();
        ds.rotation = 0;
    }

    fn create_thumbnail(&mut self, size: CanvasSize, reply: ThumbnailReply) {
        match self.engine.render_page(1, size) {
            Ok(bitmap) => reply.deliver(ThumbnailOutcome::Rendered(bitmap)),
            Err(err) => {
                warn!(?err, "thumbnail render failed");
                reply.deliver(ThumbnailOutcome::Failed);
            }
        }
    }

    fn as_chm(&self) -> Option<&ChmController> {
        Some(self)
    }

    fn as_chm_mut(&mut self) -> Option<&mut ChmController> {
        Some(self)
    }
}

/// First phase of ebook construction. The reflow engine's own setup
/// repaints the host window, so no live controller may exist until the
/// host finishes constructing; this handle exposes nothing but the
/// document and the activation step.
pub struct PendingEbookController {
    doc: Arc<dyn EbookDoc>,
    cb: Arc<dyn ControllerCallback>,
}

impl PendingEbookController {
    pub fn doc(&self) -> &dyn EbookDoc {
        self.doc.as_ref()
    }

    /// Attaches the reflow engine and runs the initial layout, turning the
    /// handle into a live controller.
    pub fn activate(
        self,
        display_mode: DisplayMode,
        mut reflow: Box<dyn ReflowEngine>,
    ) -> EbookController {
        let display_mode = display_mode.with_continuous(false);
        let page_count = reflow.relayout(display_mode);
        self.cb.layout_complete(ReflowLayoutInfo {
            page_count,
            complete: true,
        });
        self.cb.request_delayed_layout(LAYOUT_TIMER_DELAY);
        EbookController {
            doc: self.doc,
            cb: self.cb,
            reflow,
            display_mode,
            presentation: false,
            messages_enabled: true,
            layout_pending: true,
            nav: NavHistory::new(),
        }
    }
}

/// Controller for reflowable ebook documents. Layout is asynchronous: view
/// changes request a delayed layout pass from the host, which later calls
/// `on_layout_timer`.
pub struct EbookController {
    doc: Arc<dyn EbookDoc>,
    cb: Arc<dyn ControllerCallback>,
    reflow: Box<dyn ReflowEngine>,
    display_mode: DisplayMode,
    presentation: bool,
    messages_enabled: bool,
    layout_pending: bool,
    nav: NavHistory,
}

impl EbookController {
    pub fn create(doc: Arc<dyn EbookDoc>, cb: Arc<dyn ControllerCallback>) -> PendingEbookController {
        PendingEbookController { doc, cb }
    }

    pub fn doc(&self) -> &dyn EbookDoc {
        self.doc.as_ref()
    }

    /// Forwards a native window message into the reflow view. `None` when
    /// unhandled or when message handling is gated off for teardown.
    pub fn handle_message(&mut self, msg: u32, wparam: usize, lparam: isize) -> Option<isize> {
        if !self.messages_enabled {
            return None;
        }
        self.reflow.handle_message(msg, wparam, lparam)
    }

    pub fn enable_message_handling(&mut self, enable: bool) {
        self.messages_enabled = enable;
    }

    pub fn update_document_colors(&mut self, foreground: u32, background: u32) {
        self.reflow.set_colors(foreground, background);
        self.schedule_relayout();
        self.cb.repaint();
    }

    pub fn request_repaint(&self) {
        self.cb.repaint();
    }

    pub fn is_presentation(&self) -> bool {
        self.presentation
    }

    /// Runs the relayout requested earlier through `request_delayed_layout`.
    #[instrument(skip(self))]
    pub fn on_layout_timer(&mut self) {
        if !self.layout_pending {
            return;
        }
        self.layout_pending = false;
        let page_count = self.reflow.relayout(self.display_mode);
        self.cb.layout_complete(ReflowLayoutInfo {
            page_count,
            complete: true,
        });
        self.cb.repaint();
    }

    fn schedule_relayout(&mut self) {
        if !self.layout_pending {
            self.layout_pending = true;
            self.cb.request_delayed_layout(LAYOUT_TIMER_DELAY);
        }
    }
}

impl Controller for EbookController {
    fn file_path(&self) -> &Path {
        self.doc.file_path()
    }

    fn default_file_ext(&self) -> &str {
        self.doc.default_file_ext()
    }

    fn page_count(&self) -> usize {
        self.reflow.page_count()
    }

    fn property(&self, prop: DocumentProperty) -> Option<String> {
        self.doc.property(prop)
    }

    fn current_page_no(&self) -> usize {
        self.reflow.current_page_no()
    }

    fn go_to_page(&mut self, page_no: usize, add_nav_point: bool) {
        if !self.valid_page_no(page_no) {
            debug!(page_no, "ignoring out-of-range page");
            return;
        }
        if add_nav_point {
            let current = NavPoint::new(self.reflow.current_page_no());
            self.nav.record(current);
        }
        if self.reflow.go_to_page(page_no) {
            self.cb.page_no_changed(page_no);
            self.cb.repaint();
        }
    }

    fn can_navigate(&self, dir: i32) -> bool {
        self.nav.can_navigate(dir)
    }

    fn navigate(&mut self, dir: i32) {
        let current = NavPoint::new(self.reflow.current_page_no());
        if let Some(pt) = self.nav.navigate(dir, current) {
            if self.reflow.go_to_page(pt.page_no) {
                self.cb.page_no_changed(pt.page_no);
                self.cb.repaint();
            }
        }
    }

    fn set_display_mode(&mut self, mode: DisplayMode, _keep_continuous: bool) {
        // reflowed pages cannot scroll continuously
        self.display_mode = mode.with_continuous(false);
        self.schedule_relayout();
    }

    fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    fn set_presentation_mode(&mut self, enable: bool) {
        if enable != self.presentation {
            self.presentation = enable;
            self.schedule_relayout();
        }
    }

    fn set_zoom_virtual(&mut self, zoom: Zoom, _fix_pt: Option<Point>) {
        debug!(?zoom, "zoom is not applicable to reflowed layout");
    }

    fn zoom_virtual(&self) -> Zoom {
        Zoom::ActualSize
    }

    fn next_zoom_step(&self, towards: f32) -> f32 {
        next_zoom_step(100.0, towards)
    }

    fn set_view_port_size(&mut self, size: CanvasSize) {
        self.reflow.set_viewport(size);
        self.schedule_relayout();
    }

    fn has_toc_tree(&self) -> bool {
        self.doc.toc().is_some()
    }

    fn toc_tree(&self) -> Option<TocItem> {
        self.doc.toc()
    }

    fn goto_link(&mut self, dest: &PageDestination) {
        match dest {
            PageDestination::Page { page_no, .. } => self.go_to_page(*page_no, true),
            PageDestination::Named { name } => {
                debug!(name, "unresolved named destination");
            }
            PageDestination::Url { url } => self.cb.launch_browser(url),
            PageDestination::File { .. } => self.cb.goto_link(dest),
        }
    }

    fn named_dest(&self, _name: &str) -> Option<PageDestination> {
        None
    }

    fn update_display_state(&self, ds: &mut DisplayState) {
        ds.file_path = Some(self.doc.file_path().to_path_buf());
        ds.page_no = self.reflow.current_page_no();
        ds.display_mode = self.display_mode;
        ds.zoom = Zoom::ActualSize;
        ds.scroll_pos = Point::default();
        ds.rotation = 0;
    }

    fn create_thumbnail(&mut self, _size: CanvasSize, reply: ThumbnailReply) {
        match self.doc.cover_image() {
            Some(bitmap) => reply.deliver(ThumbnailOutcome::Rendered(bitmap)),
            None => reply.deliver(ThumbnailOutcome::Failed),
        }
    }

    fn as_ebook(&self) -> Option<&EbookController> {
        Some(self)
    }

    fn as_ebook_mut(&mut self) -> Option<&mut EbookController> {
        Some(self)
    }
}
