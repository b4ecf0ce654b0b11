use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: i32,
    pub height: i32,
}

impl CanvasSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// RGBA8 pixel buffer handed from a rendering collaborator to the host.
#[derive(Debug, Clone)]
pub struct RenderedBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("unrecognized display mode {0:?}")]
pub struct ParseDisplayModeError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DisplayMode {
    SinglePage,
    Facing,
    BookView,
    Continuous,
    ContinuousFacing,
    ContinuousBookView,
}

impl DisplayMode {
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            DisplayMode::Continuous
                | DisplayMode::ContinuousFacing
                | DisplayMode::ContinuousBookView
        )
    }

    /// Maps a mode to its continuous or single-screen counterpart. This is
    /// how `keep_continuous` mode switches preserve scroll semantics.
    pub fn with_continuous(self, continuous: bool) -> DisplayMode {
        match (self, continuous) {
            (DisplayMode::SinglePage, true) => DisplayMode::Continuous,
            (DisplayMode::Facing, true) => DisplayMode::ContinuousFacing,
            (DisplayMode::BookView, true) => DisplayMode::ContinuousBookView,
            (DisplayMode::Continuous, false) => DisplayMode::SinglePage,
            (DisplayMode::ContinuousFacing, false) => DisplayMode::Facing,
            (DisplayMode::ContinuousBookView, false) => DisplayMode::BookView,
            (mode, _) => mode,
        }
    }
}

impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode::SinglePage
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayMode::SinglePage => "single page",
            DisplayMode::Facing => "facing",
            DisplayMode::BookView => "book view",
            DisplayMode::Continuous => "continuous",
            DisplayMode::ContinuousFacing => "continuous facing",
            DisplayMode::ContinuousBookView => "continuous book view",
        };
        f.write_str(name)
    }
}

impl FromStr for DisplayMode {
    type Err = ParseDisplayModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single page" => Ok(DisplayMode::SinglePage),
            "facing" => Ok(DisplayMode::Facing),
            "book view" => Ok(DisplayMode::BookView),
            "continuous" => Ok(DisplayMode::Continuous),
            "continuous facing" => Ok(DisplayMode::ContinuousFacing),
            "continuous book view" => Ok(DisplayMode::ContinuousBookView),
            other => Err(ParseDisplayModeError(other.to_owned())),
        }
    }
}

impl From<DisplayMode> for String {
    fn from(mode: DisplayMode) -> String {
        mode.to_string()
    }
}

impl TryFrom<String> for DisplayMode {
    type Error = ParseDisplayModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

pub const ZOOM_MIN: f32 = 8.33;
pub const ZOOM_MAX: f32 = 6400.0;

/// Discrete zoom ladder stepped through by `next_zoom_step`.
pub const ZOOM_STEPS: &[f32] = &[
    8.33, 12.5, 18.0, 25.0, 33.33, 50.0, 66.67, 75.0, 100.0, 125.0, 150.0, 200.0, 300.0, 400.0,
    600.0, 800.0, 1000.0, 1600.0, 3200.0, 6400.0,
];

/// Returns the ladder step one notch from `current` toward `towards`,
/// clamped at `towards`. Equal values are returned unchanged.
pub fn next_zoom_step(current: f32, towards: f32) -> f32 {
    if towards > current {
        ZOOM_STEPS
            .iter()
            .copied()
            .find(|&step| step > current * 1.01)
            .map(|step| step.min(towards))
            .unwrap_or(towards)
    } else if towards < current {
        ZOOM_STEPS
            .iter()
            .rev()
            .copied()
            .find(|&step| step < current * 0.99)
            .map(|step| step.max(towards))
            .unwrap_or(towards)
    } else {
        current
    }
}

#[derive(Debug, Error)]
#[error("unrecognized zoom value {0:?}")]
pub struct ParseZoomError(String);

/// Zoom setting: either an explicit percentage or a reserved fit policy
/// resolved against the viewport at render time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Zoom {
    FitPage,
    FitWidth,
    ActualSize,
    Percent(f32),
}

impl Zoom {
    pub fn is_virtual(&self) -> bool {
        !matches!(self, Zoom::Percent(_))
    }

    pub fn clamped(self) -> Zoom {
        match self {
            Zoom::Percent(p) => Zoom::Percent(p.clamp(ZOOM_MIN, ZOOM_MAX)),
            other => other,
        }
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Zoom::FitPage
    }
}

impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zoom::FitPage => f.write_str("fitpage"),
            Zoom::FitWidth => f.write_str("fitwidth"),
            Zoom::ActualSize => f.write_str("actualsize"),
            Zoom::Percent(p) => write!(f, "{}", p),
        }
    }
}

impl FromStr for Zoom {
    type Err = ParseZoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fitpage" => Ok(Zoom::FitPage),
            "fitwidth" => Ok(Zoom::FitWidth),
            "actualsize" => Ok(Zoom::ActualSize),
            other => match other.parse::<f32>() {
                Ok(p) if p.is_finite() && p > 0.0 => Ok(Zoom::Percent(p)),
                _ => Err(ParseZoomError(other.to_owned())),
            },
        }
    }
}

impl From<Zoom> for String {
    fn from(zoom: Zoom) -> String {
        zoom.to_string()
    }
}

impl TryFrom<String> for Zoom {
    type Error = ParseZoomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Snapshot of a controller's view, written by `update_display_state` and
/// persisted by the host. The controller never stores this itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub file_path: Option<PathBuf>,
    pub page_no: usize,
    pub display_mode: DisplayMode,
    pub zoom: Zoom,
    pub scroll_pos: Point,
    pub rotation: i32,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            file_path: None,
            page_no: 1,
            display_mode: DisplayMode::default(),
            zoom: Zoom::default(),
            scroll_pos: Point::default(),
            rotation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentProperty {
    Title,
    Author,
    Subject,
    Keywords,
    Creator,
    Producer,
    CreationDate,
    ModificationDate,
}

/// Opaque navigation target resolved by a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PageDestination {
    Page {
        page_no: usize,
        scroll: Option<Point>,
    },
    Named {
        name: String,
    },
    Url {
        url: Url,
    },
    File {
        path: PathBuf,
    },
}

impl PageDestination {
    pub fn page(page_no: usize) -> Self {
        PageDestination::Page {
            page_no,
            scroll: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocItem {
    pub title: String,
    pub dest: Option<PageDestination>,
    pub open: bool,
    pub children: Vec<TocItem>,
}

impl TocItem {
    pub fn new(title: impl Into<String>, dest: Option<PageDestination>) -> Self {
        Self {
            title: title.into(),
            dest,
            open: false,
            children: Vec::new(),
        }
    }

    /// Depth-first flattening for list-style outline display.
    pub fn flatten(&self) -> Vec<(usize, &TocItem)> {
        let mut out = Vec::new();
        self.collect(0, &mut out);
        out
    }

    fn collect<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a TocItem)>) {
        out.push((depth, self));
        for child in &self.children {
            child.collect(depth + 1, out);
        }
    }
}

/// Document-kind tag carried by the fixed-page variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Pdf,
    Xps,
    DjVu,
    Images,
    ComicBook,
    Postscript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    Highlight,
    Underline,
    StrikeOut,
    Squiggly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageAnnotation {
    pub kind: AnnotationKind,
    pub page_no: usize,
    pub rect: RectF,
    pub color: [u8; 4],
}

pub const NAV_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavPoint {
    pub page_no: usize,
    pub scroll: Point,
}

impl NavPoint {
    pub fn new(page_no: usize) -> Self {
        Self {
            page_no,
            scroll: Point::default(),
        }
    }
}

/// Bounded jump list of saved view positions. The cursor sits between the
/// back entries and the forward entries; `cursor == entries.len()` means the
/// live position has not been stored yet.
#[derive(Debug, Default)]
pub struct NavHistory {
    entries: Vec<NavPoint>,
    cursor: usize,
}

impl NavHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves a position before jumping away from it. Discards any forward
    /// tail and the oldest entry once the limit is reached.
    pub fn record(&mut self, pt: NavPoint) {
        self.entries.truncate(self.cursor);
        if self.entries.len() == NAV_HISTORY_LIMIT {
            self.entries.remove(0);
        }
        self.entries.push(pt);
        self.cursor = self.entries.len();
        debug!(
            page = pt.page_no,
            depth = self.entries.len(),
            "nav point recorded"
        );
    }

    /// `dir` is a signed step count, not necessarily +/-1.
    pub fn can_navigate(&self, dir: i32) -> bool {
        if dir == 0 {
            return false;
        }
        let target = self.cursor as i64 + dir as i64;
        target >= 0 && (target as usize) < self.entries.len()
    }

    /// Steps the cursor by `dir` and returns the position to restore.
    /// `current` keeps the live position reachable when stepping backward.
    pub fn navigate(&mut self, dir: i32, current: NavPoint) -> Option<NavPoint> {
        if !self.can_navigate(dir) {
            return None;
        }
        if self.cursor == self.entries.len() {
            // stepping back off the live position; keep it reachable forward
            self.entries.push(current);
        } else {
            self.entries[self.cursor] = current;
        }
        let target = (self.cursor as i64 + dir as i64) as usize;
        self.cursor = target;
        Some(self.entries[target])
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

/// Rendering capability of an already-open fixed-layout document. Owned by
/// the fixed-page controller once handed to its factory.
pub trait PageEngine: Send + Sync {
    fn file_path(&self) -> &Path;
    fn default_file_ext(&self) -> &str;
    fn page_count(&self) -> usize;
    /// Page dimensions in engine units, used to resolve fit zoom policies.
    fn page_size(&self, page_no: usize) -> (f32, f32);
    fn property(&self, prop: DocumentProperty) -> Option<String>;
    fn render_page(&self, page_no: usize, target: CanvasSize) -> Result<RenderedBitmap>;

    fn toc(&self) -> Option<TocItem> {
        None
    }
    fn named_dest(&self, _name: &str) -> Option<PageDestination> {
        None
    }
    // custom page labels (roman-numeral front matter and the like)
    fn has_page_labels(&self) -> bool {
        false
    }
    fn page_label(&self, _page_no: usize) -> Option<String> {
        None
    }
    fn page_by_label(&self, _label: &str) -> Option<usize> {
        None
    }
}

/// Hypertext-archive engine driving an embedded-browser style view. The
/// engine stays owned by the host; receivers are shared because the engine
/// keeps its own interior navigation state.
pub trait ChmEngine: Send + Sync {
    fn file_path(&self) -> &Path;
    fn page_count(&self) -> usize;
    fn current_page_no(&self) -> usize;
    /// Returns false when the page is not part of the archive's page list.
    fn display_page(&self, page_no: usize) -> bool;
    fn zoom_to(&self, percent: f32);
    fn property(&self, prop: DocumentProperty) -> Option<String>;
    fn toc(&self) -> Option<TocItem>;
    fn named_dest(&self, name: &str) -> Option<PageDestination>;
    fn render_page(&self, page_no: usize, target: CanvasSize) -> Result<RenderedBitmap>;
}

/// Document handle backing the reflowable ebook variant.
pub trait EbookDoc: Send + Sync {
    fn file_path(&self) -> &Path;
    fn default_file_ext(&self) -> &str;
    fn property(&self, prop: DocumentProperty) -> Option<String>;
    fn toc(&self) -> Option<TocItem>;
    fn cover_image(&self) -> Option<RenderedBitmap>;
}

/// Reflow typesetter attached to an ebook controller at activation. Layout
/// is recomputed against the viewport; page numbering is only meaningful
/// after a `relayout`.
pub trait ReflowEngine: Send {
    fn set_viewport(&mut self, size: CanvasSize);
    /// Runs a full relayout and returns the resulting page count.
    fn relayout(&mut self, mode: DisplayMode) -> usize;
    fn page_count(&self) -> usize;
    fn current_page_no(&self) -> usize;
    fn go_to_page(&mut self, page_no: usize) -> bool;
    /// Forwarded native window message; `None` means unhandled.
    fn handle_message(&mut self, msg: u32, wparam: usize, lparam: isize) -> Option<isize>;
    fn set_colors(&mut self, foreground: u32, background: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mode_strings_round_trip() {
        let modes = [
            DisplayMode::SinglePage,
            DisplayMode::Facing,
            DisplayMode::BookView,
            DisplayMode::Continuous,
            DisplayMode::ContinuousFacing,
            DisplayMode::ContinuousBookView,
        ];
        for mode in modes {
            let rendered = mode.to_string();
            let parsed: DisplayMode = rendered.parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("two-up".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn with_continuous_maps_between_counterparts() {
        assert_eq!(
            DisplayMode::SinglePage.with_continuous(true),
            DisplayMode::Continuous
        );
        assert_eq!(
            DisplayMode::ContinuousFacing.with_continuous(false),
            DisplayMode::Facing
        );
        assert_eq!(
            DisplayMode::BookView.with_continuous(false),
            DisplayMode::BookView
        );
        assert!(DisplayMode::ContinuousBookView.is_continuous());
        assert!(!DisplayMode::Facing.is_continuous());
    }

    #[test]
    fn zoom_parses_virtual_values_and_percentages() {
        assert_eq!("fitpage".parse::<Zoom>().unwrap(), Zoom::FitPage);
        assert_eq!(" FitWidth ".parse::<Zoom>().unwrap(), Zoom::FitWidth);
        assert_eq!("actualsize".parse::<Zoom>().unwrap(), Zoom::ActualSize);
        assert_eq!("123.5".parse::<Zoom>().unwrap(), Zoom::Percent(123.5));
        assert!("-50".parse::<Zoom>().is_err());
        assert!("fitheight".parse::<Zoom>().is_err());
    }

    #[test]
    fn zoom_percent_clamps_to_limits() {
        assert_eq!(Zoom::Percent(1.0).clamped(), Zoom::Percent(ZOOM_MIN));
        assert_eq!(Zoom::Percent(99999.0).clamped(), Zoom::Percent(ZOOM_MAX));
        assert_eq!(Zoom::FitWidth.clamped(), Zoom::FitWidth);
    }

    #[test]
    fn next_zoom_step_walks_the_ladder() {
        assert_eq!(next_zoom_step(100.0, ZOOM_MAX), 125.0);
        assert_eq!(next_zoom_step(100.0, ZOOM_MIN), 75.0);
        // off-ladder values snap to the nearest step in the direction
        assert_eq!(next_zoom_step(110.0, ZOOM_MAX), 125.0);
        assert_eq!(next_zoom_step(110.0, ZOOM_MIN), 100.0);
        // clamps at the target instead of overshooting
        assert_eq!(next_zoom_step(100.0, 110.0), 110.0);
        assert_eq!(next_zoom_step(6400.0, ZOOM_MAX), ZOOM_MAX);
        assert_eq!(next_zoom_step(50.0, 50.0), 50.0);
    }

    #[test]
    fn display_state_json_round_trip() {
        let state = DisplayState {
            file_path: Some(PathBuf::from("/tmp/example.pdf")),
            page_no: 7,
            display_mode: DisplayMode::ContinuousFacing,
            zoom: Zoom::FitWidth,
            scroll_pos: Point::new(10, 240),
            rotation: 90,
        };
        let payload = serde_json::to_string(&state).unwrap();
        assert!(payload.contains("\"continuous facing\""));
        assert!(payload.contains("\"fitwidth\""));
        let restored: DisplayState = serde_json::from_str(&payload).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn display_state_preserves_explicit_percent() {
        let state = DisplayState {
            zoom: Zoom::Percent(150.0),
            ..DisplayState::default()
        };
        let payload = serde_json::to_string(&state).unwrap();
        let restored: DisplayState = serde_json::from_str(&payload).unwrap();
        assert_eq!(restored.zoom, Zoom::Percent(150.0));
    }

    #[test]
    fn nav_history_steps_back_and_forward() {
        let mut nav = NavHistory::new();
        nav.record(NavPoint::new(1));
        // we are now "live" on page 5
        assert!(nav.can_navigate(-1));
        assert!(!nav.can_navigate(1));
        assert!(!nav.can_navigate(0));

        let back = nav.navigate(-1, NavPoint::new(5)).unwrap();
        assert_eq!(back.page_no, 1);
        assert!(nav.can_navigate(1));

        let fwd = nav.navigate(1, NavPoint::new(1)).unwrap();
        assert_eq!(fwd.page_no, 5);
        assert!(!nav.can_navigate(1));
    }

    #[test]
    fn nav_history_honors_multi_step_dir() {
        let mut nav = NavHistory::new();
        nav.record(NavPoint::new(1));
        nav.record(NavPoint::new(10));
        nav.record(NavPoint::new(20));

        assert!(nav.can_navigate(-3));
        assert!(!nav.can_navigate(-4));
        let target = nav.navigate(-3, NavPoint::new(30)).unwrap();
        assert_eq!(target.page_no, 1);

        assert!(nav.can_navigate(3));
        let target = nav.navigate(3, NavPoint::new(1)).unwrap();
        assert_eq!(target.page_no, 30);
    }

    #[test]
    fn nav_history_new_jump_discards_forward_tail() {
        let mut nav = NavHistory::new();
        nav.record(NavPoint::new(1));
        nav.record(NavPoint::new(10));
        nav.navigate(-1, NavPoint::new(20)).unwrap();
        assert!(nav.can_navigate(1));

        nav.record(NavPoint::new(10));
        assert!(!nav.can_navigate(1));
        assert!(nav.can_navigate(-1));
    }

    #[test]
    fn nav_history_is_bounded() {
        let mut nav = NavHistory::new();
        for page in 1..=(NAV_HISTORY_LIMIT + 10) {
            nav.record(NavPoint::new(page));
        }
        assert!(nav.can_navigate(-(NAV_HISTORY_LIMIT as i32)));
        assert!(!nav.can_navigate(-(NAV_HISTORY_LIMIT as i32) - 1));
        let oldest = nav
            .navigate(-(NAV_HISTORY_LIMIT as i32), NavPoint::new(99))
            .unwrap();
        assert_eq!(oldest.page_no, 11);
    }

    #[test]
    fn toc_flatten_is_depth_first() {
        let mut root = TocItem::new("Book", None);
        let mut part = TocItem::new("Part I", Some(PageDestination::page(1)));
        part.children
            .push(TocItem::new("Chapter 1", Some(PageDestination::page(2))));
        part.children
            .push(TocItem::new("Chapter 2", Some(PageDestination::page(9))));
        root.children.push(part);
        root.children
            .push(TocItem::new("Part II", Some(PageDestination::page(20))));

        let flat = root.flatten();
        let titles: Vec<_> = flat
            .iter()
            .map(|(depth, item)| (*depth, item.title.as_str()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (0, "Book"),
                (1, "Part I"),
                (2, "Chapter 1"),
                (2, "Chapter 2"),
                (1, "Part II"),
            ]
        );
    }
}
