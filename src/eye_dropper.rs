//! Sampling colors from a captured frame of a rendered region.
//!
//! An [`EyeDropperScope`] coordinates a single pick session at a time. Calling
//! [`EyeDropperScope::prompt_pick_color`] captures the region, after which
//! pointer movement updates a magnified [`PreviewSample`] until the pick is
//! confirmed or cancelled. Every caller that prompts while a session is
//! pending shares that session's [`PendingColor`].

use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use cushy::figures::units::UPx;
use cushy::figures::{Point, Size, Zero};
use cushy::kludgine::Color;
use cushy::reactive::value::{Destination, Dynamic, DynamicReader, Source};
use cushy::widget::{MakeWidget, WidgetInstance};
use image::RgbaImage;
use kempt::{map, Map};
use parking_lot::{Condvar, Mutex};

/// The color used for preview pixels that fall outside of the captured frame.
pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

/// The number of pixels along each edge of a [`PreviewSample`] by default.
pub const DEFAULT_PREVIEW_SIZE: u32 = 9;

/// The largest number of pixels along each edge of a [`PreviewSample`].
pub const MAX_PREVIEW_SIZE: u32 = 255;

/// The number of colors a [`ColorHistory`] keeps by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 8;

/// An error preventing a frame from being captured.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CaptureError {
    /// The region has not been laid out yet, or has no area.
    NotLaidOut,
    /// No [`FrameSource`] has been installed.
    NoSource,
    /// The pixel buffer does not match the frame's dimensions.
    BufferSize {
        /// The number of pixels the dimensions require.
        expected: usize,
        /// The number of pixels provided.
        actual: usize,
    },
    /// The source was unable to produce a frame.
    Unavailable(String),
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NotLaidOut => f.write_str("the region has not been laid out"),
            CaptureError::NoSource => f.write_str("no frame source is installed"),
            CaptureError::BufferSize { expected, actual } => {
                write!(f, "expected {expected} pixels, got {actual}")
            }
            CaptureError::Unavailable(reason) => write!(f, "capture unavailable: {reason}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// An immutable, row-major snapshot of a rendered region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedFrame {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl CapturedFrame {
    /// Returns a frame of `width` by `height` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::BufferSize`] if `pixels` does not contain
    /// exactly `width * height` colors.
    pub fn new(width: u32, height: u32, pixels: Vec<Color>) -> Result<Self, CaptureError> {
        let expected = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(usize::MAX);
        if pixels.len() == expected {
            Ok(Self {
                width,
                height,
                pixels,
            })
        } else {
            Err(CaptureError::BufferSize {
                expected,
                actual: pixels.len(),
            })
        }
    }

    /// Returns a frame whose pixels are produced by `pixel(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut pixel: impl FnMut(u32, u32) -> Color) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| pixel(x, y))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Returns the width of this frame, in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of this frame, in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Returns the dimensions of this frame.
    #[must_use]
    pub fn size(&self) -> Size<u32> {
        Size::new(self.width, self.height)
    }

    /// Returns the color at the integer pixel coordinate, or `None` if it lies
    /// outside of this frame.
    #[must_use]
    pub fn pixel(&self, x: i64, y: i64) -> Option<Color> {
        let x = u32::try_from(x).ok().filter(|x| *x < self.width)?;
        let y = u32::try_from(y).ok().filter(|y| *y < self.height)?;
        let index = usize::try_from(u64::from(y) * u64::from(self.width) + u64::from(x)).ok()?;
        self.pixels.get(index).copied()
    }

    /// Returns the color under `location`, flooring fractional coordinates.
    #[must_use]
    pub fn color_at(&self, location: Point<f32>) -> Option<Color> {
        self.pixel(floor(location.x), floor(location.y))
    }

    /// Returns the `size` by `size` window of pixels centered on `location`.
    ///
    /// Even sizes are rounded up to the next odd size so that the window has a
    /// center pixel, and sizes are limited to [`MAX_PREVIEW_SIZE`].
    #[must_use]
    pub fn sample(&self, location: Point<f32>, size: u32) -> PreviewSample {
        let size = odd_preview_size(size);
        let half = i64::from(size / 2);
        let center = Point::new(floor(location.x), floor(location.y));
        let mut pixels = Vec::with_capacity(usize::try_from(size * size).unwrap_or_default());
        for y in center.y - half..=center.y + half {
            for x in center.x - half..=center.x + half {
                pixels.push(self.pixel(x, y).unwrap_or(TRANSPARENT));
            }
        }
        PreviewSample {
            center,
            size,
            picked: self.pixel(center.x, center.y).unwrap_or(TRANSPARENT),
            pixels,
        }
    }
}

impl From<&RgbaImage> for CapturedFrame {
    fn from(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = image
            .pixels()
            .map(|pixel| {
                let [red, green, blue, alpha] = pixel.0;
                Color::new(red, green, blue, alpha)
            })
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn floor(coordinate: f32) -> i64 {
    // Far outside of any frame, with room to offset by a preview window.
    const LIMIT: f32 = 1_000_000_000.;
    coordinate.floor().clamp(-LIMIT, LIMIT) as i64
}

fn odd_preview_size(size: u32) -> u32 {
    size.clamp(1, MAX_PREVIEW_SIZE) | 1
}

/// A magnified window of pixels around the pointer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreviewSample {
    center: Point<i64>,
    size: u32,
    picked: Color,
    pixels: Vec<Color>,
}

impl PreviewSample {
    /// Returns the frame coordinate at the center of this sample.
    #[must_use]
    pub const fn center(&self) -> Point<i64> {
        self.center
    }

    /// Returns the number of pixels along each edge of this sample.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns the color at the center of this sample.
    #[must_use]
    pub const fn picked(&self) -> Color {
        self.picked
    }

    /// Returns the sampled pixels in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Returns the pixel at `column` and `row` within this sample.
    #[must_use]
    pub fn get(&self, column: u32, row: u32) -> Option<Color> {
        if column >= self.size || row >= self.size {
            return None;
        }
        let index = usize::try_from(row * self.size + column).ok()?;
        self.pixels.get(index).copied()
    }
}

/// The result of a pick session.
///
/// Clones refer to the same session, and compare equal to each other. The
/// result is `None` if the session could not capture a frame or was
/// cancelled.
///
/// `PendingColor` can be awaited, or waited on from a blocking thread.
#[derive(Clone)]
#[must_use]
pub struct PendingColor(Arc<PickSlot>);

struct PickSlot {
    state: Mutex<SlotState>,
    resolved: Condvar,
}

#[derive(Default)]
struct SlotState {
    result: Option<Option<Color>>,
    wakers: Vec<Waker>,
}

impl PendingColor {
    fn new() -> Self {
        Self(Arc::new(PickSlot {
            state: Mutex::new(SlotState::default()),
            resolved: Condvar::new(),
        }))
    }

    fn resolved(color: Option<Color>) -> Self {
        let pending = Self::new();
        pending.resolve(color);
        pending
    }

    /// Stores the result, returning false if the result was already set.
    fn resolve(&self, color: Option<Color>) -> bool {
        let mut state = self.0.state.lock();
        if state.result.is_some() {
            return false;
        }
        state.result = Some(color);
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);

        self.0.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns the result if the session has ended.
    #[must_use]
    pub fn try_result(&self) -> Option<Option<Color>> {
        self.0.state.lock().result
    }

    /// Returns true if the session has ended.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.try_result().is_some()
    }

    /// Blocks the current thread until the session ends.
    #[must_use]
    pub fn wait(&self) -> Option<Color> {
        let mut state = self.0.state.lock();
        loop {
            if let Some(result) = state.result {
                return result;
            }
            self.0.resolved.wait(&mut state);
        }
    }

    /// Blocks the current thread until the session ends or `timeout` elapses.
    ///
    /// Returns `None` if the timeout elapsed first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Option<Color>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock();
        loop {
            if let Some(result) = state.result {
                return Some(result);
            }
            if self.0.resolved.wait_until(&mut state, deadline).timed_out() {
                return state.result;
            }
        }
    }
}

impl Future for PendingColor {
    type Output = Option<Color>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.0.state.lock();
        if let Some(result) = state.result {
            return Poll::Ready(result);
        }
        let will_wake = state.wakers.iter().any(|w| w.will_wake(cx.waker()));
        if !will_wake {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl PartialEq for PendingColor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PendingColor {}

impl fmt::Debug for PendingColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingColor")
            .field(&self.try_result())
            .finish()
    }
}

/// A unique identifier for a [`ColorHistory`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HistoryId(u64);

impl HistoryId {
    fn unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A list of recently picked colors, most recent first.
///
/// Clones share the same list. Appending a color that is already present
/// moves it to the front.
#[derive(Clone, Debug)]
pub struct ColorHistory {
    id: HistoryId,
    colors: Dynamic<Vec<Color>>,
    limit: usize,
}

impl ColorHistory {
    /// Returns an empty history holding up to [`DEFAULT_HISTORY_LIMIT`]
    /// colors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Returns an empty history holding up to `limit` colors.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            id: HistoryId::unique(),
            colors: Dynamic::default(),
            limit,
        }
    }

    /// Returns this history's unique id.
    #[must_use]
    pub const fn id(&self) -> HistoryId {
        self.id
    }

    /// Returns the maximum number of colors kept.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the list of colors, which updates as colors are appended.
    #[must_use]
    pub fn colors(&self) -> DynamicReader<Vec<Color>> {
        self.colors.create_reader()
    }

    /// Returns the colors currently in the history, most recent first.
    #[must_use]
    pub fn recent(&self) -> Vec<Color> {
        self.colors.get()
    }

    /// Records `color` as the most recent pick.
    pub fn append(&self, color: Color) {
        let limit = self.limit;
        self.colors.map_mut(|mut colors| {
            colors.retain(|existing| *existing != color);
            colors.insert(0, color);
            colors.truncate(limit);
        });
    }
}

impl Default for ColorHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ColorHistory {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Produces frames for an [`EyeDropperScope`].
///
/// Captures run on a background thread.
pub trait FrameSource: Send + 'static {
    /// Captures a frame covering `region`.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame can be produced.
    fn capture(&mut self, region: Size<UPx>) -> Result<CapturedFrame, CaptureError>;
}

impl<F> FrameSource for F
where
    F: FnMut(Size<UPx>) -> Result<CapturedFrame, CaptureError> + Send + 'static,
{
    fn capture(&mut self, region: Size<UPx>) -> Result<CapturedFrame, CaptureError> {
        self(region)
    }
}

/// A [`FrameSource`] that renders a widget offscreen.
#[derive(Debug, Clone)]
pub struct RecordedWidget {
    widget: WidgetInstance,
}

impl RecordedWidget {
    /// Returns a source that records `widget`.
    pub fn new(widget: impl MakeWidget) -> Self {
        Self {
            widget: widget.make_widget(),
        }
    }
}

impl FrameSource for RecordedWidget {
    fn capture(&mut self, region: Size<UPx>) -> Result<CapturedFrame, CaptureError> {
        let recorder = self
            .widget
            .clone()
            .build_recorder()
            .with_alpha()
            .size(Size::new(region.width.get(), region.height.get()))
            .finish()
            .map_err(|err| CaptureError::Unavailable(format!("{err:?}")))?;
        Ok(CapturedFrame::from(recorder.image()))
    }
}

/// The state of an [`EyeDropperScope`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionPhase {
    /// No session is pending.
    #[default]
    Idle,
    /// A frame is being captured.
    Capturing,
    /// A frame has been captured and the pointer is sampling it.
    Sampling,
}

/// A handle to an eye dropper host.
///
/// Descendants of an [`EyeDropper`](crate::widgets::EyeDropper) use a clone
/// of its scope to request colors. Clones share the same session.
#[derive(Clone, Debug, Default)]
pub struct EyeDropperScope {
    data: Arc<ScopeData>,
}

#[derive(Debug)]
struct ScopeData {
    session: Mutex<SessionState>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    region: Mutex<Option<Size<UPx>>>,
    preview_size: AtomicU32,
    phase: Dynamic<SessionPhase>,
    preview: Dynamic<Option<PreviewSample>>,
}

impl Default for ScopeData {
    fn default() -> Self {
        Self {
            session: Mutex::default(),
            source: Mutex::default(),
            region: Mutex::default(),
            preview_size: AtomicU32::new(DEFAULT_PREVIEW_SIZE),
            phase: Dynamic::default(),
            preview: Dynamic::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    next_id: u64,
    active: Option<Session>,
}

#[derive(Debug)]
struct Session {
    id: u64,
    result: PendingColor,
    histories: Map<HistoryId, ColorHistory>,
    frame: Option<Arc<CapturedFrame>>,
}

impl fmt::Debug for dyn FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameSource")
    }
}

impl EyeDropperScope {
    /// Returns a new scope with no frame source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source of captured frames and returns self.
    #[must_use]
    pub fn with_source(self, source: impl FrameSource) -> Self {
        self.set_source(source);
        self
    }

    /// Replaces the source of captured frames.
    pub fn set_source(&self, source: impl FrameSource) {
        *self.data.source.lock() = Some(Box::new(source));
    }

    /// Returns true if a frame source has been installed.
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.data.source.lock().is_some()
    }

    /// Sets the number of pixels along each edge of the preview and returns
    /// self.
    #[must_use]
    pub fn with_preview_size(self, size: u32) -> Self {
        self.set_preview_size(size);
        self
    }

    /// Sets the number of pixels along each edge of the preview.
    ///
    /// Even sizes are rounded up to the next odd size.
    pub fn set_preview_size(&self, size: u32) {
        self.data.preview_size.store(size, Ordering::Relaxed);
    }

    /// Returns the number of pixels along each edge of the preview.
    #[must_use]
    pub fn preview_size(&self) -> u32 {
        odd_preview_size(self.data.preview_size.load(Ordering::Relaxed))
    }

    /// Sets the size of the region captured by the next session.
    ///
    /// The [`EyeDropper`](crate::widgets::EyeDropper) widget updates this
    /// during layout.
    pub fn set_region(&self, region: Size<UPx>) {
        *self.data.region.lock() = Some(region);
    }

    /// Returns the size of the region captured by the next session, if it
    /// has been laid out.
    #[must_use]
    pub fn region(&self) -> Option<Size<UPx>> {
        *self.data.region.lock()
    }

    /// Returns the current phase, which updates as sessions progress.
    #[must_use]
    pub fn phase(&self) -> DynamicReader<SessionPhase> {
        self.data.phase.create_reader()
    }

    /// Returns true while a captured frame is being sampled.
    #[must_use]
    pub fn is_sampling(&self) -> bool {
        self.data.phase.get() == SessionPhase::Sampling
    }

    /// Returns the current preview, if the pointer has moved over a captured
    /// frame.
    #[must_use]
    pub fn preview(&self) -> Option<PreviewSample> {
        self.data.preview.get()
    }

    /// Returns the preview, which updates as the pointer moves.
    #[must_use]
    pub fn watch_preview(&self) -> DynamicReader<Option<PreviewSample>> {
        self.data.preview.create_reader()
    }

    /// Returns the captured frame being sampled, if any.
    #[must_use]
    pub fn frame(&self) -> Option<Arc<CapturedFrame>> {
        self.data
            .session
            .lock()
            .active
            .as_ref()
            .and_then(|session| session.frame.clone())
    }

    /// Requests a color from the user.
    ///
    /// If a session is already pending, this joins it and returns the same
    /// [`PendingColor`] as the earlier callers. Otherwise the region is
    /// captured on a background thread and a new session begins sampling once
    /// the frame is ready.
    ///
    /// When the session is confirmed, the picked color is appended to each
    /// distinct `history` supplied by the session's callers.
    ///
    /// If the region has not been laid out or no frame can be captured, the
    /// result resolves to `None`.
    pub fn prompt_pick_color(&self, history: Option<&ColorHistory>) -> PendingColor {
        let mut state = self.data.session.lock();
        if let Some(session) = &mut state.active {
            if let Some(history) = history {
                if let map::Entry::Vacant(entry) = session.histories.entry(history.id()) {
                    entry.insert(history.clone());
                }
            }
            tracing::trace!(session = session.id, "joined pending pick session");
            return session.result.clone();
        }

        let Some(region) = self.region().filter(|region| {
            region.width > UPx::ZERO && region.height > UPx::ZERO
        }) else {
            drop(state);
            tracing::warn!(error = %CaptureError::NotLaidOut, "unable to pick color");
            return PendingColor::resolved(None);
        };
        if !self.has_source() {
            drop(state);
            tracing::warn!(error = %CaptureError::NoSource, "unable to pick color");
            return PendingColor::resolved(None);
        }

        let id = state.next_id;
        state.next_id += 1;
        let result = PendingColor::new();
        let mut histories = Map::new();
        if let Some(history) = history {
            histories.insert(history.id(), history.clone());
        }
        state.active = Some(Session {
            id,
            result: result.clone(),
            histories,
            frame: None,
        });
        self.data.phase.set(SessionPhase::Capturing);
        drop(state);

        tracing::debug!(session = id, ?region, "capturing frame for pick session");
        let spawned = thread::Builder::new()
            .name(String::from("eye-dropper-capture"))
            .spawn({
                let data = self.data.clone();
                move || {
                    let captured = data
                        .source
                        .lock()
                        .as_mut()
                        .map_or(Err(CaptureError::NoSource), |source| {
                            source.capture(region)
                        });
                    data.frame_captured(id, captured);
                }
            });
        if let Err(err) = spawned {
            self.data.frame_captured(
                id,
                Err(CaptureError::Unavailable(err.to_string())),
            );
        }

        result
    }

    /// Updates the preview to sample around `location`, in frame
    /// coordinates.
    ///
    /// Does nothing unless a frame is being sampled.
    pub fn pointer_moved(&self, location: Point<f32>) {
        let Some(frame) = self.frame() else {
            return;
        };
        let sample = frame.sample(location, self.preview_size());
        self.data.preview.set(Some(sample));
    }

    /// Ends the pending session with the color at the center of the current
    /// preview.
    ///
    /// Returns false if no frame is being sampled or the pointer has not
    /// moved over it.
    pub fn confirm(&self) -> bool {
        let mut state = self.data.session.lock();
        if !state
            .active
            .as_ref()
            .is_some_and(|session| session.frame.is_some())
        {
            return false;
        }
        let Some(picked) = self.data.preview.get().map(|preview| preview.picked()) else {
            return false;
        };
        let Some(session) = self.data.end_session(&mut state) else {
            return false;
        };
        drop(state);

        tracing::debug!(session = session.id, ?picked, "color picked");
        session.result.resolve(Some(picked));
        for history in session.histories.values() {
            history.append(picked);
        }
        true
    }

    /// Ends the pending session without a color.
    ///
    /// No history is recorded. Returns false if no session was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.data.session.lock();
        let Some(session) = self.data.end_session(&mut state) else {
            return false;
        };
        drop(state);

        tracing::debug!(session = session.id, "pick session cancelled");
        session.result.resolve(None);
        true
    }
}

impl ScopeData {
    fn end_session(&self, state: &mut SessionState) -> Option<Session> {
        let session = state.active.take()?;
        self.preview.set(None);
        self.phase.set(SessionPhase::Idle);
        Some(session)
    }

    fn frame_captured(&self, id: u64, captured: Result<CapturedFrame, CaptureError>) {
        let mut state = self.session.lock();
        let Some(session) = state.active.as_mut().filter(|session| session.id == id) else {
            tracing::trace!(session = id, "discarding frame for ended session");
            return;
        };

        match captured {
            Ok(frame) => {
                tracing::debug!(
                    session = id,
                    width = frame.width(),
                    height = frame.height(),
                    "frame captured"
                );
                session.frame = Some(Arc::new(frame));
                self.phase.set(SessionPhase::Sampling);
            }
            Err(err) => {
                let session = self.end_session(&mut state);
                drop(state);
                tracing::warn!(session = id, error = %err, "unable to capture frame");
                if let Some(session) = session {
                    session.result.resolve(None);
                }
            }
        }
    }
}
