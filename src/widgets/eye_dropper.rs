//! A host that lets descendants sample colors from its contents.

use cushy::context::{EventContext, GraphicsContext, LayoutContext};
use cushy::figures::units::{Lp, Px, UPx};
use cushy::figures::{FloatConversion, Point, Rect, Round, ScreenScale, Size, Zero};
use cushy::kludgine::app::winit::event::MouseButton;
use cushy::kludgine::app::winit::window::CursorIcon;
use cushy::kludgine::shapes::{Shape, StrokeOptions};
use cushy::kludgine::Color;
use cushy::reactive::value::{DynamicReader, Source};
use cushy::styles::components::{HighlightColor, OutlineColor, OutlineWidth};
use cushy::styles::Dimension;
use cushy::widget::{
    EventHandling, MakeWidget, Widget, WidgetInstance, WidgetLayout, HANDLED, IGNORED,
};
use cushy::window::DeviceId;
use cushy::ConstraintLimit;
use intentional::Cast;

use crate::eye_dropper::{EyeDropperScope, PreviewSample, RecordedWidget, SessionPhase};

/// A widget that samples colors from its contents.
///
/// Descendants request colors through a clone of the widget's
/// [`EyeDropperScope`]. While a session is sampling, the contents are covered
/// by an overlay that previews the pixels under the cursor. A primary click
/// confirms the pick and a secondary click cancels it.
#[derive(Debug)]
#[must_use]
pub struct EyeDropper {
    scope: EyeDropperScope,
    child: WidgetInstance,
}

impl EyeDropper {
    /// Returns a host for `scope` displaying `child`.
    ///
    /// If `scope` has no frame source, `child` is rendered offscreen to
    /// capture frames.
    pub fn new(scope: &EyeDropperScope, child: impl MakeWidget) -> Self {
        Self {
            scope: scope.clone(),
            child: child.make_widget(),
        }
    }

    /// Returns the scope descendants use to request colors.
    #[must_use]
    pub const fn scope(&self) -> &EyeDropperScope {
        &self.scope
    }
}

impl MakeWidget for EyeDropper {
    fn make_widget(self) -> WidgetInstance {
        if !self.scope.has_source() {
            self.scope
                .set_source(RecordedWidget::new(self.child.clone()));
        }
        self.child
            .and(SamplingOverlay::new(self.scope))
            .into_layers()
            .make_widget()
    }
}

#[derive(Debug)]
struct SamplingOverlay {
    scope: EyeDropperScope,
    phase: DynamicReader<SessionPhase>,
    preview: DynamicReader<Option<PreviewSample>>,
    cursor: Option<Point<Px>>,
}

impl SamplingOverlay {
    fn new(scope: EyeDropperScope) -> Self {
        Self {
            phase: scope.phase(),
            preview: scope.watch_preview(),
            scope,
            cursor: None,
        }
    }

    /// Converts a location in this widget to a location in the captured
    /// frame.
    fn frame_location(&self, location: Point<Px>) -> Option<Point<f32>> {
        let frame = self.scope.frame()?;
        let region = self
            .scope
            .region()
            .filter(|region| region.width > UPx::ZERO && region.height > UPx::ZERO)?;
        Some(Point::new(
            location.x.into_float() * frame.width().cast::<f32>() / region.width.into_float(),
            location.y.into_float() * frame.height().cast::<f32>() / region.height.into_float(),
        ))
    }

    fn sample(&self, location: Point<Px>) {
        if let Some(location) = self.frame_location(location) {
            self.scope.pointer_moved(location);
        }
    }

    /// Ends the session for a click of `button`, returning false if the
    /// button has no meaning here.
    fn finish(&self, location: Point<Px>, button: MouseButton) -> bool {
        match button {
            MouseButton::Left => {
                self.sample(location);
                self.scope.confirm();
            }
            MouseButton::Right => {
                self.scope.cancel();
            }
            _ => return false,
        }
        true
    }
}

impl Widget for SamplingOverlay {
    fn redraw(&mut self, context: &mut GraphicsContext<'_, '_, '_, '_>) {
        if self.phase.get_tracking_redraw(context) != SessionPhase::Sampling {
            return;
        }
        let Some(preview) = self.preview.get_tracking_redraw(context) else {
            return;
        };
        let Some(cursor) = self.cursor else {
            return;
        };

        let scale = context.gfx.scale();
        let region = context.gfx.region().size;
        let cell = context.get(&EyeDropperCellSize).into_px(scale).round();
        let cells = i32::try_from(preview.size()).unwrap_or(1);
        let edge = cell * cells;

        // Offset from the cursor, kept inside of the overlay.
        let origin = Point::new(
            (cursor.x + cell).min(region.width - edge).max(Px::ZERO),
            (cursor.y + cell).min(region.height - edge).max(Px::ZERO),
        );

        let row_length = usize::try_from(preview.size()).unwrap_or(1);
        let mut y = origin.y;
        for row in preview.pixels().chunks(row_length) {
            let mut x = origin.x;
            for color in row {
                context.gfx.draw_shape(&Shape::filled_rect(
                    Rect::new(Point::new(x, y), Size::squared(cell)),
                    *color,
                ));
                x += cell;
            }
            y += cell;
        }

        let line_width = context.get(&OutlineWidth).into_px(scale).ceil();
        context.gfx.draw_shape(&Shape::stroked_rect(
            Rect::new(origin, Size::squared(edge)),
            StrokeOptions::px_wide(line_width).colored(context.get(&EyeDropperBorderColor)),
        ));
        context.gfx.draw_shape(&Shape::stroked_rect(
            Rect::new(origin + Point::squared(cell * (cells / 2)), Size::squared(cell)),
            StrokeOptions::px_wide(line_width).colored(context.get(&EyeDropperOutlineColor)),
        ));
    }

    fn layout(
        &mut self,
        available_space: Size<ConstraintLimit>,
        _context: &mut LayoutContext<'_, '_, '_, '_>,
    ) -> WidgetLayout {
        let size = available_space.map(ConstraintLimit::min);
        self.scope.set_region(size);
        size.into()
    }

    fn hit_test(&mut self, _location: Point<Px>, _context: &mut EventContext<'_>) -> bool {
        self.scope.is_sampling()
    }

    fn hover(&mut self, location: Point<Px>, context: &mut EventContext<'_>) -> Option<CursorIcon> {
        if !self.scope.is_sampling() {
            return None;
        }
        self.cursor = Some(location);
        self.sample(location);
        context.set_needs_redraw();
        Some(CursorIcon::Crosshair)
    }

    fn unhover(&mut self, context: &mut EventContext<'_>) {
        if self.cursor.take().is_some() {
            context.set_needs_redraw();
        }
    }

    fn mouse_down(
        &mut self,
        location: Point<Px>,
        _device_id: DeviceId,
        button: MouseButton,
        context: &mut EventContext<'_>,
    ) -> EventHandling {
        if !self.scope.is_sampling() || !self.finish(location, button) {
            return IGNORED;
        }
        self.cursor = None;
        context.set_needs_redraw();
        HANDLED
    }
}

cushy::define_components! {
    EyeDropper {
        /// The size of each magnified pixel in an [`EyeDropper`]'s preview.
        EyeDropperCellSize(Dimension, "cell_size", Dimension::Lp(Lp::points(10)))
        /// The color outlining the pixel that will be picked.
        EyeDropperOutlineColor(Color, "outline_color", @HighlightColor)
        /// The color of the border around an [`EyeDropper`]'s preview.
        EyeDropperBorderColor(Color, "border_color", @OutlineColor)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cushy::figures::units::{Px, UPx};
    use cushy::figures::{Point, Size};
    use cushy::kludgine::app::winit::event::MouseButton;
    use cushy::kludgine::Color;

    use super::SamplingOverlay;
    use crate::eye_dropper::{CaptureError, CapturedFrame, EyeDropperScope, PendingColor};

    /// Returns an overlay laid out at 4x3 over a frame captured at twice that
    /// resolution.
    fn sampling_overlay() -> (SamplingOverlay, PendingColor) {
        let scope = EyeDropperScope::new().with_source(
            |region: Size<UPx>| -> Result<CapturedFrame, CaptureError> {
                Ok(CapturedFrame::from_fn(
                    region.width.get() * 2,
                    region.height.get() * 2,
                    |x, y| Color::new(u8::try_from(x).unwrap(), u8::try_from(y).unwrap(), 0, 255),
                ))
            },
        );
        scope.set_region(Size::new(UPx::new(4), UPx::new(3)));
        let pending = scope.prompt_pick_color(None);
        for _ in 0..500 {
            if scope.is_sampling() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(scope.is_sampling());
        (SamplingOverlay::new(scope), pending)
    }

    #[test]
    fn locations_scale_to_the_frame() {
        let (overlay, _pending) = sampling_overlay();
        assert_eq!(
            overlay.frame_location(Point::new(Px::new(3), Px::new(1))),
            Some(Point::new(6., 2.))
        );
        assert_eq!(
            overlay.frame_location(Point::new(Px::new(-1), Px::new(0))),
            Some(Point::new(-2., 0.))
        );
    }

    #[test]
    fn primary_click_picks_the_scaled_pixel() {
        let (overlay, pending) = sampling_overlay();
        assert!(!overlay.finish(Point::new(Px::new(1), Px::new(1)), MouseButton::Middle));
        assert!(overlay.scope.is_sampling());

        assert!(overlay.finish(Point::new(Px::new(2), Px::new(1)), MouseButton::Left));
        assert_eq!(pending.wait(), Some(Color::new(4, 2, 0, 255)));
        assert!(!overlay.scope.is_sampling());
        assert_eq!(overlay.frame_location(Point::new(Px::new(1), Px::new(1))), None);
    }

    #[test]
    fn secondary_click_cancels() {
        let (overlay, pending) = sampling_overlay();
        assert!(overlay.finish(Point::new(Px::new(2), Px::new(1)), MouseButton::Right));
        assert_eq!(pending.wait(), None);
        assert!(!overlay.scope.is_sampling());
    }
}
