//! A widget that counts down to an instant.

use std::time::{Duration, SystemTime};

use cushy::context::{EventContext, GraphicsContext, LayoutContext};
use cushy::figures::units::{Lp, Px};
use cushy::figures::Zero;
use cushy::figures::Size;
use cushy::kludgine::Color;
use cushy::localization::Localize;
use cushy::reactive::value::{Destination, Dynamic, IntoValue, Source, Value};
use cushy::styles::components::{TextColor, TextSize};
use cushy::styles::{Dimension, DynamicComponent, FlexibleDimension};
use cushy::widget::{MakeWidget, WidgetInstance, WidgetList, WidgetRef, WrapperWidget};
use cushy::widgets::Label;
use cushy::ConstraintLimit;

use crate::countdown::CountdownTimer;
use crate::time::{Clock, TimeComponents, TimeUnit, UnitLabels};

/// How a [`Countdown`] arranges its values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CountdownLayout {
    /// A single line of text, e.g. `3d 5h 30m 45s`.
    #[default]
    Inline,
    /// A row of units, each displaying a zero-padded value above its label.
    Block,
}

/// A widget that displays the time remaining until a target instant.
///
/// The countdown starts when the widget is mounted and stops when it is
/// unmounted. Text sizes, colors, and spacing fall back to the
/// `Countdown*` style components when not set on the instance.
///
/// Units without a label display the localized message at
/// [`TimeUnit::localization_key`]. [`COUNTDOWN_LOCALIZATION`] provides the
/// English abbreviations.
///
/// [`COUNTDOWN_LOCALIZATION`]: crate::COUNTDOWN_LOCALIZATION
#[derive(Debug)]
#[must_use]
pub struct Countdown {
    timer: CountdownTimer,
    labels: UnitLabels,
    layout: CountdownLayout,
    number_size: Option<Value<Dimension>>,
    number_color: Option<Value<Color>>,
    label_size: Option<Value<Dimension>>,
    label_color: Option<Value<Color>>,
    unit_spacing: Option<Value<Dimension>>,
    label_spacing: Option<Value<Dimension>>,
}

impl Countdown {
    /// Returns a countdown to `target`.
    ///
    /// If `target` is a [`Dynamic`], the countdown restarts whenever it
    /// changes.
    pub fn new(target: impl IntoValue<SystemTime>) -> Self {
        Self::from_timer(CountdownTimer::new(target))
    }

    /// Returns a countdown displaying an existing timer.
    pub fn from_timer(timer: CountdownTimer) -> Self {
        Self {
            timer,
            labels: UnitLabels::default(),
            layout: CountdownLayout::default(),
            number_size: None,
            number_color: None,
            label_size: None,
            label_color: None,
            unit_spacing: None,
            label_spacing: None,
        }
    }

    /// Sets whether days are displayed separately from hours.
    ///
    /// When false, whole days are folded into the hours.
    pub fn show_days(mut self, show_days: bool) -> Self {
        self.timer = self.timer.show_days(show_days);
        self
    }

    /// Replaces all unit labels.
    pub fn labels(mut self, labels: UnitLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the label displayed for `unit`.
    pub fn label(mut self, unit: TimeUnit, label: impl Into<String>) -> Self {
        self.labels.set(unit, label);
        self
    }

    /// Sets the label displayed for days.
    pub fn days_label(self, label: impl Into<String>) -> Self {
        self.label(TimeUnit::Days, label)
    }

    /// Sets the label displayed for hours.
    pub fn hours_label(self, label: impl Into<String>) -> Self {
        self.label(TimeUnit::Hours, label)
    }

    /// Sets the label displayed for minutes.
    pub fn minutes_label(self, label: impl Into<String>) -> Self {
        self.label(TimeUnit::Minutes, label)
    }

    /// Sets the label displayed for seconds.
    pub fn seconds_label(self, label: impl Into<String>) -> Self {
        self.label(TimeUnit::Seconds, label)
    }

    /// Sets how the values are arranged.
    pub fn layout(mut self, layout: CountdownLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Displays the countdown as a single line of text.
    pub fn inline(self) -> Self {
        self.layout(CountdownLayout::Inline)
    }

    /// Displays each unit's value above its label.
    pub fn block(self) -> Self {
        self.layout(CountdownLayout::Block)
    }

    /// Sets the text size of the values.
    pub fn number_text_size(mut self, size: impl IntoValue<Dimension>) -> Self {
        self.number_size = Some(size.into_value());
        self
    }

    /// Sets the color of the values.
    pub fn number_color(mut self, color: impl IntoValue<Color>) -> Self {
        self.number_color = Some(color.into_value());
        self
    }

    /// Sets the text size of the unit labels.
    pub fn label_text_size(mut self, size: impl IntoValue<Dimension>) -> Self {
        self.label_size = Some(size.into_value());
        self
    }

    /// Sets the color of the unit labels.
    pub fn label_color(mut self, color: impl IntoValue<Color>) -> Self {
        self.label_color = Some(color.into_value());
        self
    }

    /// Sets the space between units.
    pub fn unit_spacing(mut self, spacing: impl IntoValue<Dimension>) -> Self {
        self.unit_spacing = Some(spacing.into_value());
        self
    }

    /// Sets the space between a value and its label in block mode.
    ///
    /// Inline values are always followed directly by their labels.
    pub fn label_spacing(mut self, spacing: impl IntoValue<Dimension>) -> Self {
        self.label_spacing = Some(spacing.into_value());
        self
    }

    /// Invokes `on_complete` when the countdown reaches its target.
    pub fn on_complete<F>(mut self, on_complete: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.timer = self.timer.on_complete(on_complete);
        self
    }

    /// Sets the interval between updates.
    pub fn tick_every(mut self, period: Duration) -> Self {
        self.timer = self.timer.tick_every(period);
        self
    }

    /// Sets the clock used to read the current time.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.timer = self.timer.clock(clock);
        self
    }

    /// Returns the displayed components, updated every tick.
    #[must_use]
    pub fn components(&self) -> Dynamic<TimeComponents> {
        self.timer.components()
    }

    /// Returns the remaining time, updated every tick.
    #[must_use]
    pub fn remaining(&self) -> Dynamic<Duration> {
        self.timer.remaining()
    }

    /// Returns the configured layout.
    #[must_use]
    pub const fn current_layout(&self) -> CountdownLayout {
        self.layout
    }

    fn number(&self, text: Dynamic<String>) -> WidgetInstance {
        styled_text(
            Label::new(text),
            self.number_size.as_ref(),
            CountdownNumberSize,
            self.number_color.as_ref(),
            CountdownNumberColor,
        )
    }

    /// Returns the label for `unit`, localized when none has been provided.
    fn unit_label(&self, unit: TimeUnit) -> WidgetInstance {
        let label = match self.labels.get(unit) {
            Some(label) => Label::new(label.to_string()).make_widget(),
            None => Localize::new(unit.localization_key())
                .into_label()
                .make_widget(),
        };
        styled_text(
            label,
            self.label_size.as_ref(),
            CountdownLabelSize,
            self.label_color.as_ref(),
            CountdownLabelColor,
        )
    }
}

fn styled_text(
    text: impl MakeWidget,
    size: Option<&Value<Dimension>>,
    theme_size: impl Into<DynamicComponent>,
    color: Option<&Value<Color>>,
    theme_color: impl Into<DynamicComponent>,
) -> WidgetInstance {
    let text = match size {
        Some(size) => text.with(&TextSize, size.clone()),
        None => text.with_dynamic(&TextSize, theme_size),
    };
    match color {
        Some(color) => text.with(&TextColor, color.clone()),
        None => text.with_dynamic(&TextColor, theme_color),
    }
    .make_widget()
}

/// A gutter that is either set on the instance or probed from the theme.
#[derive(Debug)]
enum Spacing {
    Fixed(Value<Dimension>),
    Themed(Dynamic<FlexibleDimension>),
}

impl Spacing {
    fn new(spacing: Option<Value<Dimension>>) -> Self {
        match spacing {
            Some(spacing) => Self::Fixed(spacing),
            None => Self::Themed(Dynamic::new(FlexibleDimension::Auto)),
        }
    }

    fn gutter(&self) -> Value<FlexibleDimension> {
        match self {
            Spacing::Fixed(spacing) => spacing.map_each(|spacing| FlexibleDimension::Dimension(*spacing)),
            Spacing::Themed(probed) => Value::Dynamic(probed.clone()),
        }
    }

    fn probe(&self, theme_value: impl FnOnce() -> Dimension) {
        if let Spacing::Themed(probed) = self {
            probed.set(FlexibleDimension::Dimension(theme_value()));
        }
    }
}

impl MakeWidget for Countdown {
    fn make_widget(self) -> WidgetInstance {
        let components = self.timer.components();
        let show_days = self.timer.shows_days();
        let unit_spacing = Spacing::new(self.unit_spacing.clone());
        let label_spacing = Spacing::new(self.label_spacing.clone());

        let units = TimeUnit::visible(show_days)
            .map(|unit| match self.layout {
                CountdownLayout::Inline => self
                    .number(components.map_each(move |components| {
                        components.value(unit).to_string()
                    }))
                    .and(self.unit_label(unit))
                    .into_columns()
                    .gutter(FlexibleDimension::Dimension(Dimension::Px(Px::ZERO)))
                    .make_widget(),
                CountdownLayout::Block => self
                    .number(components.map_each(move |components| components.padded(unit)))
                    .and(self.unit_label(unit))
                    .into_rows()
                    .gutter(label_spacing.gutter())
                    .make_widget(),
            })
            .collect::<WidgetList>();
        let body = units
            .into_columns()
            .gutter(unit_spacing.gutter())
            .make_widget();

        CountdownView {
            timer: self.timer,
            unit_spacing,
            label_spacing,
            child: WidgetRef::new(body),
        }
        .make_widget()
    }
}

/// Owns the running timer for the lifetime of the mounted widget.
#[derive(Debug)]
struct CountdownView {
    timer: CountdownTimer,
    unit_spacing: Spacing,
    label_spacing: Spacing,
    child: WidgetRef,
}

impl WrapperWidget for CountdownView {
    fn child_mut(&mut self) -> &mut WidgetRef {
        &mut self.child
    }

    fn adjust_child_constraints(
        &mut self,
        available_space: Size<ConstraintLimit>,
        context: &mut LayoutContext<'_, '_, '_, '_>,
    ) -> Size<ConstraintLimit> {
        self.unit_spacing
            .probe(|| context.get(&CountdownUnitSpacing));
        self.label_spacing
            .probe(|| context.get(&CountdownLabelSpacing));
        available_space
    }

    fn redraw_foreground(&mut self, context: &mut GraphicsContext<'_, '_, '_, '_>) {
        self.unit_spacing
            .probe(|| context.get(&CountdownUnitSpacing));
        self.label_spacing
            .probe(|| context.get(&CountdownLabelSpacing));
    }

    fn mounted(&mut self, _context: &mut EventContext<'_>) {
        self.timer.start();
    }

    fn unmounted(&mut self, _context: &mut EventContext<'_>) {
        self.timer.teardown();
    }
}

cushy::define_components! {
    Countdown {
        /// The space between the units of a [`Countdown`].
        CountdownUnitSpacing(Dimension, "unit_spacing", Dimension::Lp(Lp::points(12)))
        /// The space between a value and its label in a block [`Countdown`].
        CountdownLabelSpacing(Dimension, "label_spacing", Dimension::Lp(Lp::points(2)))
        /// The text size of a [`Countdown`]'s values.
        CountdownNumberSize(Dimension, "number_size", @TextSize)
        /// The color of a [`Countdown`]'s values.
        CountdownNumberColor(Color, "number_color", @TextColor)
        /// The text size of a [`Countdown`]'s unit labels.
        CountdownLabelSize(Dimension, "label_size", @TextSize)
        /// The color of a [`Countdown`]'s unit labels.
        CountdownLabelColor(Color, "label_color", @TextColor)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use cushy::reactive::value::Source;
    use cushy::widget::MakeWidget;

    use super::{Countdown, CountdownLayout};
    use crate::time::{ManualClock, TimeUnit};

    #[test]
    fn builder_configures_timer() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let countdown = Countdown::new(now + Duration::from_secs(90_061))
            .clock(ManualClock::new(now))
            .show_days(false)
            .block();
        assert_eq!(countdown.current_layout(), CountdownLayout::Block);
        let components = countdown.components().get();
        assert_eq!(components.days, 0);
        assert_eq!(components.hours, 25);
        assert_eq!(components.minutes, 1);
        assert_eq!(components.seconds, 1);
        assert_eq!(countdown.remaining().get(), Duration::from_secs(90_061));
    }

    #[test]
    fn both_layouts_build_with_partial_labels() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        for layout in [CountdownLayout::Inline, CountdownLayout::Block] {
            let countdown = Countdown::new(now + Duration::from_secs(90))
                .clock(ManualClock::new(now))
                .label(TimeUnit::Minutes, " min")
                .label_color(cushy::kludgine::Color::RED)
                .layout(layout);
            assert_eq!(countdown.current_layout(), layout);
            let remaining = countdown.remaining();
            let _widget = countdown.make_widget();
            assert_eq!(remaining.get(), Duration::from_secs(90));
        }
    }
}
