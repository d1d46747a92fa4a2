//! Time decomposition and clocks used by [`CountdownTimer`](crate::CountdownTimer).

use std::fmt::{self, Debug, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// English messages for every [`TimeUnit::localization_key`], in Fluent
/// syntax.
///
/// Add these to an application's localizations for the `en-US` locale so that
/// countdowns without explicit labels display abbreviations, then provide
/// translations of the same keys for other locales.
pub const COUNTDOWN_LOCALIZATION: &str = "\
countdown-days-abbrev = d
countdown-hours-abbrev = h
countdown-minutes-abbrev = m
countdown-seconds-abbrev = s
";

/// A unit displayed by a countdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    /// Whole days.
    Days,
    /// Hours, either within the current day or in total.
    Hours,
    /// Minutes within the current hour.
    Minutes,
    /// Seconds within the current minute.
    Seconds,
}

impl TimeUnit {
    /// All units, from largest to smallest.
    pub const ALL: [Self; 4] = [Self::Days, Self::Hours, Self::Minutes, Self::Seconds];

    /// Returns the abbreviation used when formatting text without a label or
    /// a localization.
    #[must_use]
    pub const fn default_abbreviation(self) -> &'static str {
        match self {
            TimeUnit::Days => "d",
            TimeUnit::Hours => "h",
            TimeUnit::Minutes => "m",
            TimeUnit::Seconds => "s",
        }
    }

    /// Returns the key of the localized message displayed when no label has
    /// been provided.
    ///
    /// [`COUNTDOWN_LOCALIZATION`] defines every key in English.
    #[must_use]
    pub const fn localization_key(self) -> &'static str {
        match self {
            TimeUnit::Days => "countdown-days-abbrev",
            TimeUnit::Hours => "countdown-hours-abbrev",
            TimeUnit::Minutes => "countdown-minutes-abbrev",
            TimeUnit::Seconds => "countdown-seconds-abbrev",
        }
    }

    /// Returns the units that are displayed, largest first.
    ///
    /// [`TimeUnit::Days`] is only included when `show_days` is true.
    pub fn visible(show_days: bool) -> impl Iterator<Item = TimeUnit> {
        Self::ALL
            .into_iter()
            .filter(move |unit| show_days || *unit != TimeUnit::Days)
    }
}

/// A duration broken down into days, hours, minutes, and seconds.
///
/// When days are not shown, `days` is always zero and `hours` holds the total
/// number of whole hours, which may exceed 23.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeComponents {
    /// Whole days remaining.
    pub days: u64,
    /// Whole hours remaining after removing `days`.
    pub hours: u64,
    /// Whole minutes within the current hour.
    pub minutes: u64,
    /// Whole seconds within the current minute.
    pub seconds: u64,
}

impl TimeComponents {
    /// Breaks `remaining` into its components, truncating any fractional
    /// second.
    #[must_use]
    pub const fn from_remaining(remaining: Duration, show_days: bool) -> Self {
        let total = remaining.as_secs();
        let (days, hours) = if show_days {
            (
                total / SECONDS_PER_DAY,
                (total / SECONDS_PER_HOUR) % 24,
            )
        } else {
            (0, total / SECONDS_PER_HOUR)
        };
        Self {
            days,
            hours,
            minutes: (total / SECONDS_PER_MINUTE) % 60,
            seconds: total % 60,
        }
    }

    /// Returns the number of seconds these components represent.
    #[must_use]
    pub const fn total_seconds(&self) -> u64 {
        self.days * SECONDS_PER_DAY
            + self.hours * SECONDS_PER_HOUR
            + self.minutes * SECONDS_PER_MINUTE
            + self.seconds
    }

    /// Returns true if no time remains.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total_seconds() == 0
    }

    /// Returns the value of `unit`.
    #[must_use]
    pub const fn value(&self, unit: TimeUnit) -> u64 {
        match unit {
            TimeUnit::Days => self.days,
            TimeUnit::Hours => self.hours,
            TimeUnit::Minutes => self.minutes,
            TimeUnit::Seconds => self.seconds,
        }
    }

    /// Returns the value of `unit` left-padded with zeroes to two digits.
    #[must_use]
    pub fn padded(&self, unit: TimeUnit) -> String {
        format!("{:02}", self.value(unit))
    }

    /// Formats these components as a single line, e.g. `3d 5h 30m 45s`.
    ///
    /// The day token is omitted when `show_days` is false.
    #[must_use]
    pub fn inline(&self, labels: &UnitLabels, show_days: bool) -> String {
        let mut line = String::new();
        for unit in TimeUnit::visible(show_days) {
            if !line.is_empty() {
                line.push(' ');
            }
            // Writing to a String is infallible.
            let _ = write!(line, "{}{}", self.value(unit), labels.label(unit));
        }
        line
    }

    /// Returns one [`UnitCell`] per visible unit, with zero-padded values.
    #[must_use]
    pub fn block(&self, labels: &UnitLabels, show_days: bool) -> Vec<UnitCell> {
        TimeUnit::visible(show_days)
            .map(|unit| UnitCell {
                unit,
                label: labels.label(unit).to_string(),
                value: self.padded(unit),
            })
            .collect()
    }
}

impl fmt::Display for TimeComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inline(&UnitLabels::default(), self.days > 0))
    }
}

/// A single labeled value of a block-mode countdown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnitCell {
    /// The unit this cell displays.
    pub unit: TimeUnit,
    /// The resolved label.
    pub label: String,
    /// The zero-padded value.
    pub value: String,
}

/// Labels displayed next to each countdown value.
///
/// Widgets display the localized message at [`TimeUnit::localization_key`]
/// for any label left as `None`. Plain-text formatting falls back to
/// [`TimeUnit::default_abbreviation`] instead.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitLabels {
    /// The label for days.
    pub days: Option<String>,
    /// The label for hours.
    pub hours: Option<String>,
    /// The label for minutes.
    pub minutes: Option<String>,
    /// The label for seconds.
    pub seconds: Option<String>,
}

impl UnitLabels {
    /// Returns the label provided for `unit`, if any.
    #[must_use]
    pub fn get(&self, unit: TimeUnit) -> Option<&str> {
        match unit {
            TimeUnit::Days => self.days.as_deref(),
            TimeUnit::Hours => self.hours.as_deref(),
            TimeUnit::Minutes => self.minutes.as_deref(),
            TimeUnit::Seconds => self.seconds.as_deref(),
        }
    }

    /// Returns the label to display for `unit` in plain text.
    #[must_use]
    pub fn label(&self, unit: TimeUnit) -> &str {
        self.get(unit)
            .unwrap_or_else(|| unit.default_abbreviation())
    }

    /// Replaces the label for `unit`.
    pub fn set(&mut self, unit: TimeUnit, label: impl Into<String>) {
        let slot = match unit {
            TimeUnit::Days => &mut self.days,
            TimeUnit::Hours => &mut self.hours,
            TimeUnit::Minutes => &mut self.minutes,
            TimeUnit::Seconds => &mut self.seconds,
        };
        *slot = Some(label.into());
    }

    /// Replaces the label for `unit` and returns self.
    #[must_use]
    pub fn with(mut self, unit: TimeUnit, label: impl Into<String>) -> Self {
        self.set(unit, label);
        self
    }
}

/// Returns the time between `now` and `target`, or zero if `target` has
/// passed.
#[must_use]
pub fn remaining_until(target: SystemTime, now: SystemTime) -> Duration {
    target.duration_since(now).unwrap_or(Duration::ZERO)
}

/// A source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> SystemTime;
}

/// A [`Clock`] that reads [`SystemTime::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A [`Clock`] that only changes when told to.
///
/// Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<SystemTime>>);

impl ManualClock {
    /// Returns a clock frozen at `now`.
    #[must_use]
    pub fn new(now: SystemTime) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    /// Sets the current time.
    pub fn set(&self, now: SystemTime) {
        *self.0.lock() = now;
    }

    /// Moves the current time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.0.lock();
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{TimeComponents, TimeUnit, UnitLabels, COUNTDOWN_LOCALIZATION};

    const SAMPLE: Duration = Duration::from_secs(3 * 86_400 + 5 * 3_600 + 30 * 60 + 45);

    #[test]
    fn decomposes_with_days() {
        let components = TimeComponents::from_remaining(SAMPLE, true);
        assert_eq!(
            components,
            TimeComponents {
                days: 3,
                hours: 5,
                minutes: 30,
                seconds: 45,
            }
        );
        assert_eq!(components.inline(&UnitLabels::default(), true), "3d 5h 30m 45s");
    }

    #[test]
    fn folds_days_into_hours() {
        let components = TimeComponents::from_remaining(SAMPLE, false);
        assert_eq!(components.days, 0);
        assert_eq!(components.hours, 77);
        assert_eq!(components.inline(&UnitLabels::default(), false), "77h 30m 45s");
    }

    #[test]
    fn truncates_fractional_seconds() {
        let components = TimeComponents::from_remaining(Duration::from_millis(59_999), true);
        assert_eq!(components.seconds, 59);
        assert_eq!(components.minutes, 0);
    }

    #[test]
    fn block_cells_are_padded() {
        let labels = UnitLabels::default().with(TimeUnit::Days, " days");
        let cells = TimeComponents::from_remaining(SAMPLE, true).block(&labels, true);
        let rendered = cells
            .iter()
            .map(|cell| (cell.label.as_str(), cell.value.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            rendered,
            [(" days", "03"), ("h", "05"), ("m", "30"), ("s", "45")]
        );

        let cells = TimeComponents::from_remaining(SAMPLE, false).block(&labels, false);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].unit, TimeUnit::Hours);
        assert_eq!(cells[0].value, "77");
    }

    #[test]
    fn custom_labels() {
        let labels = UnitLabels {
            hours: Some(" hrs".into()),
            ..UnitLabels::default()
        };
        assert_eq!(labels.label(TimeUnit::Hours), " hrs");
        assert_eq!(labels.label(TimeUnit::Minutes), "m");
        assert_eq!(labels.get(TimeUnit::Minutes), None);
    }

    #[test]
    fn localization_defines_every_unit() {
        for unit in TimeUnit::ALL {
            let message = format!(
                "{} = {}",
                unit.localization_key(),
                unit.default_abbreviation()
            );
            assert!(
                COUNTDOWN_LOCALIZATION.lines().any(|line| line == message),
                "missing {message}"
            );
        }
    }

    proptest::proptest! {
        /// The components never exceed the duration and lose less than a second.
        #[test]
        fn truncates_to_whole_seconds(secs in 0u64..=10_000_000_000, nanos in 0u32..1_000_000_000) {
            let remaining = Duration::new(secs, nanos);
            let components = TimeComponents::from_remaining(remaining, true);
            let total = Duration::from_secs(components.total_seconds());
            assert!(total <= remaining);
            assert!(remaining < total + Duration::from_secs(1));
            assert!(components.hours < 24);
            assert!(components.minutes < 60);
            assert!(components.seconds < 60);
        }

        /// Without days, whole days are carried by the hours.
        #[test]
        fn hidden_days_fold_into_hours(secs in 0u64..=10_000_000_000) {
            let remaining = Duration::from_secs(secs);
            let with_days = TimeComponents::from_remaining(remaining, true);
            let without_days = TimeComponents::from_remaining(remaining, false);
            assert_eq!(without_days.days, 0);
            assert_eq!(without_days.hours, with_days.days * 24 + with_days.hours);
            assert_eq!(without_days.minutes, with_days.minutes);
            assert_eq!(without_days.seconds, with_days.seconds);
            assert_eq!(without_days.total_seconds(), secs);
        }
    }
}
