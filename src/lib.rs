//! Countdown and eye-dropper widgets for [Cushy](cushy).
//!
//! - [`Countdown`](widgets::Countdown) displays the time remaining until an
//!   instant, driven by a [`CountdownTimer`].
//! - [`EyeDropper`](widgets::EyeDropper) lets descendants pick a color from
//!   its rendered contents through an [`EyeDropperScope`].
//!
//! The timer and the pick session are usable without any widgets, which is
//! how they are tested.
#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod countdown;
pub mod eye_dropper;
mod tick;
pub mod time;
pub mod widgets;

pub use self::countdown::{CountdownState, CountdownTimer, TickOutcome, DEFAULT_TICK_PERIOD};
pub use self::eye_dropper::{
    CaptureError, CapturedFrame, ColorHistory, EyeDropperScope, FrameSource, PendingColor,
    PreviewSample, SessionPhase,
};
pub use self::tick::{Lifecycle, Ticker};
pub use self::time::{
    Clock, ManualClock, SystemClock, TimeComponents, TimeUnit, UnitLabels, COUNTDOWN_LOCALIZATION,
};
