//! Widgets built on the countdown timer and eye-dropper session.

mod countdown;
mod eye_dropper;

pub use self::countdown::{
    Countdown, CountdownLabelColor, CountdownLabelSize, CountdownLabelSpacing, CountdownLayout,
    CountdownNumberColor, CountdownNumberSize, CountdownUnitSpacing,
};
pub use self::eye_dropper::{
    EyeDropper, EyeDropperBorderColor, EyeDropperCellSize, EyeDropperOutlineColor,
};
