use core::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::series::MAX_REGRESSION_WINDOW;

/// Which signal(s) the stroke phase detector trusts for the Drive→Recovery
/// decision. Resolved once at startup, branched on per sample.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeDetection {
    Torque,
    Slope,
    /// Both the torque and the slope condition must hold.
    Both,
}

/// Everything the engine needs to know about one rower, assembled once at
/// startup by the persisted-settings collaborator. Times are in
/// microseconds, geometry in SI units.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RowerProfile {
    // hardware geometry
    pub impulses_per_revolution: u8,
    /// kg·m²
    pub flywheel_inertia: f64,
    /// meters
    pub sprocket_radius_m: f64,

    // sensor signal filter
    pub rotation_debounce_us: u64,
    pub stopped_threshold_us: u64,

    // drag factor filter
    pub goodness_of_fit_threshold: f64,
    pub max_drag_recovery_us: u64,
    /// N·m·s²
    pub lower_drag_factor: f64,
    pub upper_drag_factor: f64,
    pub drag_fit_window: usize,

    // stroke phase detection
    pub stroke_detection: StrokeDetection,
    /// N·m
    pub minimum_powered_torque: f64,
    pub minimum_drag_torque: f64,
    /// Delta-time slope above which the flywheel counts as unpowered in
    /// slope detection.
    pub minimum_recovery_slope: f64,
    pub minimum_recovery_us: u64,
    pub minimum_drive_us: u64,
    pub impulse_data_window: usize,
}

impl RowerProfile {
    /// 2π / impulses per revolution, in radians.
    pub fn angular_displacement_per_impulse(&self) -> f64 {
        2.0 * PI / self.impulses_per_revolution as f64
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.impulses_per_revolution == 0 {
            return Err(ProfileError::ImpulsesPerRevolutionZero);
        }
        if !(self.flywheel_inertia > 0.0) || !self.flywheel_inertia.is_finite() {
            return Err(ProfileError::InertiaOutOfRange);
        }
        if !(self.sprocket_radius_m > 0.0) || !self.sprocket_radius_m.is_finite() {
            return Err(ProfileError::SprocketRadiusOutOfRange);
        }
        if self.impulse_data_window < 1
            || self.impulse_data_window > MAX_REGRESSION_WINDOW
            || self.drag_fit_window < 1
            || self.drag_fit_window > MAX_REGRESSION_WINDOW
        {
            return Err(ProfileError::WindowLengthOutOfRange);
        }
        if self.lower_drag_factor >= self.upper_drag_factor {
            return Err(ProfileError::DragBoundsInverted);
        }
        if self.rotation_debounce_us >= self.stopped_threshold_us {
            return Err(ProfileError::DebounceExceedsStoppedThreshold);
        }
        Ok(())
    }
}

impl Default for RowerProfile {
    /// The Old Danube air rower this engine was calibrated against.
    fn default() -> Self {
        Self {
            impulses_per_revolution: 2,
            flywheel_inertia: 0.087310454 / 3.0,
            sprocket_radius_m: 0.032,
            rotation_debounce_us: 7_000,
            stopped_threshold_us: 7_000_000,
            goodness_of_fit_threshold: 0.752,
            max_drag_recovery_us: 5_000_000,
            lower_drag_factor: 10.0e-6,
            upper_drag_factor: 200.0e-6,
            drag_fit_window: 7,
            stroke_detection: StrokeDetection::Slope,
            minimum_powered_torque: 0.186,
            minimum_drag_torque: 0.397,
            minimum_recovery_slope: 0.0,
            minimum_recovery_us: 145_000,
            minimum_drive_us: 170_000,
            impulse_data_window: 5,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileError {
    ImpulsesPerRevolutionZero,
    InertiaOutOfRange,
    SprocketRadiusOutOfRange,
    WindowLengthOutOfRange,
    DragBoundsInverted,
    DebounceExceedsStoppedThreshold,
}
