use serde::{Deserialize, Serialize};

use crate::config::RowerProfile;
use crate::impulse::Impulse;

/// Angular kinematics derived from one pair of consecutive accepted
/// impulses. Ephemeral, recomputed each impulse.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RotationSample {
    pub timestamp_us: u64,
    pub delta_us: u64,
    /// rad/s
    pub angular_velocity: f64,
    /// rad/s²
    pub angular_acceleration: f64,
    /// N·m, `inertia * angular_acceleration`
    pub torque: f64,
}

/// Turns consecutive impulses into rotation samples using the configured
/// flywheel geometry.
pub struct KinematicsDeriver {
    angular_displacement_per_impulse: f64,
    inertia: f64,
    prev_angular_velocity: Option<f64>,
}

impl KinematicsDeriver {
    pub fn new(profile: &RowerProfile) -> Self {
        Self {
            angular_displacement_per_impulse: profile.angular_displacement_per_impulse(),
            inertia: profile.flywheel_inertia,
            prev_angular_velocity: None,
        }
    }

    /// The first impulse after a reset yields no sample (no previous angular
    /// velocity to difference against). A zero delta time is dropped even
    /// though the debounce floor upstream should make it impossible.
    pub fn derive(&mut self, impulse: &Impulse) -> Option<RotationSample> {
        if impulse.delta_us == 0 {
            log_warn!("zero delta time reached kinematics, sample dropped");
            return None;
        }
        let delta_s = impulse.delta_us as f64 / 1e6;
        let angular_velocity = self.angular_displacement_per_impulse / delta_s;

        let Some(prev) = self.prev_angular_velocity.replace(angular_velocity) else {
            return None;
        };
        let angular_acceleration = (angular_velocity - prev) / delta_s;

        Some(RotationSample {
            timestamp_us: impulse.timestamp_us,
            delta_us: impulse.delta_us,
            angular_velocity,
            angular_acceleration,
            torque: self.inertia * angular_acceleration,
        })
    }

    pub fn reset(&mut self) {
        self.prev_angular_velocity = None;
    }
}
