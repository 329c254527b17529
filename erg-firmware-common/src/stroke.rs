use serde::{Deserialize, Serialize};

use crate::config::{RowerProfile, StrokeDetection};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokePhase {
    Drive,
    Recovery,
}

/// An accepted phase transition, carrying the completed phase's duration.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeEvent {
    DriveStarted { recovery_duration_us: u64 },
    RecoveryStarted { drive_duration_us: u64 },
}

/// Two-state Drive/Recovery machine driven by torque and the delta-time
/// slope, with minimum-duration guards against noise-induced flicker. The
/// guards are hard gates: a transition is rejected outright while the
/// current phase is younger than its configured minimum.
pub struct StrokePhaseDetector {
    detection: StrokeDetection,
    minimum_powered_torque: f64,
    minimum_drag_torque: f64,
    minimum_recovery_slope: f64,
    minimum_drive_us: u64,
    minimum_recovery_us: u64,

    phase: StrokePhase,
    phase_entered_at_us: u64,
}

impl StrokePhaseDetector {
    pub fn new(profile: &RowerProfile) -> Self {
        Self {
            detection: profile.stroke_detection,
            minimum_powered_torque: profile.minimum_powered_torque,
            minimum_drag_torque: profile.minimum_drag_torque,
            minimum_recovery_slope: profile.minimum_recovery_slope,
            minimum_drive_us: profile.minimum_drive_us,
            minimum_recovery_us: profile.minimum_recovery_us,
            phase: StrokePhase::Recovery,
            phase_entered_at_us: 0,
        }
    }

    pub fn phase(&self) -> StrokePhase {
        self.phase
    }

    pub fn phase_elapsed_us(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.phase_entered_at_us)
    }

    /// `delta_time_slope` is the Theil–Sen slope of the recent delta times;
    /// `None` while that window is not yet saturated, which suppresses all
    /// transitions.
    pub fn update(
        &mut self,
        torque: f64,
        delta_time_slope: Option<f64>,
        now_us: u64,
    ) -> Option<StrokeEvent> {
        let slope = delta_time_slope?;
        let elapsed = self.phase_elapsed_us(now_us);

        match self.phase {
            StrokePhase::Recovery => {
                if elapsed >= self.minimum_recovery_us && self.is_powered(torque, slope) {
                    self.phase = StrokePhase::Drive;
                    self.phase_entered_at_us = now_us;
                    log_debug!("drive started, recovery lasted {} us", elapsed);
                    Some(StrokeEvent::DriveStarted {
                        recovery_duration_us: elapsed,
                    })
                } else {
                    None
                }
            }
            StrokePhase::Drive => {
                if elapsed >= self.minimum_drive_us && self.is_unpowered(torque, slope) {
                    self.phase = StrokePhase::Recovery;
                    self.phase_entered_at_us = now_us;
                    log_debug!("recovery started, drive lasted {} us", elapsed);
                    Some(StrokeEvent::RecoveryStarted {
                        drive_duration_us: elapsed,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Unconditional Drive→Recovery, bypassing the minimum-duration gate.
    /// Used when the per-stroke handle-force buffer hits capacity, which is
    /// a resource limit rather than sensor noise.
    pub fn force_recovery(&mut self, now_us: u64) -> Option<StrokeEvent> {
        if self.phase != StrokePhase::Drive {
            return None;
        }
        let elapsed = self.phase_elapsed_us(now_us);
        self.phase = StrokePhase::Recovery;
        self.phase_entered_at_us = now_us;
        Some(StrokeEvent::RecoveryStarted {
            drive_duration_us: elapsed,
        })
    }

    /// Stopped fallback: back to Recovery with a fresh phase clock.
    pub fn reset(&mut self, now_us: u64) {
        self.phase = StrokePhase::Recovery;
        self.phase_entered_at_us = now_us;
    }

    /// Powered torque is applied and the impulses are speeding up.
    fn is_powered(&self, torque: f64, slope: f64) -> bool {
        torque > self.minimum_powered_torque && slope < 0.0
    }

    fn is_unpowered(&self, torque: f64, slope: f64) -> bool {
        let torque_says = torque < self.minimum_drag_torque && slope > 0.0;
        let slope_says = slope > self.minimum_recovery_slope;
        match self.detection {
            StrokeDetection::Torque => torque_says,
            StrokeDetection::Slope => slope_says,
            StrokeDetection::Both => torque_says && slope_says,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(detection: StrokeDetection) -> RowerProfile {
        RowerProfile {
            stroke_detection: detection,
            minimum_powered_torque: 0.1,
            minimum_drag_torque: 0.3,
            minimum_recovery_slope: 0.001,
            minimum_recovery_us: 145_000,
            minimum_drive_us: 170_000,
            ..RowerProfile::default()
        }
    }

    const POWERED_TORQUE: f64 = 5.0;
    const POWERED_SLOPE: f64 = -0.01;
    const COASTING_TORQUE: f64 = -0.5;
    const COASTING_SLOPE: f64 = 0.01;

    fn driving(detector: &mut StrokePhaseDetector, now_us: u64) -> Option<StrokeEvent> {
        detector.update(POWERED_TORQUE, Some(POWERED_SLOPE), now_us)
    }

    fn coasting(detector: &mut StrokePhaseDetector, now_us: u64) -> Option<StrokeEvent> {
        detector.update(COASTING_TORQUE, Some(COASTING_SLOPE), now_us)
    }

    /// Drives the detector into the Drive phase at `now_us`.
    fn enter_drive(detector: &mut StrokePhaseDetector, now_us: u64) {
        assert_eq!(
            driving(detector, now_us),
            Some(StrokeEvent::DriveStarted {
                recovery_duration_us: now_us
            })
        );
    }

    #[test]
    fn starts_in_recovery() {
        let detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        assert_eq!(detector.phase(), StrokePhase::Recovery);
    }

    #[test]
    fn no_transition_without_slope_window() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        assert_eq!(detector.update(POWERED_TORQUE, None, 1_000_000), None);
        assert_eq!(detector.phase(), StrokePhase::Recovery);
    }

    #[test]
    fn minimum_recovery_time_is_a_hard_gate() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        // fully powered, but recovery only 144.999 ms old
        assert_eq!(driving(&mut detector, 144_999), None);
        assert!(driving(&mut detector, 145_000).is_some());
        assert_eq!(detector.phase(), StrokePhase::Drive);
    }

    #[test]
    fn minimum_drive_time_is_a_hard_gate() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        enter_drive(&mut detector, 200_000);

        assert_eq!(coasting(&mut detector, 200_000 + 169_999), None);
        assert_eq!(
            coasting(&mut detector, 200_000 + 170_000),
            Some(StrokeEvent::RecoveryStarted {
                drive_duration_us: 170_000
            })
        );
        assert_eq!(detector.phase(), StrokePhase::Recovery);
    }

    #[test]
    fn weak_torque_does_not_start_drive() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        assert_eq!(detector.update(0.05, Some(POWERED_SLOPE), 1_000_000), None);
        // accelerating impulses required too
        assert_eq!(detector.update(POWERED_TORQUE, Some(0.01), 1_000_000), None);
    }

    #[test]
    fn torque_mode_needs_low_torque_and_rising_deltas() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Torque));
        enter_drive(&mut detector, 200_000);
        let late = 200_000 + 200_000;

        // torque still high
        assert_eq!(detector.update(1.0, Some(COASTING_SLOPE), late), None);
        // deltas still shrinking
        assert_eq!(detector.update(COASTING_TORQUE, Some(-0.01), late), None);
        assert!(detector.update(COASTING_TORQUE, Some(0.01), late).is_some());
    }

    #[test]
    fn slope_mode_ignores_torque() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Slope));
        enter_drive(&mut detector, 200_000);
        let late = 200_000 + 200_000;

        // slope below the recovery threshold
        assert_eq!(detector.update(1.0, Some(0.0005), late), None);
        // high torque is irrelevant in slope mode
        assert!(detector.update(1.0, Some(0.01), late).is_some());
    }

    #[test]
    fn both_mode_requires_both_conditions() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        enter_drive(&mut detector, 200_000);
        let late = 200_000 + 200_000;

        // slope condition alone is not enough
        assert_eq!(detector.update(1.0, Some(0.01), late), None);
        // torque condition alone is not enough: slope above zero but below
        // the recovery threshold
        assert_eq!(detector.update(COASTING_TORQUE, Some(0.0005), late), None);
        assert!(
            detector
                .update(COASTING_TORQUE, Some(COASTING_SLOPE), late)
                .is_some()
        );
    }

    #[test]
    fn force_recovery_bypasses_the_gate() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        assert_eq!(detector.force_recovery(100_000), None);

        enter_drive(&mut detector, 200_000);
        assert_eq!(
            detector.force_recovery(210_000),
            Some(StrokeEvent::RecoveryStarted {
                drive_duration_us: 10_000
            })
        );
    }

    #[test]
    fn reset_returns_to_recovery_with_fresh_clock() {
        let mut detector = StrokePhaseDetector::new(&profile(StrokeDetection::Both));
        enter_drive(&mut detector, 200_000);
        detector.reset(1_000_000);
        assert_eq!(detector.phase(), StrokePhase::Recovery);
        // minimum recovery time counts from the reset
        assert_eq!(driving(&mut detector, 1_000_000 + 144_999), None);
        assert!(driving(&mut detector, 1_000_000 + 145_000).is_some());
    }
}
