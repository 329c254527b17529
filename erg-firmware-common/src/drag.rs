use serde::{Deserialize, Serialize};

use crate::config::RowerProfile;
use crate::regression::TheilSenEstimator;

/// Last accepted drag coefficient with the evidence that earned it.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DragFactorEstimate {
    /// N·m·s²
    pub drag_factor: f64,
    pub goodness_of_fit: f64,
    pub accepted_at_us: u64,
}

/// Estimates the drag coefficient from recovery-phase deceleration.
///
/// During recovery the flywheel slows under drag alone, so successive delta
/// times grow linearly with elapsed time and the slope of that line, scaled
/// by the flywheel inertia over the angular displacement per impulse, is the
/// drag factor. The fit is a Theil–Sen window so one noisy impulse cannot
/// move the estimate.
pub struct DragFactorEstimator {
    fit: TheilSenEstimator,
    inertia: f64,
    angular_displacement_per_impulse: f64,
    goodness_of_fit_threshold: f64,
    lower_bound: f64,
    upper_bound: f64,
    max_age_us: u64,
    estimate: Option<DragFactorEstimate>,
}

impl DragFactorEstimator {
    pub fn new(profile: &RowerProfile) -> Self {
        Self {
            fit: TheilSenEstimator::new(profile.drag_fit_window),
            inertia: profile.flywheel_inertia,
            angular_displacement_per_impulse: profile.angular_displacement_per_impulse(),
            goodness_of_fit_threshold: profile.goodness_of_fit_threshold,
            lower_bound: profile.lower_drag_factor,
            upper_bound: profile.upper_drag_factor,
            max_age_us: profile.max_drag_recovery_us,
            estimate: None,
        }
    }

    /// Recovery-phase impulses only: x is elapsed rowing time in seconds,
    /// y the inter-impulse delta time in seconds. Evaluates a candidate
    /// after every push once the window is saturated.
    pub fn push_recovery_sample(&mut self, elapsed_s: f64, delta_s: f64, now_us: u64) {
        self.fit.push(elapsed_s, delta_s);
        if !self.fit.is_saturated() {
            return;
        }
        let Some(slope) = self.fit.coefficient_b() else {
            return;
        };

        let goodness_of_fit = self.fit.goodness_of_fit();
        if goodness_of_fit < self.goodness_of_fit_threshold {
            log_trace!("drag candidate rejected, goodness of fit {}", goodness_of_fit);
            return;
        }

        let candidate = slope * self.inertia / self.angular_displacement_per_impulse;
        if candidate < self.lower_bound || candidate > self.upper_bound {
            log_debug!("drag candidate {} outside configured bounds", candidate);
            return;
        }

        self.estimate = Some(DragFactorEstimate {
            drag_factor: candidate,
            goodness_of_fit,
            accepted_at_us: now_us,
        });
    }

    /// The validated drag factor, or `None` when no candidate was ever
    /// accepted or the last one aged past the maximum recovery period.
    /// Downstream must treat `None` as unknown, never as zero.
    pub fn current(&self, now_us: u64) -> Option<f64> {
        let estimate = self.estimate.as_ref()?;
        if now_us.saturating_sub(estimate.accepted_at_us) > self.max_age_us {
            return None;
        }
        Some(estimate.drag_factor)
    }

    /// Last accepted estimate regardless of age, for diagnostics.
    pub fn last_estimate(&self) -> Option<&DragFactorEstimate> {
        self.estimate.as_ref()
    }

    /// Clears the fit window at phase boundaries so drive-phase points can
    /// never leak into the next recovery fit.
    pub fn reset_window(&mut self) {
        self.fit.reset();
    }

    /// Stopped fallback: the estimate itself is discarded.
    pub fn invalidate(&mut self) {
        self.estimate = None;
    }
}
