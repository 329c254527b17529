use crate::config::{ProfileError, RowerProfile};
use crate::drag::DragFactorEstimator;
use crate::impulse::ImpulseCapture;
use crate::kinematics::KinematicsDeriver;
use crate::metrics::{MetricsAggregator, RowingMetrics};
use crate::regression::TheilSenEstimator;
use crate::stroke::{StrokeEvent, StrokePhase, StrokePhaseDetector};

/// The rowing-physics engine: debounced impulses in, rowing metrics out.
///
/// Purely reactive and single-writer: the main loop drains the `EdgeLatch`
/// and calls `on_raw_edge` per raw edge, plus `on_tick` once per scheduler
/// pass for idle detection. Nothing here blocks or suspends.
pub struct RowingEngine {
    capture: ImpulseCapture,
    deriver: KinematicsDeriver,
    /// (elapsed time s, delta time s) over the recent impulses; its slope
    /// drives stroke detection.
    delta_times: TheilSenEstimator,
    drag: DragFactorEstimator,
    detector: StrokePhaseDetector,
    aggregator: MetricsAggregator,
    last_delta_us: Option<u64>,
}

impl RowingEngine {
    pub fn new(profile: &RowerProfile) -> Result<Self, ProfileError> {
        profile.validate()?;
        Ok(Self {
            capture: ImpulseCapture::new(profile.rotation_debounce_us, profile.stopped_threshold_us),
            deriver: KinematicsDeriver::new(profile),
            delta_times: TheilSenEstimator::new(profile.impulse_data_window),
            drag: DragFactorEstimator::new(profile),
            detector: StrokePhaseDetector::new(profile),
            aggregator: MetricsAggregator::new(profile),
            last_delta_us: None,
        })
    }

    /// One raw rotation edge, already moved out of interrupt context.
    /// Returns the accepted impulse's delta time for the broadcast
    /// collaborator, or `None` when the edge was debounced away.
    pub fn on_raw_edge(&mut self, raw_timestamp_us: u64) -> Option<u64> {
        let impulse = self.capture.accept(raw_timestamp_us)?;
        self.last_delta_us = Some(impulse.delta_us);

        let elapsed_s = impulse.timestamp_us as f64 / 1e6;
        let delta_s = impulse.delta_us as f64 / 1e6;
        self.delta_times.push(elapsed_s, delta_s);
        self.aggregator.on_impulse(&impulse, self.detector.phase());

        if self.detector.phase() == StrokePhase::Recovery {
            self.drag
                .push_recovery_sample(elapsed_s, delta_s, impulse.timestamp_us);
            self.aggregator
                .on_drag_update(self.drag.current(impulse.timestamp_us));
        }

        if let Some(sample) = self.deriver.derive(&impulse) {
            let slope = if self.delta_times.is_saturated() {
                self.delta_times.coefficient_b()
            } else {
                None
            };

            match self.detector.update(sample.torque, slope, impulse.timestamp_us) {
                Some(StrokeEvent::DriveStarted {
                    recovery_duration_us,
                }) => {
                    self.aggregator.on_drive_started(
                        recovery_duration_us,
                        self.drag.current(impulse.timestamp_us),
                    );
                    self.drag.reset_window();
                }
                Some(StrokeEvent::RecoveryStarted { drive_duration_us }) => {
                    self.aggregator
                        .on_recovery_started(drive_duration_us, impulse.timestamp_us);
                }
                None => {}
            }

            if self.detector.phase() == StrokePhase::Drive
                && !self.aggregator.push_handle_force(sample.torque)
            {
                log_warn!("handle force buffer full, ending drive early");
                if let Some(StrokeEvent::RecoveryStarted { drive_duration_us }) =
                    self.detector.force_recovery(impulse.timestamp_us)
                {
                    self.aggregator
                        .on_recovery_started(drive_duration_us, impulse.timestamp_us);
                }
            }
        }

        Some(impulse.delta_us)
    }

    /// Cooperative-loop pass. Detects the rowing-stopped condition and
    /// resets phase and regression state to `{Recovery, empty}`; cumulative
    /// totals survive and the engine recovers as soon as signal resumes.
    pub fn on_tick(&mut self, now_us: u64) {
        if self.capture.is_stopped(now_us) {
            log_info!("rowing stopped, resetting phase and regression state");
            self.capture.reset();
            self.deriver.reset();
            self.delta_times.reset();
            self.drag.reset_window();
            self.drag.invalidate();
            self.detector.reset(now_us);
            self.aggregator.on_stopped();
            self.last_delta_us = None;
        }
    }

    /// Suspend impulse capture, e.g. during a firmware-update transfer.
    pub fn detach(&mut self) {
        self.capture.detach();
    }

    pub fn attach(&mut self) {
        self.capture.attach();
    }

    pub fn phase(&self) -> StrokePhase {
        self.detector.phase()
    }

    pub fn metrics(&self) -> &RowingMetrics {
        self.aggregator.current()
    }

    pub fn snapshot(&self) -> RowingMetrics {
        self.aggregator.snapshot()
    }

    /// Delta time of the most recent accepted impulse.
    pub fn last_delta_time_us(&self) -> Option<u64> {
        self.last_delta_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrokeDetection;
    use crate::tests::init_logger;

    /// Relaxed thresholds so short synthetic trains exercise every path.
    fn test_profile() -> RowerProfile {
        RowerProfile {
            impulses_per_revolution: 1,
            flywheel_inertia: 0.1,
            sprocket_radius_m: 0.05,
            rotation_debounce_us: 1_000,
            stopped_threshold_us: 2_000_000,
            goodness_of_fit_threshold: 0.5,
            max_drag_recovery_us: 10_000_000,
            lower_drag_factor: 1.0e-9,
            upper_drag_factor: 1.0,
            drag_fit_window: 3,
            stroke_detection: StrokeDetection::Torque,
            minimum_powered_torque: 0.01,
            minimum_drag_torque: 0.05,
            minimum_recovery_slope: 0.0,
            minimum_recovery_us: 50_000,
            minimum_drive_us: 50_000,
            impulse_data_window: 3,
        }
    }

    // Shrinking deltas: the flywheel accelerates under powered torque.
    const DRIVE_DELTAS: [u64; 6] = [50_000, 45_000, 40_000, 36_000, 32_000, 29_000];
    // Growing deltas: drag-only deceleration. Geometric growth keeps all
    // pairwise delta-time slopes identical, so the drag fit sees a clean
    // line.
    const RECOVERY_DELTAS: [u64; 5] = [30_000, 33_000, 36_300, 39_930, 43_923];
    const DRIVE2_DELTAS: [u64; 2] = [40_000, 36_000];

    fn feed(engine: &mut RowingEngine, mut ts: u64, deltas: &[u64]) -> u64 {
        for &delta in deltas {
            ts += delta;
            engine.on_raw_edge(ts);
            engine.on_tick(ts);
        }
        ts
    }

    /// Runs one full stroke plus the start of the next drive, returning the
    /// last edge timestamp.
    fn row_one_stroke(engine: &mut RowingEngine) -> u64 {
        engine.on_raw_edge(1_000_000); // baseline edge
        let ts = feed(engine, 1_000_000, &DRIVE_DELTAS);
        let ts = feed(engine, ts, &RECOVERY_DELTAS);
        feed(engine, ts, &DRIVE2_DELTAS)
    }

    #[test]
    fn full_stroke_produces_metrics() {
        init_logger();
        let mut engine = RowingEngine::new(&test_profile()).unwrap();
        row_one_stroke(&mut engine);

        let m = engine.metrics();
        assert_eq!(m.stroke_count, 1);
        assert!(m.distance_m > 0.0);
        assert!(m.drive_duration_us >= 50_000);
        assert!(m.recovery_duration_us >= 50_000);
        assert!(m.drag_factor.is_some());
        assert!(m.avg_stroke_power_w > 0.0);
        assert!(!m.drive_handle_forces.is_empty());
        assert_eq!(engine.phase(), StrokePhase::Drive);
        assert_eq!(engine.last_delta_time_us(), Some(36_000));
    }

    #[test]
    fn drag_factor_matches_recovery_deceleration() {
        init_logger();
        let mut engine = RowingEngine::new(&test_profile()).unwrap();
        row_one_stroke(&mut engine);

        // all pairwise recovery slopes are exactly 0.1/1.1 by construction
        let expected = (0.1 / 1.1) * 0.1 / core::f64::consts::TAU;
        let drag = engine.metrics().drag_factor.unwrap();
        approx::assert_relative_eq!(drag, expected, max_relative = 1e-9);
    }

    #[test]
    fn bounce_train_advances_nothing() {
        init_logger();
        let mut engine = RowingEngine::new(&test_profile()).unwrap();
        let mut ts = 1_000_000;
        engine.on_raw_edge(ts);
        for _ in 0..500 {
            ts += 500; // under the 1 ms debounce floor
            assert_eq!(engine.on_raw_edge(ts), None);
            engine.on_tick(ts);
        }

        let m = engine.metrics();
        assert_eq!(m.stroke_count, 0);
        assert_eq!(m.distance_m, 0.0);
        assert_eq!(engine.last_delta_time_us(), None);
    }

    #[test]
    fn impulse_gap_forces_recovery_and_invalidates_drag() {
        init_logger();
        let mut engine = RowingEngine::new(&test_profile()).unwrap();
        let ts = row_one_stroke(&mut engine);
        assert_eq!(engine.phase(), StrokePhase::Drive);
        assert!(engine.metrics().drag_factor.is_some());
        let distance = engine.metrics().distance_m;

        engine.on_tick(ts + 2_000_001);

        let m = engine.metrics();
        assert_eq!(engine.phase(), StrokePhase::Recovery);
        assert_eq!(m.drag_factor, None);
        assert_eq!(m.drive_duration_us, 0);
        assert_eq!(m.avg_stroke_power_w, 0.0);
        // cumulative totals survive idle detection
        assert_eq!(m.stroke_count, 1);
        assert_eq!(m.distance_m, distance);

        // the engine recovers as soon as valid signal resumes
        let resume = ts + 10_000_000;
        engine.on_raw_edge(resume);
        assert_eq!(engine.on_raw_edge(resume + 50_000), Some(50_000));
        assert!(engine.metrics().distance_m > distance);
    }

    #[test]
    fn same_input_twice_yields_identical_metrics() {
        init_logger();
        let mut a = RowingEngine::new(&test_profile()).unwrap();
        let mut b = RowingEngine::new(&test_profile()).unwrap();
        row_one_stroke(&mut a);
        row_one_stroke(&mut b);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn detached_engine_ignores_edges() {
        init_logger();
        let mut engine = RowingEngine::new(&test_profile()).unwrap();
        engine.detach();
        row_one_stroke(&mut engine);
        assert_eq!(engine.metrics(), &RowingMetrics::default());

        engine.attach();
        row_one_stroke(&mut engine);
        assert_eq!(engine.metrics().stroke_count, 1);
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut profile = test_profile();
        profile.impulse_data_window = 0;
        assert!(RowingEngine::new(&profile).is_err());
    }
}
