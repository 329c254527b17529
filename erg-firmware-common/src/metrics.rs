use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::RowerProfile;
use crate::impulse::Impulse;
use crate::stroke::StrokePhase;

/// Per-drive handle-force samples are capped; a drive that somehow produces
/// more impulses than this is cut short.
pub const MAX_HANDLE_FORCES: usize = 255;

/// Immutable snapshot of everything the transport collaborator broadcasts.
/// Replaced wholesale on every update, never mutated while a reader holds
/// a copy.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RowingMetrics {
    pub distance_m: f64,
    pub last_rev_time_us: u64,
    pub last_stroke_time_us: u64,
    pub stroke_count: u32,
    pub drive_duration_us: u64,
    pub recovery_duration_us: u64,
    pub avg_stroke_power_w: f64,
    /// `None` means unknown (no validated estimate), never zero.
    pub drag_factor: Option<f64>,
    /// Handle force per impulse of the just-completed drive, N.
    pub drive_handle_forces: Vec<f64, MAX_HANDLE_FORCES>,
}

/// Owns the current `RowingMetrics` and the in-progress per-stroke
/// accounting. Single writer: the main loop.
pub struct MetricsAggregator {
    current: RowingMetrics,
    distance_per_impulse_m: f64,
    angular_displacement_per_impulse: f64,
    sprocket_radius_m: f64,

    pending_handle_forces: Vec<f64, MAX_HANDLE_FORCES>,
    drive_angular_displacement: f64,
    recovery_angular_displacement: f64,
}

impl MetricsAggregator {
    pub fn new(profile: &RowerProfile) -> Self {
        let theta = profile.angular_displacement_per_impulse();
        Self {
            current: RowingMetrics::default(),
            distance_per_impulse_m: theta * profile.sprocket_radius_m,
            angular_displacement_per_impulse: theta,
            sprocket_radius_m: profile.sprocket_radius_m,
            pending_handle_forces: Vec::new(),
            drive_angular_displacement: 0.0,
            recovery_angular_displacement: 0.0,
        }
    }

    /// Every accepted impulse: advance distance and the revolution clock,
    /// and attribute the angular displacement to the current phase.
    pub fn on_impulse(&mut self, impulse: &Impulse, phase: StrokePhase) {
        self.current.distance_m += self.distance_per_impulse_m;
        self.current.last_rev_time_us = impulse.timestamp_us;
        match phase {
            StrokePhase::Drive => {
                self.drive_angular_displacement += self.angular_displacement_per_impulse;
            }
            StrokePhase::Recovery => {
                self.recovery_angular_displacement += self.angular_displacement_per_impulse;
            }
        }
    }

    /// Handle force for one drive impulse. Returns false when the buffer is
    /// full and the caller must end the drive.
    #[must_use]
    pub fn push_handle_force(&mut self, torque: f64) -> bool {
        self.pending_handle_forces
            .push(torque / self.sprocket_radius_m)
            .is_ok()
    }

    /// Recovery just completed. Computes average stroke power from the full
    /// stroke (previous drive plus this recovery) once a drag factor is
    /// known; with drag unknown the previous power figure is retained.
    pub fn on_drive_started(&mut self, recovery_duration_us: u64, drag_factor: Option<f64>) {
        self.current.recovery_duration_us = recovery_duration_us;
        self.current.drag_factor = drag_factor;

        let stroke_duration_us = self.current.drive_duration_us + recovery_duration_us;
        if let Some(drag) = drag_factor {
            if self.current.drive_duration_us > 0 && stroke_duration_us > 0 {
                let stroke_displacement =
                    self.drive_angular_displacement + self.recovery_angular_displacement;
                let mean_angular_velocity = stroke_displacement / (stroke_duration_us as f64 / 1e6);
                self.current.avg_stroke_power_w = drag * libm::pow(mean_angular_velocity, 3.0);
            }
        }

        // new stroke starts now
        self.drive_angular_displacement = 0.0;
        self.recovery_angular_displacement = 0.0;
    }

    /// Drive just completed: one full stroke counted, handle forces
    /// published.
    pub fn on_recovery_started(&mut self, drive_duration_us: u64, stroke_end_us: u64) {
        self.current.drive_duration_us = drive_duration_us;
        self.current.stroke_count += 1;
        self.current.last_stroke_time_us = stroke_end_us;
        self.current.drive_handle_forces = core::mem::take(&mut self.pending_handle_forces);
    }

    pub fn on_drag_update(&mut self, drag_factor: Option<f64>) {
        self.current.drag_factor = drag_factor;
    }

    /// Idle detected: per-stroke figures are cleared, cumulative totals
    /// survive.
    pub fn on_stopped(&mut self) {
        self.current.drive_duration_us = 0;
        self.current.avg_stroke_power_w = 0.0;
        self.current.drag_factor = None;
        self.pending_handle_forces.clear();
        self.drive_angular_displacement = 0.0;
        self.recovery_angular_displacement = 0.0;
    }

    pub fn current(&self) -> &RowingMetrics {
        &self.current
    }

    pub fn snapshot(&self) -> RowingMetrics {
        self.current.clone()
    }
}

/// Hands a `RowingMetrics` snapshot from the main loop to transport tasks.
/// Publish and read each happen inside one critical section, so a reader
/// can never observe a partially updated snapshot.
pub struct MetricsPublisher<M: RawMutex> {
    inner: BlockingMutex<M, RefCell<RowingMetrics>>,
}

impl<M: RawMutex> MetricsPublisher<M> {
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(RowingMetrics {
                distance_m: 0.0,
                last_rev_time_us: 0,
                last_stroke_time_us: 0,
                stroke_count: 0,
                drive_duration_us: 0,
                recovery_duration_us: 0,
                avg_stroke_power_w: 0.0,
                drag_factor: None,
                drive_handle_forces: Vec::new(),
            })),
        }
    }

    pub fn publish(&self, metrics: RowingMetrics) {
        self.inner.lock(|cell| {
            *cell.borrow_mut() = metrics;
        });
    }

    pub fn latest(&self) -> RowingMetrics {
        self.inner.lock(|cell| cell.borrow().clone())
    }
}

impl<M: RawMutex> Default for MetricsPublisher<M> {
    fn default() -> Self {
        Self::new()
    }
}
