// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod fmt;

pub mod config;
pub mod drag;
pub mod engine;
pub mod impulse;
pub mod kinematics;
pub mod metrics;
pub mod regression;
pub mod series;
pub mod settings;
pub mod stroke;

#[cfg(test)]
mod tests;

pub use config::{ProfileError, RowerProfile, StrokeDetection};
pub use engine::RowingEngine;
pub use impulse::{EdgeLatch, Impulse, ImpulseCapture, LatchedEdge};
pub use metrics::{MetricsPublisher, RowingMetrics};
pub use series::MAX_REGRESSION_WINDOW;
pub use stroke::StrokePhase;
