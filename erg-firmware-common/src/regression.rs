use heapless::Vec;

use crate::series::{MAX_REGRESSION_WINDOW, Series, median_in_place};

/// Number of distinct point pairs at the maximum window size.
const MAX_PAIR_COUNT: usize = MAX_REGRESSION_WINDOW * (MAX_REGRESSION_WINDOW - 1) / 2;

/// Bounded-window Theil–Sen regression over (x, y) sample pairs.
///
/// The slope is the median of all pairwise slopes, so a single noisy sample
/// cannot dominate the fit the way it would with ordinary least squares.
/// Rotation timing noise is impulsive, not Gaussian, which is why this
/// estimator sits under both the stroke detector and the drag fit.
pub struct TheilSenEstimator {
    x: Series,
    y: Series,
}

impl TheilSenEstimator {
    pub fn new(window_len: usize) -> Self {
        Self {
            x: Series::new(window_len),
            y: Series::new(window_len),
        }
    }

    /// Inserts a point, evicting the oldest pair when the window is full.
    pub fn push(&mut self, x: f64, y: f64) {
        self.x.push(x);
        self.y.push(y);
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// True once the window holds its configured number of points.
    pub fn is_saturated(&self) -> bool {
        self.y.len() >= self.y.max_len()
    }

    /// Oldest y value still in the window.
    pub fn y_at_begin(&self) -> Option<f64> {
        self.y.get(0)
    }

    /// Theil–Sen slope: median of the slopes of all distinct point pairs.
    /// Pairs with equal x are skipped. `None` with fewer than two points or
    /// when every pair is degenerate.
    pub fn coefficient_b(&self) -> Option<f64> {
        let mut slopes: Vec<f64, MAX_PAIR_COUNT> = Vec::new();
        for i in 0..self.x.len() {
            let (xi, yi) = (self.x.get(i)?, self.y.get(i)?);
            for j in (i + 1)..self.x.len() {
                let (xj, yj) = (self.x.get(j)?, self.y.get(j)?);
                if xi == xj {
                    continue;
                }
                // cannot overflow MAX_PAIR_COUNT
                let _ = slopes.push((yj - yi) / (xj - xi));
            }
        }
        if slopes.is_empty() {
            None
        } else {
            Some(median_in_place(&mut slopes))
        }
    }

    /// Intercept estimate: the median of the per-point residuals
    /// `y - slope * x`. 0 while the slope is undefined, so an empty or
    /// single-point window never leaks NaN into callers.
    pub fn median(&self) -> f64 {
        let Some(b) = self.coefficient_b() else {
            return 0.0;
        };
        let mut residuals: Vec<f64, MAX_REGRESSION_WINDOW> = self
            .x
            .iter()
            .zip(self.y.iter())
            .map(|(x, y)| y - b * x)
            .collect();
        median_in_place(&mut residuals)
    }

    pub fn coefficient_a(&self) -> f64 {
        self.median()
    }

    /// Coefficient of determination of the window against the fitted line
    /// `y = a + b x`. 0 when the fit is degenerate (undefined slope or zero
    /// variance in y). Can go negative for a genuinely bad fit; acceptance
    /// thresholds compare with `>=` so that still rejects.
    pub fn goodness_of_fit(&self) -> f64 {
        let Some(b) = self.coefficient_b() else {
            return 0.0;
        };
        let a = self.coefficient_a();
        let n = self.y.len() as f64;
        let y_mean = self.y.sum() / n;

        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (x, y) in self.x.iter().zip(self.y.iter()) {
            let fitted = a + b * x;
            ss_res += (y - fitted) * (y - fitted);
            ss_tot += (y - y_mean) * (y - y_mean);
        }
        if ss_tot == 0.0 {
            return 0.0;
        }
        1.0 - ss_res / ss_tot
    }
}
