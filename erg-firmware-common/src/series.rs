use heapless::Deque;
use heapless::Vec;

/// Upper bound on every regression window in the engine. Profiles pick a
/// runtime length between 1 and this capacity.
pub const MAX_REGRESSION_WINDOW: usize = 11;

/// Sliding window of f64 samples with a runtime length limit and a running
/// sum. Oldest sample is evicted when a new one arrives at the limit.
pub struct Series {
    buf: Deque<f64, MAX_REGRESSION_WINDOW>,
    max_len: usize,
    sum: f64,
}

impl Series {
    /// `max_len` is clamped to `1..=MAX_REGRESSION_WINDOW`.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Deque::new(),
            max_len: max_len.clamp(1, MAX_REGRESSION_WINDOW),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.buf.len() >= self.max_len {
            if let Some(evicted) = self.buf.pop_front() {
                self.sum -= evicted;
            }
        }
        // cannot fail: max_len <= capacity
        let _ = self.buf.push_back(value);
        self.sum += value;
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.buf.iter().nth(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// 0 when empty.
    pub fn average(&self) -> f64 {
        if self.buf.is_empty() {
            0.0
        } else {
            self.sum / self.buf.len() as f64
        }
    }

    /// Median of the window contents, 0 when empty.
    pub fn median(&self) -> f64 {
        let mut sorted: Vec<f64, MAX_REGRESSION_WINDOW> = self.buf.iter().copied().collect();
        median_in_place(&mut sorted)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.sum = 0.0;
    }
}

/// Sorts `values` and returns their median, 0 for an empty slice.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 != 0 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}
