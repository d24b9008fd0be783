use std::collections::VecDeque;

/// Mean and sample standard deviation of one full trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl WindowStats {
    /// A window whose spread is zero cannot produce a z-score.
    pub fn is_degenerate(&self) -> bool {
        self.std_dev == 0.0
    }
}

/// Fixed-size trailing window with a running sum.
///
/// The running sum is rebuilt from the buffered values every `capacity` pushes
/// so rounding error cannot accumulate over long series. Variance is always
/// computed in two passes over the buffered values.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    pushes_since_resync: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            pushes_since_resync: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn push(&mut self, value: f64) {
        if self.is_full() {
            if let Some(evicted) = self.values.pop_front() {
                self.sum -= evicted;
            }
        }
        self.values.push_back(value);
        self.sum += value;

        self.pushes_since_resync += 1;
        // a NaN or infinity leaving the window would otherwise stick in the sum
        if self.pushes_since_resync >= self.capacity || !self.sum.is_finite() {
            self.sum = self.values.iter().sum();
            self.pushes_since_resync = 0;
        }
    }

    fn mean(&self) -> f64 {
        self.sum / self.values.len() as f64
    }

    /// Statistics over the buffered values, or `None` until the window is full.
    pub fn stats(&self) -> Option<WindowStats> {
        if !self.is_full() || self.capacity < 2 {
            return None;
        }

        let first = *self.values.front()?;
        if self.values.iter().all(|v| *v == first) {
            return Some(WindowStats { mean: first, std_dev: 0.0 });
        }

        let n = self.capacity as f64;
        let mean = self.sum / n;
        let sum_sq: f64 = self.values.iter().map(|v| (v - mean).powi(2)).sum();
        let std_dev = (sum_sq / (n - 1.0)).sqrt();

        Some(WindowStats { mean, std_dev })
    }
}

/// Trailing statistics for every index of `values`. Index `i` is `Some` only
/// when `values[i + 1 - window..=i]` is a full window.
pub fn rolling_stats(values: &[f64], window: usize) -> Vec<Option<WindowStats>> {
    let mut rolling = RollingWindow::new(window);
    values
        .iter()
        .map(|v| {
            rolling.push(*v);
            rolling.stats()
        })
        .collect()
}

/// Trailing mean over `window` entries, defined only when every entry in the
/// window is defined.
pub fn rolling_mean_defined(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut rolling = RollingWindow::new(window);
    let mut undefined_in_window = 0usize;
    let mut flags: VecDeque<bool> = VecDeque::with_capacity(window);

    values
        .iter()
        .map(|v| {
            if flags.len() == window && flags.pop_front() == Some(true) {
                undefined_in_window -= 1;
            }
            flags.push_back(v.is_none());
            if v.is_none() {
                undefined_in_window += 1;
            }

            rolling.push(v.unwrap_or(0.0));
            if rolling.is_full() && undefined_in_window == 0 {
                Some(rolling.mean())
            } else {
                None
            }
        })
        .collect()
}
