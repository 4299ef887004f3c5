//! Fixed-capacity FIFO of price samples with a running arithmetic mean.
//!
//! The window is the smoothing element of the price oracle: each aggregation
//! tick appends one observation and evicts from the front once capacity is
//! exceeded, so the reported price is always the mean of the most recent
//! `capacity` observations. Both the capacity and the value reported for an
//! empty window are configuration inputs, not constants.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    fallback: f64,
}

impl SampleWindow {
    pub fn new(capacity: usize, fallback: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            fallback,
        }
    }

    /// Appends one observation, then evicts oldest-first until the window is
    /// back within capacity. Append-then-evict is a single atomic step from
    /// the caller's perspective; callers serialize access externally.
    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of current contents, or the configured fallback when
    /// the window is empty. Never NaN.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return self.fallback;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_reports_fallback() {
        let window = SampleWindow::new(12, 1.0);
        assert_eq!(window.mean(), 1.0);
        assert_eq!(window.len(), 0);

        let window = SampleWindow::new(12, 0.97);
        assert_eq!(window.mean(), 0.97);
    }

    #[test]
    fn test_capacity_never_exceeded_and_order_preserved() {
        let mut window = SampleWindow::new(3, 1.0);
        for i in 0..10 {
            window.push(i as f64);
            assert!(window.len() <= 3);
        }
        // The survivors are the three most recent pushes, in push order.
        assert_eq!(window.samples.iter().copied().collect::<Vec<_>>(), vec![7.0, 8.0, 9.0]);
        assert_eq!(window.mean(), 8.0);
    }

    #[test]
    fn test_mean_tracks_contents() {
        let mut window = SampleWindow::new(12, 1.0);
        window.push(1.0);
        window.push(1.02);
        assert!((window.mean() - 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut window = SampleWindow::new(0, 1.0);
        window.push(2.0);
        window.push(3.0);
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), 3.0);
    }
}
