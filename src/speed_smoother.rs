use std::collections::VecDeque;

/// Default number of samples averaged by the smoother
pub const DEFAULT_WINDOW: usize = 5;

/// Moving-average speed filter over the most recent samples (knots)
#[derive(Debug, Clone)]
pub struct SpeedSmoother {
    window: VecDeque<f64>,
    capacity: usize,
}

impl Default for SpeedSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SpeedSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a raw sample and return the mean of the window, never negative
    pub fn update(&mut self, raw_speed_kts: f64) -> f64 {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(raw_speed_kts);
        self.current().unwrap_or(0.0)
    }

    /// Current smoothed value, if any samples have been seen
    pub fn current(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let sum: f64 = self.window.iter().sum();
        Some((sum / self.window.len() as f64).max(0.0))
    }

    /// Change the window size, dropping the oldest samples if it shrinks
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_partial_window() {
        let mut s = SpeedSmoother::new(5);
        assert_eq!(s.update(10.0), 10.0);
        assert_eq!(s.update(20.0), 15.0);
        assert_eq!(s.update(30.0), 20.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut s = SpeedSmoother::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            s.update(v);
        }
        assert_eq!(s.len(), 3);
        assert_eq!(s.current(), Some(2.0));
    }

    #[test]
    fn test_never_negative() {
        let mut s = SpeedSmoother::new(2);
        assert_eq!(s.update(-10.0), 0.0);
        assert_eq!(s.update(4.0), 0.0);
        assert_eq!(s.update(6.0), 5.0);
    }

    #[test]
    fn test_resize_and_reset() {
        let mut s = SpeedSmoother::new(5);
        for v in [10.0, 20.0, 30.0, 40.0] {
            s.update(v);
        }
        s.resize(2);
        assert_eq!(s.current(), Some(35.0));
        s.reset();
        assert!(s.is_empty());
        assert_eq!(s.current(), None);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let mut s = SpeedSmoother::new(0);
        s.update(5.0);
        assert_eq!(s.update(9.0), 9.0);
        assert_eq!(s.capacity(), 1);
    }
}
