//! Adaptive response time estimator.
//!
//! Monitors and routers periodically report the average response time a
//! server showed over a batch of queries. The estimator folds those batches
//! into a weight-capped exponential moving average. The cap (`sample_max`)
//! tunes itself:
//!
//! - a batch at least as large as the cap raises it to `count * 1.1`, so
//!   busy servers are compared fairly against each other;
//! - a batch more than twice as fast as the current average halves it, so a
//!   server that speeds up is picked up quickly;
//! - otherwise it drifts down by a factor of 1.1.
//!
//! Writers serialize on a mutex. Readers load atomics without locking and
//! may see a value one update behind.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Initial weight ceiling.
pub const DEFAULT_SAMPLE_MAX: i64 = 500;

const DRIFT: f64 = 1.1;

#[derive(Debug)]
struct Ema {
    average: f64,
    /// Weight already accumulated in `average`, never above `sample_max`.
    accumulated: i64,
    sample_max: i64,
}

#[derive(Debug)]
pub struct ResponseTimeEstimator {
    ema: Mutex<Ema>,
    average_bits: AtomicU64,
    num_samples: AtomicI64,
    sample_max: AtomicI64,
}

impl Default for ResponseTimeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTimeEstimator {
    pub fn new() -> Self {
        Self::with_sample_max(DEFAULT_SAMPLE_MAX)
    }

    pub fn with_sample_max(sample_max: i64) -> Self {
        let sample_max = sample_max.max(1);
        Self {
            ema: Mutex::new(Ema {
                average: 0.0,
                accumulated: 0,
                sample_max,
            }),
            average_bits: AtomicU64::new(0f64.to_bits()),
            num_samples: AtomicI64::new(0),
            sample_max: AtomicI64::new(sample_max),
        }
    }

    /// Fold in a batch of `sample_count` queries that averaged `average`.
    pub fn add_sample(&self, average: Duration, sample_count: u32) {
        let ave = average.as_secs_f64();
        let count = i64::from(sample_count);

        let mut ema = self.ema.lock().unwrap_or_else(PoisonError::into_inner);
        let current_max = ema.sample_max;

        let new_max = if count >= current_max {
            (count as f64 * DRIFT) as i64
        } else if ema.average / ave > 2.0 {
            (current_max as f64 * 0.5) as i64
        } else {
            (current_max as f64 / DRIFT) as i64
        };
        ema.sample_max = new_max.max(1);

        let weight = count.min(ema.sample_max);
        if weight > 0 {
            let accumulated = ema.accumulated.min(ema.sample_max);
            ema.average = if accumulated == 0 {
                ave
            } else {
                let w = weight as f64;
                let acc = accumulated as f64;
                (acc * ema.average + w * ave) / (acc + w)
            };
            ema.accumulated = (accumulated + weight).min(ema.sample_max);
        }

        self.average_bits
            .store(ema.average.to_bits(), Ordering::Relaxed);
        self.sample_max.store(ema.sample_max, Ordering::Relaxed);
        self.num_samples.fetch_add(count, Ordering::Relaxed);

        tracing::trace!(
            average = ave,
            samples = sample_count,
            sample_max = ema.sample_max,
            estimate = ema.average,
            "response time sample added"
        );
    }

    /// Current estimate. Unsynchronized.
    pub fn read_average(&self) -> Duration {
        let secs = f64::from_bits(self.average_bits.load(Ordering::Relaxed));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Total number of samples folded in so far. Unsynchronized.
    pub fn read_sample_count(&self) -> i64 {
        self.num_samples.load(Ordering::Relaxed)
    }

    pub fn sample_max(&self) -> i64 {
        self.sample_max.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn starts_empty() {
        let est = ResponseTimeEstimator::new();
        assert_eq!(est.read_average(), Duration::ZERO);
        assert_eq!(est.read_sample_count(), 0);
        assert_eq!(est.sample_max(), DEFAULT_SAMPLE_MAX);
    }

    #[test]
    fn first_sample_becomes_average() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(10), 100);
        assert_eq!(est.read_average(), ms(10));
        assert_eq!(est.read_sample_count(), 100);
    }

    #[test]
    fn drift_lowers_sample_max_by_factor() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(10), 100);
        // 500 / 1.1
        assert_eq!(est.sample_max(), 454);

        est.add_sample(ms(10), 50);
        // 454 / 1.1
        assert_eq!(est.sample_max(), 412);
        assert!(est.sample_max() >= (454.0 / DRIFT) as i64);
    }

    #[test]
    fn large_batch_raises_sample_max() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(10), 1000);
        assert_eq!(est.sample_max(), 1100);
    }

    #[test]
    fn much_faster_sample_halves_sample_max() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(100), 100);
        let before = est.sample_max();

        est.add_sample(ms(10), 10);
        assert_eq!(est.sample_max(), before / 2);
    }

    #[test]
    fn slightly_faster_sample_only_drifts() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(100), 100);
        let before = est.sample_max();

        est.add_sample(ms(60), 10);
        assert_eq!(est.sample_max(), (before as f64 / DRIFT) as i64);
    }

    #[test]
    fn average_moves_toward_new_samples() {
        let est = ResponseTimeEstimator::new();
        est.add_sample(ms(100), 100);
        est.add_sample(ms(10), 100);

        let avg = est.read_average();
        assert!(avg < ms(100));
        assert!(avg > ms(10));
    }

    #[test]
    fn weight_is_capped_by_sample_max() {
        let est = ResponseTimeEstimator::with_sample_max(10);
        est.add_sample(ms(100), 5);
        // 5 < 10, history is empty: drift to 9, weight 5 replaces the average.
        assert_eq!(est.read_average(), ms(100));

        // Infinitely faster: the cap halves to 4, accumulated weight is
        // clamped to 4 and the new batch weighs 3.
        est.add_sample(ms(0), 3);
        let avg = est.read_average().as_secs_f64();
        assert!(avg < 0.1 && avg > 0.0);
    }

    #[test]
    fn sample_max_never_reaches_zero() {
        let est = ResponseTimeEstimator::with_sample_max(1);
        for _ in 0..10 {
            est.add_sample(ms(10), 0);
        }
        assert_eq!(est.sample_max(), 1);
        assert_eq!(est.read_sample_count(), 0);
    }

    #[test]
    fn concurrent_writers_count_every_sample() {
        use std::sync::Arc;
        use std::thread;

        let est = Arc::new(ResponseTimeEstimator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let est = Arc::clone(&est);
                thread::spawn(move || {
                    for _ in 0..100 {
                        est.add_sample(ms(5), 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(est.read_sample_count(), 800);
        assert!((est.read_average().as_secs_f64() - 0.005).abs() < 1e-9);
    }
}
