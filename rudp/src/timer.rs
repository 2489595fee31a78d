//! Retransmission bookkeeping and retransmission-timeout (RTO) estimation.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! acknowledgment arrives within a bounded time.  This module provides:
//! - [`RetransmitRecord`]: the per-packet state kept while a data packet is
//!   outstanding (encoded bytes, last transmission time, retry count).
//! - [`RtoEstimator`]: collects round-trip samples and turns them into the
//!   current RTO.
//!
//! The estimate is the **mean of every sample ever observed**, scaled by 1.5
//! and clamped to `[min_rto, max_rto]`:
//!
//! ```text
//!   RTO = clamp(1.5 × mean(samples), MIN_RTO, MAX_RTO)     (DEFAULT_RTO if no samples)
//! ```
//!
//! Unlike an RFC 6298 smoothed estimator, old samples never decay.

use std::time::Duration;

use tokio::time::Instant;

/// RTO used before the first round-trip sample is available.
pub const DEFAULT_RTO: Duration = Duration::from_millis(200);
/// Lower clamp bound of the estimate.
pub const MIN_RTO: Duration = Duration::from_millis(50);
/// Upper clamp bound of the estimate.
pub const MAX_RTO: Duration = Duration::from_secs(1);

// Mean is scaled by RTO_SCALE_NUM / RTO_SCALE_DEN (1.5) in integer nanoseconds.
const RTO_SCALE_NUM: u32 = 3;
const RTO_SCALE_DEN: u32 = 2;

/// RTO for `samples` using the protocol default bounds.
pub fn estimate_rto(samples: &[Duration]) -> Duration {
    estimate(samples, DEFAULT_RTO, MIN_RTO, MAX_RTO)
}

fn estimate(samples: &[Duration], initial: Duration, min: Duration, max: Duration) -> Duration {
    if samples.is_empty() {
        return initial;
    }
    let total: Duration = samples.iter().sum();
    let mean = total / samples.len() as u32;
    (mean * RTO_SCALE_NUM / RTO_SCALE_DEN).max(min).min(max)
}

/// Round-trip history of one endpoint.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    samples: Vec<Duration>,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_RTO, MIN_RTO, MAX_RTO)
    }
}

impl RtoEstimator {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            samples: Vec::new(),
            initial_rto,
            min_rto,
            max_rto,
        }
    }

    /// Add one observed round trip.
    pub fn record_sample(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        estimate(&self.samples, self.initial_rto, self.min_rto, self.max_rto)
    }
}

/// A data packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitRecord {
    /// The encoded packet, resent verbatim on timeout.
    pub packet: Vec<u8>,
    /// Time of the most recent transmission (first send or latest retry).
    pub sent_at: Instant,
    /// Number of retransmissions so far (`0` after the first send).
    pub retry_count: u32,
}

impl RetransmitRecord {
    pub fn new(packet: Vec<u8>, now: Instant) -> Self {
        Self {
            packet,
            sent_at: now,
            retry_count: 0,
        }
    }

    /// `true` once the packet has been in flight for at least `rto`.
    pub fn is_expired(&self, now: Instant, rto: Duration) -> bool {
        now.saturating_duration_since(self.sent_at) >= rto
    }

    /// Account for one retransmission at `now`.
    ///
    /// Refreshing `sent_at` means a later RTT sample measures the attempt
    /// that was actually acknowledged.
    pub fn on_retransmit(&mut self, now: Instant) {
        self.retry_count += 1;
        self.sent_at = now;
    }

    /// Round trip measured against an acknowledgment arriving at `now`.
    pub fn rtt(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn no_samples_uses_default() {
        assert_eq!(estimate_rto(&[]), DEFAULT_RTO);
        assert_eq!(RtoEstimator::default().rto(), ms(200));
    }

    #[test]
    fn mean_scaled_by_one_and_a_half() {
        assert_eq!(estimate_rto(&[ms(100), ms(300)]), ms(300));
        assert_eq!(estimate_rto(&[ms(400)]), ms(600));
    }

    #[test]
    fn clamped_to_bounds() {
        assert_eq!(estimate_rto(&[ms(1)]), MIN_RTO);
        assert_eq!(estimate_rto(&[Duration::ZERO]), MIN_RTO);
        assert_eq!(estimate_rto(&[ms(5_000)]), MAX_RTO);
    }

    #[test]
    fn old_samples_keep_their_weight() {
        let mut est = RtoEstimator::default();
        for _ in 0..9 {
            est.record_sample(ms(40));
        }
        // A sudden 600 ms round trip barely moves the all-history mean.
        est.record_sample(ms(600));
        assert_eq!(est.samples().len(), 10);
        assert_eq!(est.rto(), ms(144));
    }

    #[test]
    fn custom_bounds() {
        let mut est = RtoEstimator::new(ms(10), ms(20), ms(30));
        assert_eq!(est.rto(), ms(10));
        est.record_sample(ms(100));
        assert_eq!(est.rto(), ms(30));
    }

    #[test]
    fn record_expiry_and_retransmit() {
        let t0 = Instant::now();
        let mut rec = RetransmitRecord::new(vec![1, 2, 3], t0);
        assert!(!rec.is_expired(t0 + ms(199), ms(200)));
        assert!(rec.is_expired(t0 + ms(200), ms(200)));

        rec.on_retransmit(t0 + ms(250));
        assert_eq!(rec.retry_count, 1);
        assert!(!rec.is_expired(t0 + ms(300), ms(200)));
        assert_eq!(rec.rtt(t0 + ms(270)), ms(20));
    }
}
