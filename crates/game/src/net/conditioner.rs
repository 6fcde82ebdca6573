use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Artificial loss and latency applied to outgoing datagrams, for soak
/// testing the redundancy and telemetry paths against bad links.
#[derive(Debug, Clone, Default)]
pub struct LinkConditioner {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl LinkConditioner {
    pub fn should_drop(&self) -> bool {
        self.enabled && self.loss_percent > 0.0 && rand_unit() * 100.0 < self.loss_percent
    }

    /// A latency sample: uniform over `[min, max]`, plus up to `jitter_ms`
    /// on top.
    pub fn delay(&self) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let span = self.max_latency_ms.saturating_sub(self.min_latency_ms) as u64 + 1;
        let mut millis = self.min_latency_ms as u64 + rand_u64() % span;
        if self.jitter_ms > 0 {
            millis += rand_u64() % (self.jitter_ms as u64 + 1);
        }
        Duration::from_millis(millis)
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release_at: Instant,
    data: Vec<u8>,
    addr: SocketAddr,
}

/// Holds delayed datagrams until their release time. The pending list is
/// unordered; `take_due` sweeps it and hands back the due entries sorted by
/// release time. Queues stay small, so the linear sweep is fine.
#[derive(Debug, Default)]
pub struct DelayQueue {
    pending: Vec<DelayedDatagram>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: Vec<u8>, addr: SocketAddr, delay: Duration) {
        self.pending.push(DelayedDatagram {
            release_at: Instant::now() + delay,
            data,
            addr,
        });
    }

    pub fn take_due(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].release_at <= now {
                due.push(self.pending.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|d| d.release_at);
        due.into_iter().map(|d| (d.data, d.addr)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// Weyl-sequence increment; any odd constant with good bit dispersion works.
const RNG_STEP: u64 = 0x9E37_79B9_7F4A_7C15;

static RNG_SEQUENCE: AtomicU64 = AtomicU64::new(RNG_STEP);

/// Process-wide non-cryptographic randomness: an atomic Weyl sequence xored
/// with the clock and run through a splitmix64 finalizer. Used for salts and
/// loss dice; nothing here needs real entropy.
pub fn rand_u64() -> u64 {
    let nonce = RNG_SEQUENCE.fetch_add(RNG_STEP, Ordering::Relaxed);
    let clock = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ (d.as_secs() << 32))
        .unwrap_or(0);
    mix64(nonce ^ clock.rotate_left(17))
}

/// Uniform sample in `[0, 1)` built from the top 24 bits of `rand_u64`.
fn rand_unit() -> f32 {
    (rand_u64() >> 40) as f32 / (1u32 << 24) as f32
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_conditioner_never_drops() {
        let conditioner = LinkConditioner {
            enabled: false,
            loss_percent: 100.0,
            ..Default::default()
        };
        for _ in 0..100 {
            assert!(!conditioner.should_drop());
        }
        assert_eq!(conditioner.delay(), Duration::ZERO);
    }

    #[test]
    fn full_loss_drops_everything() {
        let conditioner = LinkConditioner {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        for _ in 0..100 {
            assert!(conditioner.should_drop());
        }
    }

    #[test]
    fn delay_stays_within_the_configured_band() {
        let conditioner = LinkConditioner {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 20,
            max_latency_ms: 40,
            jitter_ms: 10,
        };
        for _ in 0..100 {
            let delay = conditioner.delay().as_millis() as u32;
            assert!((20..=50).contains(&delay));
        }
    }

    #[test]
    fn delay_queue_releases_in_time_order() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut queue = DelayQueue::new();
        queue.push(vec![2], addr, Duration::from_millis(50));
        queue.push(vec![1], addr, Duration::ZERO);

        let due = queue.take_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, vec![1]);
        assert!(!queue.is_empty());
    }

    #[test]
    fn rand_unit_is_in_range() {
        for _ in 0..1000 {
            let v = rand_unit();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn rand_u64_values_differ() {
        let a = rand_u64();
        let b = rand_u64();
        assert_ne!(a, b);
    }
}
