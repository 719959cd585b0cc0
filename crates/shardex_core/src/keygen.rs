//! Key generators for auto-generated columns of sharded tables.
//!
//! Generators are shared by every statement of a `ShardingContext` and are
//! internally synchronized: callers only need `&self`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use shardex_common::config::{KeyGenConfig, MAX_WORKER_ID};
use shardex_common::datum::Datum;
use shardex_common::error::{ShardexError, ShardexResult};

pub trait KeyGenerator: Send + Sync {
    fn generate_key(&self) -> ShardexResult<Datum>;

    fn name(&self) -> &'static str;
}

/// Monotonic counter, mostly for tests and single-process deployments.
pub struct IncrementKeyGenerator {
    next: AtomicI64,
}

impl IncrementKeyGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for IncrementKeyGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl KeyGenerator for IncrementKeyGenerator {
    fn generate_key(&self) -> ShardexResult<Datum> {
        Ok(Datum::Int64(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    fn name(&self) -> &'static str {
        "increment"
    }
}

/// 2016-11-01T00:00:00Z in milliseconds.
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_477_958_400_000;

const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

struct SnowflakeState {
    last_ms: u64,
    sequence: u64,
}

/// 64-bit time-ordered keys: 41 bits of milliseconds since
/// `SNOWFLAKE_EPOCH_MS`, 10 bits of worker id, 12 bits of sequence.
pub struct SnowflakeKeyGenerator {
    worker_id: u64,
    max_tolerate_ms: u64,
    clock: Clock,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeKeyGenerator {
    pub fn new(config: &KeyGenConfig) -> ShardexResult<Self> {
        Self::with_clock(config, Box::new(system_millis))
    }

    pub fn with_clock(config: &KeyGenConfig, clock: Clock) -> ShardexResult<Self> {
        if config.worker_id > MAX_WORKER_ID {
            return Err(ShardexError::Config(format!(
                "snowflake worker id {} out of range 0..={}",
                config.worker_id, MAX_WORKER_ID
            )));
        }
        Ok(Self {
            worker_id: config.worker_id,
            max_tolerate_ms: config.max_tolerate_time_difference_ms,
            clock,
            state: Mutex::new(SnowflakeState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    fn next_id(&self) -> ShardexResult<i64> {
        let mut state = self.state.lock();
        let mut now = (self.clock)();

        if now < state.last_ms {
            let behind = state.last_ms - now;
            if behind > self.max_tolerate_ms {
                return Err(ShardexError::internal_bug(
                    "KEYGEN_CLOCK_BACKWARDS",
                    format!("clock moved backwards by {}ms", behind),
                    format!("last_ms={} now={}", state.last_ms, now),
                ));
            }
            tracing::warn!(behind_ms = behind, "snowflake clock moved backwards, waiting");
            std::thread::sleep(Duration::from_millis(behind));
            now = (self.clock)();
            if now < state.last_ms {
                return Err(ShardexError::internal_bug(
                    "KEYGEN_CLOCK_BACKWARDS",
                    "clock still behind after tolerated wait",
                    format!("last_ms={} now={}", state.last_ms, now),
                ));
            }
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = (self.clock)();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let elapsed = now.saturating_sub(SNOWFLAKE_EPOCH_MS);
        let id = (elapsed << TIMESTAMP_SHIFT) | (self.worker_id << WORKER_SHIFT) | state.sequence;
        Ok(id as i64)
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn generate_key(&self) -> ShardexResult<Datum> {
        self.next_id().map(Datum::Int64)
    }

    fn name(&self) -> &'static str {
        "snowflake"
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(SNOWFLAKE_EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn fixed_clock(at: Arc<AtomicU64>) -> Clock {
        Box::new(move || at.load(Ordering::SeqCst))
    }

    #[test]
    fn test_increment_generator_counts_up() {
        let g = IncrementKeyGenerator::starting_at(101);
        let keys: Vec<i64> = (0..3)
            .map(|_| g.generate_key().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(keys, vec![101, 102, 103]);
    }

    #[test]
    fn test_snowflake_keys_unique_and_increasing() {
        let g = SnowflakeKeyGenerator::new(&KeyGenConfig::default()).unwrap();
        let mut prev = i64::MIN;
        let mut seen = HashSet::new();
        for _ in 0..5000 {
            let k = g.generate_key().unwrap().as_i64().unwrap();
            assert!(k > prev);
            assert!(seen.insert(k));
            prev = k;
        }
    }

    #[test]
    fn test_snowflake_layout_carries_worker_id() {
        let now = Arc::new(AtomicU64::new(SNOWFLAKE_EPOCH_MS + 5));
        let config = KeyGenConfig {
            worker_id: 7,
            ..KeyGenConfig::default()
        };
        let g = SnowflakeKeyGenerator::with_clock(&config, fixed_clock(now)).unwrap();
        let k = g.generate_key().unwrap().as_i64().unwrap() as u64;
        assert_eq!(k >> TIMESTAMP_SHIFT, 5);
        assert_eq!((k >> WORKER_SHIFT) & ((1 << WORKER_ID_BITS) - 1), 7);
        assert_eq!(k & SEQUENCE_MASK, 0);
        let k2 = g.generate_key().unwrap().as_i64().unwrap() as u64;
        assert_eq!(k2 & SEQUENCE_MASK, 1);
    }

    #[test]
    fn test_snowflake_rejects_large_clock_regression() {
        let now = Arc::new(AtomicU64::new(SNOWFLAKE_EPOCH_MS + 1_000));
        let g = SnowflakeKeyGenerator::with_clock(&KeyGenConfig::default(), fixed_clock(now.clone()))
            .unwrap();
        g.generate_key().unwrap();
        now.store(SNOWFLAKE_EPOCH_MS + 500, Ordering::SeqCst);
        let err = g.generate_key().unwrap_err();
        assert!(err.is_internal_bug());
    }

    #[test]
    fn test_worker_id_out_of_range() {
        let config = KeyGenConfig {
            worker_id: MAX_WORKER_ID + 1,
            ..KeyGenConfig::default()
        };
        assert!(SnowflakeKeyGenerator::new(&config).is_err());
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let g = Arc::new(SnowflakeKeyGenerator::new(&KeyGenConfig::default()).unwrap());
        let keys: Vec<i64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let g = g.clone();
                    s.spawn(move || {
                        (0..1000)
                            .map(|_| g.generate_key().unwrap().as_i64().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let unique: HashSet<i64> = keys.iter().copied().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
