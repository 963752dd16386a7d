//! Clock and id generation seams for the queue

use chrono::{DateTime, Utc};
use rand::Rng;

/// Source of "now" for enqueue timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces queue item ids
pub trait IdGenerator: Send + Sync {
    fn generate(&self, now: DateTime<Utc>) -> String;
}

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<unix millis>-<9 random base36 chars>`
///
/// The millisecond prefix keeps ids roughly time ordered; the suffix keeps
/// ids generated within the same millisecond distinct.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRandomIdGenerator;

impl IdGenerator for TimeRandomIdGenerator {
    fn generate(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        format!("{}-{}", now.timestamp_millis(), suffix)
    }
}
