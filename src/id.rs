//! Snowflake identifier issuance.
//!
//! Layout (63 bits, always positive as `i64`):
//!   - 41 bits: milliseconds since 2024-01-01 UTC
//!   - 10 bits: node id
//!   - 12 bits: per-millisecond sequence

use std::sync::{Mutex, OnceLock, PoisonError};

const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;

static GENERATOR: OnceLock<Snowflake> = OnceLock::new();

pub struct Snowflake {
    node_id: u16,
    state: Mutex<(i64, u16)>,
}

impl Snowflake {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & MAX_NODE,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (last_ms, sequence) = *state;
        let mut now = current_ms();

        // Clock went backwards: keep issuing from the last instant.
        if now < last_ms {
            now = last_ms;
        }

        let next_sequence = if now == last_ms {
            let seq = (sequence + 1) & SEQUENCE_MASK;
            if seq == 0 {
                while now <= last_ms {
                    std::hint::spin_loop();
                    now = current_ms();
                }
            }
            seq
        } else {
            0
        };

        *state = (now, next_sequence);
        ((now - EPOCH_MS) << (NODE_BITS + SEQUENCE_BITS))
            | (i64::from(self.node_id) << SEQUENCE_BITS)
            | i64::from(next_sequence)
    }
}

fn current_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Install the process-wide generator. Only the first call has effect.
pub fn init(node_id: u16) {
    if GENERATOR.set(Snowflake::new(node_id)).is_err() {
        tracing::warn!(node_id, "snowflake generator already initialised");
    }
}

/// Next id from the process-wide generator (node 1 when `init` was never called).
pub fn next_id() -> i64 {
    GENERATOR.get_or_init(|| Snowflake::new(1)).next_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_positive_unique_and_increasing() {
        let gen = Snowflake::new(7);
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn node_id_is_encoded() {
        let gen = Snowflake::new(513);
        let id = gen.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_NODE), 513);
    }

    #[test]
    fn oversized_node_id_is_masked() {
        assert_eq!(Snowflake::new(1024 + 5).node_id(), 5);
    }
}
