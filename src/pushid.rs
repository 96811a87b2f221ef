//! C5: 20-character lexicographically time-ordered unique keys.
//!
//! Grounded on `calimero-dag`'s `HybridTimestamp` idea of pairing a
//! wall-clock component with a monotonic tiebreaker, adapted to the fixed
//! alphabet and 12-char random suffix spec §3/§6 require.

use rand::RngCore;

const ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Per-context push-ID state. Not `Sync` by design (spec §5: the context is
/// single-threaded); callers needing a shared generator wrap this
/// themselves, as the `demos/` binary does.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_timestamp_ms: u64,
    last_random: [u8; 9],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next push ID for the given millisecond timestamp. Two
    /// IDs minted at the same timestamp get their 72-bit random suffix
    /// incremented by one instead of re-randomized, so `t1 <= t2 => id1 <
    /// id2` holds even within a millisecond (spec §8 property 5).
    pub fn next(&mut self, now_ms: u64) -> String {
        self.next_with_rng(now_ms, &mut rand::thread_rng())
    }

    pub(crate) fn next_with_rng(&mut self, now_ms: u64, rng: &mut dyn RngCore) -> String {
        if now_ms == self.last_timestamp_ms {
            increment_be(&mut self.last_random);
        } else {
            self.last_timestamp_ms = now_ms;
            rng.fill_bytes(&mut self.last_random);
        }

        let mut id = String::with_capacity(20);
        encode_timestamp(now_ms, &mut id);
        encode_random(&self.last_random, &mut id);
        id
    }
}

fn encode_timestamp(mut ms: u64, out: &mut String) {
    let mut chars = ['-'; 8];
    for slot in chars.iter_mut().rev() {
        *slot = ALPHABET[(ms & 0x3f) as usize] as char;
        ms >>= 6;
    }
    out.extend(chars);
}

fn encode_random(random: &[u8; 9], out: &mut String) {
    // 9 bytes = 72 bits = 12 six-bit groups, most-significant first.
    let mut acc: u128 = 0;
    for &b in random {
        acc = (acc << 8) | u128::from(b);
    }
    let mut chars = ['-'; 12];
    for slot in chars.iter_mut().rev() {
        *slot = ALPHABET[(acc & 0x3f) as usize] as char;
        acc >>= 6;
    }
    out.extend(chars);
}

/// Big-endian increment-by-one over the 72-bit random suffix, used when two
/// push IDs are minted in the same millisecond.
fn increment_be(bytes: &mut [u8; 9]) {
    for byte in bytes.iter_mut().rev() {
        if *byte == 0xff {
            *byte = 0;
        } else {
            *byte += 1;
            return;
        }
    }
}
