//! Tick Checksums
//!
//! The server folds the world into a SHA-256 checksum every few ticks and
//! ships it with the tick broadcast; clients compute the same digest at the
//! same tick boundary and compare.
//!
//! Values are fed through [`Checksum`], which fixes a little-endian,
//! length-prefixed encoding per type so peers on any platform agree.

use sha2::{Digest, Sha256};

use super::rng::DeterministicRng;

const TICK_DOMAIN: &[u8] = b"PARK_LOCKSTEP_TICK_V1";

/// A value with a fixed checksum encoding.
pub trait Checksum {
    /// Feed this value's canonical bytes.
    fn feed(&self, hasher: &mut StateHasher);
}

macro_rules! le_checksum {
    ($($ty:ty),*) => {
        $(impl Checksum for $ty {
            #[inline]
            fn feed(&self, hasher: &mut StateHasher) {
                hasher.digest.update(self.to_le_bytes());
            }
        })*
    };
}

le_checksum!(u8, u32, i32, u64, i64);

impl Checksum for bool {
    #[inline]
    fn feed(&self, hasher: &mut StateHasher) {
        u8::from(*self).feed(hasher);
    }
}

impl Checksum for str {
    fn feed(&self, hasher: &mut StateHasher) {
        hasher.put_len(self.len());
        hasher.digest.update(self.as_bytes());
    }
}

impl<A: Checksum, B: Checksum> Checksum for (A, B) {
    fn feed(&self, hasher: &mut StateHasher) {
        hasher.put(&self.0).put(&self.1);
    }
}

impl Checksum for DeterministicRng {
    fn feed(&self, hasher: &mut StateHasher) {
        let [s0, s1] = self.state();
        hasher.put(&s0).put(&s1);
    }
}

/// Accumulates a world digest. Feed order is part of the digest.
pub struct StateHasher {
    digest: Sha256,
}

impl StateHasher {
    /// Start a digest under `domain`.
    pub fn new(domain: &[u8]) -> Self {
        let mut digest = Sha256::new();
        digest.update(domain);
        Self { digest }
    }

    /// Feed one value.
    #[inline]
    pub fn put<T: Checksum + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.feed(self);
        self
    }

    /// Feed a collection length. Lengths above `u32::MAX` saturate.
    #[inline]
    pub fn put_len(&mut self, len: usize) -> &mut Self {
        self.put(&u32::try_from(len).unwrap_or(u32::MAX))
    }

    /// Feed a length prefix followed by every item.
    pub fn seq<'a, T, I>(&mut self, items: I) -> &mut Self
    where
        T: Checksum + 'a,
        I: ExactSizeIterator<Item = &'a T>,
    {
        self.put_len(items.len());
        for item in items {
            self.put(item);
        }
        self
    }

    /// Lowercase hex digest, as carried in `Tick` messages.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.digest.finalize())
    }
}

/// Checksum for the end of `tick`: tick number and RNG first, then whatever
/// `add_state` feeds.
pub fn compute_tick_checksum<F>(tick: u32, rng: &DeterministicRng, add_state: F) -> String
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::new(TICK_DOMAIN);
    hasher.put(&tick).put(rng);
    add_state(&mut hasher);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(feed: impl FnOnce(&mut StateHasher)) -> String {
        let mut hasher = StateHasher::new(b"test");
        feed(&mut hasher);
        hasher.finalize_hex()
    }

    #[test]
    fn test_feed_order_matters() {
        assert_ne!(
            digest(|h| {
                h.put(&1u32).put(&2u32);
            }),
            digest(|h| {
                h.put(&2u32).put(&1u32);
            })
        );
    }

    #[test]
    fn test_width_is_part_of_the_encoding() {
        assert_ne!(digest(|h| { h.put(&7u8); }), digest(|h| { h.put(&7u32); }));
        assert_ne!(digest(|h| { h.put(&-1i32); }), digest(|h| { h.put(&-1i64); }));
    }

    #[test]
    fn test_length_prefix_splits_strings() {
        assert_ne!(
            digest(|h| {
                h.put("ab").put("c");
            }),
            digest(|h| {
                h.put("a").put("bc");
            })
        );
    }

    #[test]
    fn test_seq_counts_items() {
        let tiles = [(1i32, 2i32)];
        let with_seq = digest(|h| {
            h.seq(tiles.iter());
        });
        let by_hand = digest(|h| {
            h.put_len(1).put(&1i32).put(&2i32);
        });
        assert_eq!(with_seq, by_hand);
        assert_ne!(with_seq, digest(|h| { h.seq([(1i32, 2i32); 2].iter()); }));
    }

    #[test]
    fn test_tick_checksum() {
        let rng = DeterministicRng::from_seed([1, 2]);
        let a = compute_tick_checksum(100, &rng, |h| {
            h.put(&500i64);
        });
        let b = compute_tick_checksum(100, &rng, |h| {
            h.put(&500i64);
        });
        let c = compute_tick_checksum(101, &rng, |h| {
            h.put(&500i64);
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);

        let mut stepped = rng;
        stepped.next_u32();
        assert_ne!(a, compute_tick_checksum(100, &stepped, |h| {
            h.put(&500i64);
        }));
    }
}
