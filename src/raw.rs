//! The width-generic probing engine behind every typed table.
//!
//! A table is one flat buffer of machine words. The first `cap / W::BITS`
//! words form a bit-packed occupancy map, one bit per slot; the remaining
//! `2 * cap` words are the slot array, with slot `p` holding its key at
//! word `2p` and its assigned identifier at word `2p + 1`. Identifiers are
//! dense: the first distinct key probed gets `0`, the next `1`, and so on.
//! Capacity is always a power of two so the probe position can be computed
//! with a mask instead of a modulo, which measurably matters in the probe
//! loop.
//!
//! ## Probing
//!
//! `probe` is batched. Keys are consumed in sub-batches of [`PROBE_BATCH`]
//! entries: the whole sub-batch is hashed up front into a stack array (a
//! vectorizable loop over the hash kernel), then each key walks the table
//! with linear probing while the slot for the following key is prefetched.
//! Splitting the hash computation from the walk keeps the hash loop free
//! of branches and keeps the walk's dependent loads behind a prefetch.
//!
//! An occupied slot terminates the walk when its key word matches the
//! probed key; an empty occupancy bit terminates it by claiming the slot.
//! Growth never happens mid-batch. The preflight check over-approximates
//! by assuming every key in the batch is distinct, so the walk itself can
//! never run out of empty slots.
//!
//! ## Growth
//!
//! Growing allocates a fresh buffer of at least twice the capacity,
//! re-inserts all live pairs, and reseeds the hash. Re-insertion walks the
//! old occupancy map a word at a time and decomposes each word into
//! maximal runs of set bits with trailing-zero counts, so densely
//! populated regions are handed to the inserter as contiguous pair slices.
//! Reseeding on growth bounds adversarial collision chains: a key set
//! crafted to collide under one seed is dispersed by the next.
//!
//! The engine is single-writer. Nothing here is `Sync`, and no operation
//! blocks or yields.

use core::cmp;
use core::ops::BitAnd;
use core::ops::BitOrAssign;
use core::ops::Not;
use core::ops::Shl;
use core::ops::Shr;

#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;

use rand::rngs::SmallRng;
use rand::RngCore;
use rand::SeedableRng;

use crate::error::Error;
use crate::error::Result;
use crate::hash;

/// Number of keys hashed ahead of the probe walk in one sub-batch.
///
/// Large enough to keep the hash loop worth vectorizing, small enough that
/// the hash array stays resident in L1 while the walk consumes it.
const PROBE_BATCH: usize = 128;

/// Identifiers are handed out as non-negative `i32`, so a table can hold
/// at most `2^31` distinct keys.
const MAX_IDENTIFIERS: usize = 1 << 31;

/// Prefetches data into the cache.
///
/// # Safety
///
/// The caller must ensure that `ptr` points to a memory location that is
/// safe to read from. While `_mm_prefetch` might not fault on invalid
/// addresses, the behavior is undefined if the address is not valid for
/// reads.
#[inline(always)]
unsafe fn prefetch<T>(ptr: *const T) {
    #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse"))]
    // SAFETY: The caller guarantees `ptr` is valid for reads, and this arm
    // is only compiled when sse is available.
    unsafe {
        _mm_prefetch(ptr as *const i8, _MM_HINT_T0);
    }
    #[cfg(not(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse")))]
    let _ = ptr;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// A machine word the engine can be instantiated over.
///
/// The word doubles as the key type, the occupancy bitmap word, and the
/// slot word, exactly matching the buffer layout described in the module
/// docs. Only `u32` and `u64` implement it.
pub(crate) trait Word:
    Copy
    + Eq
    + BitAnd<Output = Self>
    + BitOrAssign
    + Not<Output = Self>
    + Shl<u32, Output = Self>
    + Shr<u32, Output = Self>
    + sealed::Sealed
    + 'static
{
    /// Bits per word; also the stride of the occupancy map walk.
    const BITS: u32;
    /// Smallest capacity a table of this width will allocate.
    const MIN_CAPACITY: usize;
    const ZERO: Self;
    const ONE: Self;

    fn from_usize(value: usize) -> Self;
    fn to_usize(self) -> usize;
    fn trailing_zeros(self) -> u32;
    fn count_ones(self) -> u32;

    fn hash(self, seed: u64) -> u64;
    fn multi_hash(hashes: &mut [u64], keys: &[Self], seed: u64);
}

impl Word for u32 {
    const BITS: u32 = 32;
    const MIN_CAPACITY: usize = 32;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline(always)]
    fn from_usize(value: usize) -> Self {
        value as u32
    }

    #[inline(always)]
    fn to_usize(self) -> usize {
        self as usize
    }

    #[inline(always)]
    fn trailing_zeros(self) -> u32 {
        u32::trailing_zeros(self)
    }

    #[inline(always)]
    fn count_ones(self) -> u32 {
        u32::count_ones(self)
    }

    #[inline(always)]
    fn hash(self, seed: u64) -> u64 {
        hash::hash32(self, seed)
    }

    #[inline(always)]
    fn multi_hash(hashes: &mut [u64], keys: &[Self], seed: u64) {
        hash::multi_hash32(hashes, keys, seed);
    }
}

impl Word for u64 {
    const BITS: u32 = 64;
    const MIN_CAPACITY: usize = 64;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline(always)]
    fn from_usize(value: usize) -> Self {
        value as u64
    }

    #[inline(always)]
    fn to_usize(self) -> usize {
        self as usize
    }

    #[inline(always)]
    fn trailing_zeros(self) -> u32 {
        u64::trailing_zeros(self)
    }

    #[inline(always)]
    fn count_ones(self) -> u32 {
        u64::count_ones(self)
    }

    #[inline(always)]
    fn hash(self, seed: u64) -> u64 {
        hash::hash64(self, seed)
    }

    #[inline(always)]
    fn multi_hash(hashes: &mut [u64], keys: &[Self], seed: u64) {
        hash::multi_hash64(hashes, keys, seed);
    }
}

/// Allocates the zeroed word buffer for a table of `cap` slots.
///
/// A zeroed occupancy map is an empty table, so no further initialization
/// is needed. Allocation failure is reported instead of aborting because
/// growth must leave the old table intact when memory runs out.
fn alloc_words<W: Word>(cap: usize) -> Result<Box<[W]>> {
    let words = cap / W::BITS as usize + 2 * cap;
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(words).map_err(|_| Error::OutOfMemory)?;
    buffer.resize(words, W::ZERO);
    Ok(buffer.into_boxed_slice())
}

#[inline(always)]
fn max_len_for(cap: usize, max_load: f64) -> usize {
    (max_load * cap as f64).ceil() as usize
}

/// Inserts pairs into a table's views without checking for duplicates.
///
/// `src` is an even-length run of `(key, identifier)` words lifted from
/// another table. The caller guarantees the keys are distinct and that the
/// destination has an empty slot for each of them; `len` bookkeeping stays
/// with the caller.
fn insert_distinct<W: Word>(flags: &mut [W], pairs: &mut [W], mask: usize, seed: u64, src: &[W]) {
    for pair in src.chunks_exact(2) {
        let mut position = (pair[0].hash(seed) as usize) & mask;

        loop {
            let index = position / W::BITS as usize;
            let shift = (position % W::BITS as usize) as u32;
            let bit = W::ONE << shift;

            if flags[index] & bit == W::ZERO {
                flags[index] |= bit;
                pairs[2 * position] = pair[0];
                pairs[2 * position + 1] = pair[1];
                break;
            }

            position = (position + 1) & mask;
        }
    }
}

/// The probing engine, generic over the key width.
#[derive(Debug)]
pub(crate) struct RawTable<W: Word> {
    words: Box<[W]>,
    len: usize,
    cap: usize,
    max_len: usize,
    max_load: f64,
    seed: u64,
    rng: SmallRng,
}

impl<W: Word> RawTable<W> {
    /// Creates a table with a capacity hint and a load factor in `(0, 1)`,
    /// seeded from OS entropy.
    pub(crate) fn new(capacity: usize, max_load: f64) -> Result<Self> {
        Self::with_rng(capacity, max_load, SmallRng::from_os_rng())
    }

    /// Creates a table whose seed (and every reseed on growth) derives
    /// from `seed`, so identifier assignment is reproducible.
    pub(crate) fn with_seed(capacity: usize, max_load: f64, seed: u64) -> Result<Self> {
        Self::with_rng(capacity, max_load, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, max_load: f64, mut rng: SmallRng) -> Result<Self> {
        // max_load == 1.0 would let the table saturate, and a saturated
        // table never terminates a probe miss.
        if !(max_load > 0.0 && max_load < 1.0) {
            return Err(Error::InvalidArgument("max_load must lie in (0, 1)"));
        }

        let cap = capacity
            .max(W::MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(Error::OutOfMemory)?;
        let words = alloc_words::<W>(cap)?;
        let seed = rng.next_u64();

        Ok(RawTable {
            words,
            len: 0,
            cap,
            max_len: max_len_for(cap, max_load),
            max_load,
            seed,
            rng,
        })
    }

    /// Number of distinct keys stored.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Current slot capacity.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.cap
    }

    /// The configured load factor bound.
    #[inline]
    pub(crate) fn max_load(&self) -> f64 {
        self.max_load
    }

    #[inline]
    fn flag_words(&self) -> usize {
        self.cap / W::BITS as usize
    }

    /// Assigns an identifier to every key in `keys`, writing it to the
    /// matching index of `values`.
    ///
    /// Existing keys get the identifier minted at their first sighting;
    /// new keys get the next dense identifier in input order. Fails before
    /// touching the table if the slice lengths differ, if the identifier
    /// space could be exhausted, or if a required growth cannot allocate.
    pub(crate) fn probe(&mut self, keys: &[W], values: &mut [i32]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(Error::InvalidArgument(
                "keys and values must have equal lengths",
            ));
        }

        // Both checks assume every incoming key is distinct. That keeps
        // growth (and the overflow check) out of the per-key walk: once
        // the preflight passes, the whole batch completes.
        let total = self.len + keys.len();
        if total > MAX_IDENTIFIERS {
            return Err(Error::Overflow);
        }
        if total > self.max_len {
            self.grow(total)?;
        }

        let mut hashes = [0u64; PROBE_BATCH];
        let mut start = 0;

        while start < keys.len() {
            let end = cmp::min(start + PROBE_BATCH, keys.len());
            let chunk = &keys[start..end];

            W::multi_hash(&mut hashes[..chunk.len()], chunk, self.seed);
            self.multi_probe(&hashes[..chunk.len()], chunk, &mut values[start..end]);

            start = end;
        }

        Ok(())
    }

    /// Walks one hashed sub-batch. Keys are processed in input order so
    /// identifiers come out monotone in first-sight order.
    fn multi_probe(&mut self, hashes: &[u64], keys: &[W], values: &mut [i32]) {
        let mask = self.cap - 1;
        let flag_words = self.flag_words();
        let mut len = self.len;
        let (flags, pairs) = self.words.split_at_mut(flag_words);

        for i in 0..keys.len() {
            if let Some(&next) = hashes.get(i + 1) {
                // SAFETY: The masked position addresses a slot inside
                // `pairs`, which is valid for reads for its whole length.
                unsafe { prefetch(pairs.as_ptr().add(2 * ((next as usize) & mask))) };
            }

            let key = keys[i];
            let mut position = (hashes[i] as usize) & mask;

            loop {
                let index = position / W::BITS as usize;
                let shift = (position % W::BITS as usize) as u32;
                let bit = W::ONE << shift;

                // SAFETY: `position` is masked to `[0, cap)`, so `index`
                // is below `cap / W::BITS == flags.len()` and
                // `2 * position + 1` is below `2 * cap == pairs.len()`.
                unsafe {
                    if *flags.get_unchecked(index) & bit == W::ZERO {
                        *flags.get_unchecked_mut(index) |= bit;
                        *pairs.get_unchecked_mut(2 * position) = key;
                        *pairs.get_unchecked_mut(2 * position + 1) = W::from_usize(len);
                        values[i] = len as i32;
                        len += 1;
                        break;
                    }

                    if *pairs.get_unchecked(2 * position) == key {
                        values[i] = pairs.get_unchecked(2 * position + 1).to_usize() as i32;
                        break;
                    }
                }

                position = (position + 1) & mask;
            }
        }

        self.len = len;
    }

    /// Rebuilds the table with room for `needed` entries under the load
    /// bound, carrying `len` over and drawing a fresh seed.
    ///
    /// On allocation failure the table is left exactly as it was.
    fn grow(&mut self, needed: usize) -> Result<()> {
        let mut new_cap = cmp::max(2 * self.cap, needed.next_power_of_two());
        // Doubling until the load bound covers `needed` keeps the
        // `len <= max_len` invariant intact even when one batch more than
        // doubles the population.
        while max_len_for(new_cap, self.max_load) < needed {
            new_cap = new_cap.checked_mul(2).ok_or(Error::OutOfMemory)?;
        }

        let mut new_words = alloc_words::<W>(new_cap)?;
        let new_seed = self.rng.next_u64();

        {
            let (new_flags, new_pairs) = new_words.split_at_mut(new_cap / W::BITS as usize);
            let (old_flags, old_pairs) = self.words.split_at(self.flag_words());
            let mask = new_cap - 1;

            for (i, &word) in old_flags.iter().enumerate() {
                if word == W::ZERO {
                    continue;
                }

                // Decompose the word into maximal runs of set bits. `f`
                // always has its lowest bit set at the top of the loop, so
                // `(!f).trailing_zeros()` is the length of the current run.
                let mut f = word;
                let n = f.trailing_zeros();
                let mut j = i * W::BITS as usize + n as usize;
                f = f >> n;

                loop {
                    let n = (!f).trailing_zeros();
                    let k = j + n as usize;
                    insert_distinct(new_flags, new_pairs, mask, new_seed, &old_pairs[2 * j..2 * k]);

                    // A run spanning the whole word leaves nothing to shift.
                    if n == W::BITS {
                        break;
                    }
                    f = f >> n;
                    if f == W::ZERO {
                        break;
                    }
                    j = k;

                    let n = f.trailing_zeros();
                    j += n as usize;
                    f = f >> n;
                }
            }
        }

        log::trace!(
            "grew probing table: {} -> {} slots, {} live entries",
            self.cap,
            new_cap,
            self.len,
        );

        self.words = new_words;
        self.cap = new_cap;
        self.max_len = max_len_for(new_cap, self.max_load);
        self.seed = new_seed;

        Ok(())
    }

    /// Empties the table without shrinking it or changing its seed.
    ///
    /// Only the occupancy map is cleared; stale slot words are dead until
    /// their occupancy bit is set again.
    pub(crate) fn reset(&mut self) {
        let flag_words = self.flag_words();
        for word in &mut self.words[..flag_words] {
            *word = W::ZERO;
        }
        self.len = 0;

        log::trace!("reset probing table, capacity {} retained", self.cap);
    }

    /// Set bits in the occupancy map; equal to `len` at all times.
    #[cfg(test)]
    pub(crate) fn occupied_slots(&self) -> usize {
        let (flags, _) = self.words.split_at(self.flag_words());
        flags.iter().map(|word| word.count_ones() as usize).sum()
    }

    #[cfg(test)]
    pub(crate) fn max_len(&self) -> usize {
        self.max_len
    }
}
