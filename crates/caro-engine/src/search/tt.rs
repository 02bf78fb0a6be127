//! Sharded, lockless transposition table.
//!
//! Entries are two `AtomicU64` words with XOR-based torn-write detection:
//!
//! ```text
//! word0: [63:32] key32 | [31:27] generation | [25:24] bound
//!        | [23:16] depth | [15:0] move
//! word1: [63:32] check = key32 XOR low32(word0) | [31:16] score | [15:0] eval
//! ```
//!
//! Three entries form a cache-line-aligned cluster. The table is split into
//! 16 shards indexed from the *high* bits of the key; the bucket within a
//! shard comes from the low bits, so the two indices never alias. All
//! accesses are `Relaxed` — a torn write fails the XOR check and reads as a
//! miss, which is sound because every entry is self-describing.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use caro_core::Move;
use tracing::debug;

use crate::eval::MATE_THRESHOLD;

/// Number of shards; must be a power of two.
const SHARDS: usize = 16;

/// Entries per cluster.
const CLUSTER_SLOTS: usize = 3;

/// Bound type stored in a TT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    /// No bound information (empty slot).
    None = 0,
    /// The stored score is exact (PV node).
    Exact = 1,
    /// The stored score is a lower bound (beta cutoff).
    LowerBound = 2,
    /// The stored score is an upper bound (fail low).
    UpperBound = 3,
}

impl Bound {
    const fn from_bits(bits: u8) -> Bound {
        match bits & 0x03 {
            1 => Bound::Exact,
            2 => Bound::LowerBound,
            3 => Bound::UpperBound,
            _ => Bound::None,
        }
    }
}

/// Outcome of a probe against the current search window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The stored entry is deep enough and its bound cuts at this window:
    /// return `score` directly.
    Usable { score: i32, mv: Move },
    /// An entry exists but cannot cut; its move is still the best guess.
    Refer { mv: Move, eval: i32 },
    /// No matching entry.
    Miss,
}

/// Convert a search score to TT-storable form.
///
/// Mate scores are stored as distance-from-node instead of
/// distance-from-root so they are path-independent.
pub fn score_to_tt(score: i32, ply: u8) -> i16 {
    let adjusted = if score > MATE_THRESHOLD {
        score + ply as i32
    } else if score < -MATE_THRESHOLD {
        score - ply as i32
    } else {
        score
    };
    adjusted as i16
}

/// Reverse the mate-distance adjustment applied by [`score_to_tt`].
pub fn score_from_tt(score: i16, ply: u8) -> i32 {
    let score = score as i32;
    if score > MATE_THRESHOLD {
        score - ply as i32
    } else if score < -MATE_THRESHOLD {
        score + ply as i32
    } else {
        score
    }
}

// ── Entry and cluster layout ─────────────────────────────────────────────────

struct AtomicEntry {
    word0: AtomicU64,
    word1: AtomicU64,
}

/// Decoded fields of word0: `(key32, generation, bound, depth, move)`.
type Word0Fields = (u32, u8, Bound, u8, Move);

impl AtomicEntry {
    const fn new() -> AtomicEntry {
        AtomicEntry {
            word0: AtomicU64::new(0),
            word1: AtomicU64::new(0),
        }
    }

    fn pack_word0(key32: u32, generation: u8, bound: Bound, depth: u8, mv: Move) -> u64 {
        ((key32 as u64) << 32)
            | (((generation & 0x1F) as u64) << 27)
            | (((bound as u8) as u64) << 24)
            | ((depth as u64) << 16)
            | mv.raw() as u64
    }

    fn pack_word1(w0: u64, score: i16, eval: i16) -> u64 {
        let check = ((w0 >> 32) as u32) ^ (w0 & 0xFFFF_FFFF) as u32;
        ((check as u64) << 32) | (((score as u16) as u64) << 16) | (eval as u16) as u64
    }

    fn decode_w0(w0: u64) -> Word0Fields {
        (
            (w0 >> 32) as u32,
            ((w0 >> 27) & 0x1F) as u8,
            Bound::from_bits(((w0 >> 24) & 0x03) as u8),
            ((w0 >> 16) & 0xFF) as u8,
            Move::from_raw((w0 & 0xFFFF) as u16),
        )
    }

    /// Load and verify against `key32`. `None` on mismatch or torn write.
    fn load(&self, key32: u32) -> Option<(Word0Fields, u64)> {
        let w0 = self.word0.load(Ordering::Relaxed);
        let w1 = self.word1.load(Ordering::Relaxed);

        let stored_key = (w0 >> 32) as u32;
        let check_expected = stored_key ^ (w0 & 0xFFFF_FFFF) as u32;
        if check_expected != (w1 >> 32) as u32 {
            debug!("tt entry failed integrity check, treating as miss");
            return None;
        }
        if stored_key != key32 {
            return None;
        }
        Some((Self::decode_w0(w0), w1))
    }

    fn store(&self, w0: u64, w1: u64) {
        self.word0.store(w0, Ordering::Relaxed);
        self.word1.store(w1, Ordering::Relaxed);
    }

    fn peek_w0(&self) -> u64 {
        self.word0.load(Ordering::Relaxed)
    }
}

/// Three entries sharing one cache line.
#[repr(align(64))]
struct Cluster {
    slots: [AtomicEntry; CLUSTER_SLOTS],
}

impl Cluster {
    const fn new() -> Cluster {
        Cluster {
            slots: [AtomicEntry::new(), AtomicEntry::new(), AtomicEntry::new()],
        }
    }
}

/// One shard: its own cluster array and bucket mask.
struct Shard {
    clusters: Box<[Cluster]>,
    mask: u64,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// The process-wide transposition table.
///
/// All receivers are `&self`; the table is shared across workers by
/// reference (or `Arc` for pondering threads).
pub struct TranspositionTable {
    shards: [Shard; SHARDS],
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Allocate a table of roughly `mb` megabytes, split evenly across
    /// shards and rounded down to a power-of-two cluster count per shard.
    pub fn new(mb: usize) -> TranspositionTable {
        let bytes_per_shard = mb.max(1) * 1024 * 1024 / SHARDS;
        let clusters = (bytes_per_shard / std::mem::size_of::<Cluster>())
            .next_power_of_two()
            >> 1;
        let clusters = clusters.max(1);

        let shards = std::array::from_fn(|_| Shard {
            clusters: (0..clusters).map(|_| Cluster::new()).collect(),
            mask: (clusters - 1) as u64,
        });

        TranspositionTable {
            shards,
            generation: AtomicU8::new(0),
        }
    }

    /// Clear every entry and reset the generation counter.
    pub fn clear(&self) {
        for shard in &self.shards {
            for cluster in shard.clusters.iter() {
                for slot in &cluster.slots {
                    slot.word0.store(0, Ordering::Relaxed);
                    slot.word1.store(0, Ordering::Relaxed);
                }
            }
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Advance the generation counter. Called once per root search, so age
    /// is monotone across moves and older entries yield first.
    pub fn new_generation(&self) {
        let current = self.generation.load(Ordering::Relaxed);
        self.generation
            .store(current.wrapping_add(1) & 0x1F, Ordering::Relaxed);
    }

    fn cluster(&self, key: u64) -> &Cluster {
        // High bits pick the shard, low bits the bucket — no aliasing.
        let shard = &self.shards[((key >> 32) as usize) & (SHARDS - 1)];
        &shard.clusters[(key & shard.mask) as usize]
    }

    /// Probe for `key` against the `(alpha, beta)` window at `depth`.
    pub fn probe(&self, key: u64, depth: u8, alpha: i32, beta: i32, ply: u8) -> Probe {
        let key32 = (key >> 32) as u32;
        let cluster = self.cluster(key);

        for slot in &cluster.slots {
            let Some(((_, _, bound, entry_depth, mv), w1)) = slot.load(key32) else {
                continue;
            };
            if bound == Bound::None {
                continue;
            }
            let score = score_from_tt(((w1 >> 16) & 0xFFFF) as u16 as i16, ply);
            let eval = (w1 & 0xFFFF) as u16 as i16 as i32;

            if entry_depth >= depth {
                let cuts = match bound {
                    Bound::Exact => true,
                    Bound::LowerBound => score >= beta,
                    Bound::UpperBound => score <= alpha,
                    Bound::None => false,
                };
                if cuts {
                    return Probe::Usable { score, mv };
                }
            }
            return Probe::Refer { mv, eval };
        }
        Probe::Miss
    }

    /// Store an entry, evicting the least relevant slot in the cluster.
    ///
    /// Relevance is `depth − 2·(generation − entry_generation)`; a slot is
    /// only overwritten when the incoming entry's relevance is at least the
    /// victim's remaining depth (empty slots always lose).
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        key: u64,
        mv: Move,
        score: i32,
        depth: u8,
        bound: Bound,
        static_eval: i16,
        ply: u8,
    ) {
        let key32 = (key >> 32) as u32;
        let cluster = self.cluster(key);
        let generation = self.generation.load(Ordering::Relaxed);

        // Victim selection: a same-key slot is updated in place; otherwise
        // an empty slot is taken unconditionally; otherwise evict the slot
        // with the lowest depth-age relevance.
        let same_key = cluster.slots.iter().position(|slot| {
            let (slot_key, _, slot_bound, _, _) = AtomicEntry::decode_w0(slot.peek_w0());
            slot_bound != Bound::None && slot_key == key32
        });
        if same_key.is_none() {
            for slot in &cluster.slots {
                let (_, _, slot_bound, _, _) = AtomicEntry::decode_w0(slot.peek_w0());
                if slot_bound == Bound::None {
                    let w0 = AtomicEntry::pack_word0(key32, generation, bound, depth, mv);
                    let w1 = AtomicEntry::pack_word1(w0, score_to_tt(score, ply), static_eval);
                    slot.store(w0, w1);
                    return;
                }
            }
        }
        let victim = same_key.unwrap_or_else(|| {
            let mut best = 0;
            let mut best_relevance = i32::MAX;
            for (i, slot) in cluster.slots.iter().enumerate() {
                let (_, slot_gen, _, slot_depth, _) = AtomicEntry::decode_w0(slot.peek_w0());
                let age = (generation.wrapping_sub(slot_gen) & 0x1F) as i32;
                let relevance = slot_depth as i32 - 2 * age;
                if relevance < best_relevance {
                    best = i;
                    best_relevance = relevance;
                }
            }
            best
        });

        // Depth-age admission rule against the live victim.
        let (_, slot_gen, _, slot_depth, _) =
            AtomicEntry::decode_w0(cluster.slots[victim].peek_w0());
        let age = (generation.wrapping_sub(slot_gen) & 0x1F) as i32;
        if (depth as i32) + 2 * age < slot_depth as i32 {
            return;
        }

        let w0 = AtomicEntry::pack_word0(key32, generation, bound, depth, mv);
        let w1 = AtomicEntry::pack_word1(w0, score_to_tt(score, ply), static_eval);
        cluster.slots[victim].store(w0, w1);
    }
}

impl std::fmt::Debug for TranspositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clusters: usize = self.shards.iter().map(|s| s.clusters.len()).sum();
        f.debug_struct("TranspositionTable")
            .field("shards", &SHARDS)
            .field("clusters", &clusters)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
