//! Difficulty levels and engine configuration.

/// Playing strength preset, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    Braindead,
    Easy,
    Medium,
    Hard,
    Grandmaster,
    /// Grandmaster strength with every experimental feature enabled.
    Experimental,
}

/// The knobs a difficulty preset controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyConfig {
    /// Worker threads for the parallel driver.
    pub threads: usize,
    /// Fraction of the nominal time allocation actually spent.
    pub time_fraction: f64,
    /// Probability of substituting a random (non-losing) move.
    pub error_probability: f64,
    /// Deepest ply at which the opening book is consulted.
    pub book_max_ply: u16,
    /// VCF pre-search budget in fours; `None` disables it.
    pub vcf_fours: Option<u8>,
    /// Whether pondering on the opponent's clock is allowed.
    pub pondering: bool,
    /// Whether the parallel driver may spawn helpers at all.
    pub parallel: bool,
}

impl Difficulty {
    /// All presets, weakest first.
    pub const ALL: [Difficulty; 6] = [
        Difficulty::Braindead,
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Grandmaster,
        Difficulty::Experimental,
    ];

    /// The preset's configuration record.
    pub fn config(self) -> DifficultyConfig {
        match self {
            Difficulty::Braindead => DifficultyConfig {
                threads: 1,
                time_fraction: 0.05,
                error_probability: 0.10,
                book_max_ply: 2,
                vcf_fours: None,
                pondering: false,
                parallel: false,
            },
            Difficulty::Easy => DifficultyConfig {
                threads: 2,
                time_fraction: 0.20,
                error_probability: 0.0,
                book_max_ply: 4,
                vcf_fours: None,
                pondering: false,
                parallel: true,
            },
            Difficulty::Medium => DifficultyConfig {
                threads: 3,
                time_fraction: 0.50,
                error_probability: 0.0,
                book_max_ply: 6,
                vcf_fours: Some(4),
                pondering: false,
                parallel: true,
            },
            Difficulty::Hard => DifficultyConfig {
                threads: 4,
                time_fraction: 0.75,
                error_probability: 0.0,
                book_max_ply: 8,
                vcf_fours: Some(8),
                pondering: false,
                parallel: true,
            },
            Difficulty::Grandmaster | Difficulty::Experimental => DifficultyConfig {
                threads: grandmaster_threads(),
                time_fraction: 1.0,
                error_probability: 0.0,
                book_max_ply: 12,
                vcf_fours: Some(16),
                pondering: true,
                parallel: true,
            },
        }
    }
}

/// Grandmaster worker count: at least five, scaling with the machine.
fn grandmaster_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).saturating_sub(1).max(5)
}

/// Engine-level options recognised by the core (not persisted).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Transposition table capacity in megabytes.
    pub tt_size_mb: usize,
    /// Worker count override; `None` uses the difficulty's setting.
    pub threads: Option<usize>,
    /// Gate for the opening-book consultation.
    pub enable_opening_book: bool,
    /// Override for the book's maximum ply; `None` uses the difficulty's.
    pub book_depth_limit: Option<u16>,
    /// Gate for background search on the opponent's clock.
    pub enable_pondering: bool,
    /// Scheduling hint: only ponder while the opponent's clock runs.
    pub ponder_on_enemy_time: bool,
    /// Single worker, fixed node budget, no wall-clock cutoff.
    pub deterministic: bool,
    /// Node budget per search when `deterministic` is set.
    pub deterministic_nodes: u64,
    /// Seed for book tie-breaks and the Braindead error roll.
    pub rng_seed: u64,
}

impl EngineOptions {
    /// Smallest accepted transposition table.
    pub const MIN_TT_MB: usize = 16;

    /// Largest accepted transposition table.
    pub const MAX_TT_MB: usize = 4096;

    /// The table size clamped to the accepted range.
    pub fn clamped_tt_mb(&self) -> usize {
        self.tt_size_mb.clamp(Self::MIN_TT_MB, Self::MAX_TT_MB)
    }
}

impl Default for EngineOptions {
    fn default() -> EngineOptions {
        EngineOptions {
            tt_size_mb: 64,
            threads: None,
            enable_opening_book: true,
            book_depth_limit: None,
            enable_pondering: false,
            ponder_on_enemy_time: true,
            deterministic: false,
            deterministic_nodes: 200_000,
            rng_seed: 0x5EED_CA20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_ordering_matches_strength() {
        assert!(Difficulty::Braindead < Difficulty::Easy);
        assert!(Difficulty::Easy < Difficulty::Medium);
        assert!(Difficulty::Hard < Difficulty::Grandmaster);
    }

    #[test]
    fn thread_counts_follow_the_ladder() {
        assert_eq!(Difficulty::Braindead.config().threads, 1);
        assert_eq!(Difficulty::Easy.config().threads, 2);
        assert_eq!(Difficulty::Medium.config().threads, 3);
        assert_eq!(Difficulty::Hard.config().threads, 4);
        assert!(Difficulty::Grandmaster.config().threads >= 5);
    }

    #[test]
    fn only_braindead_blunders_on_purpose() {
        for difficulty in Difficulty::ALL {
            let config = difficulty.config();
            if difficulty == Difficulty::Braindead {
                assert!(config.error_probability > 0.0);
            } else {
                assert_eq!(config.error_probability, 0.0);
            }
        }
    }

    #[test]
    fn tt_size_is_clamped() {
        let mut options = EngineOptions::default();
        options.tt_size_mb = 1;
        assert_eq!(options.clamped_tt_mb(), 16);
        options.tt_size_mb = 100_000;
        assert_eq!(options.clamped_tt_mb(), 4096);
        options.tt_size_mb = 256;
        assert_eq!(options.clamped_tt_mb(), 256);
    }

    #[test]
    fn book_ply_grows_with_difficulty() {
        let plies: Vec<u16> = Difficulty::ALL
            .iter()
            .map(|d| d.config().book_max_ply)
            .collect();
        for pair in plies.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
