use comms::Rank;
use rand::{SeedableRng, rngs::StdRng, seq::index};

/// Picks `per_round` distinct worker ranks uniformly at random every round.
#[derive(Debug, Clone)]
pub struct RandomSelector {
    rng: StdRng,
    total: usize,
    per_round: usize,
}

impl RandomSelector {
    /// Creates a new `RandomSelector`.
    ///
    /// # Arguments
    /// * `total` - The amount of workers to pick from, ranks `1..=total`.
    /// * `per_round` - The amount of workers picked every round, at most `total`.
    /// * `seed` - Makes the selections reproducible if given.
    pub fn new(total: usize, per_round: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            rng,
            total,
            per_round: per_round.min(total),
        }
    }

    /// Picks the ranks for the next round, in ascending order.
    pub fn select(&mut self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = index::sample(&mut self.rng, self.total, self.per_round)
            .into_iter()
            .map(|idx| idx + 1)
            .collect();

        ranks.sort_unstable();
        ranks
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn picks_distinct_ranks_in_range() {
        let mut selector = RandomSelector::new(10, 4, None);

        for _ in 0..100 {
            let ranks = selector.select();
            assert_eq!(ranks.len(), 4);
            assert!(ranks.iter().all(|r| (1..=10).contains(r)));
            assert_eq!(ranks.iter().collect::<HashSet<_>>().len(), 4);
        }
    }

    #[test]
    fn seeded_selections_are_reproducible() {
        let mut a = RandomSelector::new(20, 5, Some(7));
        let mut b = RandomSelector::new(20, 5, Some(7));

        for _ in 0..10 {
            assert_eq!(a.select(), b.select());
        }
    }

    #[test]
    fn full_participation_picks_everyone() {
        let mut selector = RandomSelector::new(3, 3, None);
        assert_eq!(selector.select(), vec![1, 2, 3]);
    }
}
