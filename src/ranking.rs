//! Candidate Ranker.

use crate::config::RankingConfig;
use crate::profile::ConstraintProfile;

/// Orders eligible staff for an open slot, furthest-behind first.
#[derive(Debug, Clone, Default)]
pub struct CandidateRanker {
    config: RankingConfig,
}

impl CandidateRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// `base - days * per_day_penalty`, plus the target and minimum bonuses
    /// while the staff member is still below those figures.
    pub fn score(&self, profile: &ConstraintProfile) -> i64 {
        let days = i64::from(profile.assigned_days);
        let mut score = self.config.base - days * self.config.per_day_penalty;
        if profile.assigned_days < profile.target_days {
            score += self.config.below_target_bonus;
        }
        if profile.assigned_days < profile.min_days {
            score += self.config.below_minimum_bonus;
        }
        score
    }

    /// Sorts profile indices by descending score. Ties keep input order.
    pub fn rank(&self, profiles: &[ConstraintProfile], candidates: &mut [usize]) {
        candidates.sort_by_cached_key(|&idx| std::cmp::Reverse(self.score(&profiles[idx])));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn profile(id: &str, assigned: u32, min: u32, target: u32) -> ConstraintProfile {
        ConstraintProfile {
            staff_idx: 0,
            staff_id: id.to_string(),
            unavailable: BTreeSet::new(),
            forbidden: BTreeSet::new(),
            max_possible_days: 31,
            target_days: target,
            min_days: min,
            max_days: 23,
            assigned_days: assigned,
            assignments: Vec::new(),
        }
    }

    #[test]
    fn test_score_bonuses() {
        let ranker = CandidateRanker::default();
        assert_eq!(ranker.score(&profile("a", 0, 15, 20)), 1300);
        assert_eq!(ranker.score(&profile("b", 16, 15, 20)), 940);
        assert_eq!(ranker.score(&profile("c", 20, 15, 20)), 800);
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let ranker = CandidateRanker::default();
        let profiles = vec![
            profile("a", 3, 15, 20),
            profile("b", 1, 15, 20),
            profile("c", 3, 15, 20),
            profile("d", 1, 15, 20),
        ];
        let mut order = vec![0, 1, 2, 3];
        ranker.rank(&profiles, &mut order);
        assert_eq!(order, vec![1, 3, 0, 2]);
    }
}
