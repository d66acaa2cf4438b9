// Tournament domain types: lifecycle states, round-robin pairing and
// final standings computation.

use serde::{Deserialize, Serialize};

use crate::db::Participant;

/// Tournament lifecycle. Transitions are enforced in SQL with
/// compare-and-set updates (see Database::begin_run and friends):
/// pending -> running -> completed | failed, and either terminal state
/// back to pending via reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TournamentStatus {
    pub fn as_str_name(self) -> &'static str {
        match self {
            TournamentStatus::Pending => "pending",
            TournamentStatus::Running => "running",
            TournamentStatus::Completed => "completed",
            TournamentStatus::Failed => "failed",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TournamentStatus::Pending),
            "running" => Some(TournamentStatus::Running),
            "completed" => Some(TournamentStatus::Completed),
            "failed" => Some(TournamentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TournamentStatus::Completed | TournamentStatus::Failed)
    }
}

/// All unordered pairs over `count` participants, enumerated in the
/// fixed order (0,1), (0,2), .., (1,2), .. Every run of the same field
/// produces the same schedule.
pub fn round_robin_pairs(count: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(count.saturating_sub(1) * count / 2);
    for i in 0..count {
        for j in (i + 1)..count {
            pairs.push((i, j));
        }
    }
    pairs
}

/// One row of the final table for a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStanding {
    pub participant_id: i64,
    pub average_score: f64,
    pub rank: i64,
}

/// Compute averages and ranks from accumulated participant scores.
///
/// Ordering is total score descending with participant id ascending as
/// the tie-break, so standings are reproducible. Rank is the 1-based
/// position in that order: equal totals still get distinct consecutive
/// ranks, and the ranks of a field of N always form a permutation of
/// 1..N. A participant with no games averages 0.
pub fn finalize_standings(participants: &[Participant]) -> Vec<FinalStanding> {
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then(a.id.cmp(&b.id))
    });

    let mut standings = Vec::with_capacity(ordered.len());
    for (position, p) in ordered.iter().enumerate() {
        let games = p.wins + p.losses + p.draws;
        let average_score = if games > 0 {
            p.total_score as f64 / games as f64
        } else {
            0.0
        };
        standings.push(FinalStanding {
            participant_id: p.id,
            average_score,
            rank: position as i64 + 1,
        });
    }
    standings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: i64, total_score: i64, wins: i64, losses: i64, draws: i64) -> Participant {
        Participant {
            id,
            tournament_id: 1,
            user_id: id,
            strategy_id: id,
            total_score,
            wins,
            losses,
            draws,
            average_score: 0.0,
            rank: None,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TournamentStatus::Pending,
            TournamentStatus::Running,
            TournamentStatus::Completed,
            TournamentStatus::Failed,
        ] {
            assert_eq!(
                TournamentStatus::from_str_name(status.as_str_name()),
                Some(status)
            );
        }
        assert_eq!(TournamentStatus::from_str_name("paused"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TournamentStatus::Pending.is_terminal());
        assert!(!TournamentStatus::Running.is_terminal());
        assert!(TournamentStatus::Completed.is_terminal());
        assert!(TournamentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_round_robin_pair_count() {
        assert!(round_robin_pairs(0).is_empty());
        assert!(round_robin_pairs(1).is_empty());
        assert_eq!(round_robin_pairs(2), vec![(0, 1)]);
        assert_eq!(round_robin_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        // N(N-1)/2 pairs, no self-pairing, no duplicates.
        let pairs = round_robin_pairs(8);
        assert_eq!(pairs.len(), 28);
        assert!(pairs.iter().all(|&(i, j)| i < j));
    }

    #[test]
    fn test_round_robin_order_is_stable() {
        assert_eq!(round_robin_pairs(4), round_robin_pairs(4));
        assert_eq!(
            round_robin_pairs(4),
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn test_standings_sorted_by_total_desc() {
        let field = vec![
            participant(1, 39, 0, 1, 1),
            participant(2, 30, 0, 1, 1),
            participant(3, 64, 2, 0, 0),
        ];
        let standings = finalize_standings(&field);
        assert_eq!(standings[0].participant_id, 3);
        assert_eq!(standings[0].rank, 1);
        assert_eq!(standings[1].participant_id, 1);
        assert_eq!(standings[1].rank, 2);
        assert_eq!(standings[2].participant_id, 2);
        assert_eq!(standings[2].rank, 3);
    }

    #[test]
    fn test_tied_totals_get_distinct_consecutive_ranks() {
        let field = vec![
            participant(1, 50, 1, 0, 1),
            participant(2, 50, 1, 0, 1),
            participant(3, 10, 0, 2, 0),
        ];
        let standings = finalize_standings(&field);
        // Equal totals never share a rank; the id tie-break decides
        // who takes the earlier position.
        assert_eq!(standings[0].participant_id, 1);
        assert_eq!(standings[0].rank, 1);
        assert_eq!(standings[1].participant_id, 2);
        assert_eq!(standings[1].rank, 2);
        assert_eq!(standings[2].rank, 3);

        let mut ranks: Vec<i64> = standings.iter().map(|s| s.rank).collect();
        ranks.sort();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_ranks_are_a_permutation() {
        // All-tied field: ranks must still be 1..N.
        let field: Vec<Participant> = (1..=6).map(|id| participant(id, 40, 0, 0, 5)).collect();
        let standings = finalize_standings(&field);
        let ranks: Vec<i64> = standings.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, (1..=6).collect::<Vec<i64>>());
    }

    #[test]
    fn test_tie_break_by_participant_id() {
        let field = vec![participant(9, 50, 1, 1, 0), participant(4, 50, 1, 1, 0)];
        let standings = finalize_standings(&field);
        assert_eq!(standings[0].participant_id, 4);
        assert_eq!(standings[0].rank, 1);
        assert_eq!(standings[1].participant_id, 9);
        assert_eq!(standings[1].rank, 2);
    }

    #[test]
    fn test_average_score() {
        let field = vec![participant(1, 39, 0, 1, 1), participant(2, 0, 0, 0, 0)];
        let standings = finalize_standings(&field);
        assert!((standings[0].average_score - 19.5).abs() < f64::EPSILON);
        // No games played: average is zero, never a division by zero.
        assert_eq!(standings[1].average_score, 0.0);
    }

    #[test]
    fn test_empty_field() {
        assert!(finalize_standings(&[]).is_empty());
    }
}
