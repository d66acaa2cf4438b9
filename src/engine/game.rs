// Match simulator: plays a fixed number of prisoner's dilemma rounds
// between two strategy sources and produces the full move/score log.
//
// Fault policy, two tiers:
//   - a sandbox fault on one side forces only that side's move to
//     defect; the other side's move stands;
//   - a panic in the round bookkeeping itself (outside the two sandbox
//     calls) settles the round as mutual defect with the (1,1) payoff.
// Neither aborts the match.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::sandbox::{Move, Sandbox};
use crate::metrics;

/// Fixed payoff table, (own, opponent) points per round.
pub fn payoff(a: Move, b: Move) -> (i64, i64) {
    match (a, b) {
        (Move::Cooperate, Move::Cooperate) => (3, 3),
        (Move::Cooperate, Move::Defect) => (0, 5),
        (Move::Defect, Move::Cooperate) => (5, 0),
        (Move::Defect, Move::Defect) => (1, 1),
    }
}

/// Winner tag persisted with a match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    P1,
    P2,
    Draw,
}

impl Winner {
    pub fn as_str(self) -> &'static str {
        match self {
            Winner::P1 => "p1",
            Winner::P2 => "p2",
            Winner::Draw => "draw",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "p1" => Some(Winner::P1),
            "p2" => Some(Winner::P2),
            "draw" => Some(Winner::Draw),
            _ => None,
        }
    }
}

/// One round of the move log: 0-based round index, both moves, both
/// round scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub move_a: Move,
    pub move_b: Move,
    pub score_a: i64,
    pub score_b: i64,
}

/// Result of one complete match between two strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub rounds: u32,
    pub score_a: i64,
    pub score_b: i64,
    pub winner: Winner,
    pub moves: Vec<RoundRecord>,
}

/// Play a full match. Deterministic for fixed sources and round count:
/// round r sees only history accumulated through round r-1.
pub fn play_match(sandbox: &Sandbox, source_a: &str, source_b: &str, rounds: u32) -> MatchOutcome {
    metrics::MATCHES_STARTED_TOTAL.inc();
    let started = Instant::now();

    let mut history_a: Vec<Move> = Vec::with_capacity(rounds as usize);
    let mut history_b: Vec<Move> = Vec::with_capacity(rounds as usize);
    let mut moves: Vec<RoundRecord> = Vec::with_capacity(rounds as usize);
    let mut score_a: i64 = 0;
    let mut score_b: i64 = 0;

    for round in 0..rounds {
        // Per-side faults are asymmetric: only the faulting side is
        // forced to defect.
        let move_a = sandbox
            .decide(source_a, &history_b, &history_a, round)
            .unwrap_or(Move::Defect);
        let move_b = sandbox
            .decide(source_b, &history_a, &history_b, round)
            .unwrap_or(Move::Defect);

        let record = settle_round(round, || {
            let (ra, rb) = payoff(move_a, move_b);
            RoundRecord {
                round,
                move_a,
                move_b,
                score_a: ra,
                score_b: rb,
            }
        });

        score_a += record.score_a;
        score_b += record.score_b;
        history_a.push(record.move_a);
        history_b.push(record.move_b);
        moves.push(record);
    }

    let winner = if score_a > score_b {
        Winner::P1
    } else if score_b > score_a {
        Winner::P2
    } else {
        Winner::Draw
    };

    metrics::MATCHES_COMPLETED_TOTAL.inc();
    metrics::MATCH_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

    MatchOutcome {
        rounds,
        score_a,
        score_b,
        winner,
        moves,
    }
}

/// Run the round bookkeeping; a panic settles the round as mutual
/// defect instead of killing the match. Symmetric, unlike per-side
/// sandbox faults.
fn settle_round(round: u32, book: impl FnOnce() -> RoundRecord) -> RoundRecord {
    match std::panic::catch_unwind(AssertUnwindSafe(book)) {
        Ok(record) => record,
        Err(_) => {
            tracing::error!(round, "round bookkeeping panicked, settling as mutual defect");
            let (score_a, score_b) = payoff(Move::Defect, Move::Defect);
            RoundRecord {
                round,
                move_a: Move::Defect,
                move_b: Move::Defect,
                score_a,
                score_b,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::SandboxConfig;
    use std::time::Duration;

    const ALWAYS_COOPERATE: &str = r#"
        function decide() return "cooperate" end
    "#;

    const ALWAYS_DEFECT: &str = r#"
        function decide() return "defect" end
    "#;

    const TIT_FOR_TAT: &str = r#"
        function decide(opponent_history, my_history, round)
            if round == 0 then
                return "cooperate"
            end
            return opponent_history[#opponent_history]
        end
    "#;

    const ALWAYS_THROWS: &str = r#"
        function decide() error("broken strategy") end
    "#;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default())
    }

    #[test]
    fn test_payoff_table() {
        assert_eq!(payoff(Move::Cooperate, Move::Cooperate), (3, 3));
        assert_eq!(payoff(Move::Cooperate, Move::Defect), (0, 5));
        assert_eq!(payoff(Move::Defect, Move::Cooperate), (5, 0));
        assert_eq!(payoff(Move::Defect, Move::Defect), (1, 1));
    }

    #[test]
    fn test_mutual_cooperation_is_a_draw() {
        let result = play_match(&sandbox(), ALWAYS_COOPERATE, ALWAYS_COOPERATE, 10);
        assert_eq!(result.score_a, 30);
        assert_eq!(result.score_b, 30);
        assert_eq!(result.winner, Winner::Draw);
        assert_eq!(result.moves.len(), 10);
        assert!(result
            .moves
            .iter()
            .all(|r| r.move_a == Move::Cooperate && r.move_b == Move::Cooperate));
    }

    #[test]
    fn test_cooperator_exploited_by_defector() {
        let result = play_match(&sandbox(), ALWAYS_COOPERATE, ALWAYS_DEFECT, 10);
        assert_eq!(result.score_a, 0);
        assert_eq!(result.score_b, 50);
        assert_eq!(result.winner, Winner::P2);
    }

    #[test]
    fn test_tit_for_tat_versus_defector_200_rounds() {
        let result = play_match(&sandbox(), TIT_FOR_TAT, ALWAYS_DEFECT, 200);
        // Round 0: (0,5); rounds 1..199: mutual defect (1,1).
        assert_eq!(result.score_a, 199);
        assert_eq!(result.score_b, 204);
        assert_eq!(result.winner, Winner::P2);
        assert_eq!(result.moves[0].move_a, Move::Cooperate);
        assert!(result.moves[1..].iter().all(|r| r.move_a == Move::Defect));
    }

    #[test]
    fn test_no_lookahead_round_indexes() {
        let result = play_match(&sandbox(), TIT_FOR_TAT, TIT_FOR_TAT, 5);
        // Two tit-for-tats cooperate forever.
        assert_eq!(result.score_a, 15);
        assert_eq!(result.score_b, 15);
        for (i, record) in result.moves.iter().enumerate() {
            assert_eq!(record.round, i as u32);
        }
    }

    #[test]
    fn test_determinism() {
        let s = sandbox();
        let first = play_match(&s, TIT_FOR_TAT, ALWAYS_DEFECT, 50);
        let second = play_match(&s, TIT_FOR_TAT, ALWAYS_DEFECT, 50);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fault_forces_defect_for_faulting_side_only() {
        let result = play_match(&sandbox(), ALWAYS_THROWS, ALWAYS_COOPERATE, 5);
        // A defects by force every round, B keeps cooperating.
        assert_eq!(result.score_a, 25);
        assert_eq!(result.score_b, 0);
        assert_eq!(result.winner, Winner::P1);
        assert!(result
            .moves
            .iter()
            .all(|r| r.move_a == Move::Defect && r.move_b == Move::Cooperate));
    }

    #[test]
    fn test_faulting_both_sides_still_completes() {
        let result = play_match(&sandbox(), ALWAYS_THROWS, ALWAYS_THROWS, 5);
        assert_eq!(result.moves.len(), 5);
        assert_eq!(result.score_a, 5);
        assert_eq!(result.score_b, 5);
        assert_eq!(result.winner, Winner::Draw);
    }

    #[test]
    fn test_hung_strategy_completes_within_timeout_bound() {
        let spin = r#"
            function decide() while true do end end
        "#;
        let s = Sandbox::new(SandboxConfig {
            decide_timeout: Duration::from_millis(20),
        });
        let rounds = 3;
        let started = Instant::now();
        let result = play_match(&s, spin, ALWAYS_COOPERATE, rounds);
        assert_eq!(result.moves.len(), rounds as usize);
        assert!(result.moves.iter().all(|r| r.move_a == Move::Defect));
        // Per-call timeout x rounds, with slack for VM setup.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_settle_round_absorbs_bookkeeping_panic() {
        let record = settle_round(7, || panic!("bookkeeping bug"));
        assert_eq!(record.round, 7);
        assert_eq!(record.move_a, Move::Defect);
        assert_eq!(record.move_b, Move::Defect);
        assert_eq!((record.score_a, record.score_b), (1, 1));
    }

    #[test]
    fn test_winner_strictly_higher_total() {
        let result = play_match(&sandbox(), ALWAYS_DEFECT, ALWAYS_DEFECT, 10);
        assert_eq!(result.score_a, result.score_b);
        assert_eq!(result.winner, Winner::Draw);
    }

    #[test]
    fn test_winner_round_trip() {
        for w in [Winner::P1, Winner::P2, Winner::Draw] {
            assert_eq!(Winner::from_str_name(w.as_str()), Some(w));
        }
        assert_eq!(Winner::from_str_name("p3"), None);
    }
}
