// Round-robin orchestrator: the background job that takes a pending
// tournament through its full pairing schedule and leaves behind a
// complete, reproducible set of match records and final standings.
//
// A run is wipe-and-recompute: participant counters and match records
// from any earlier run are cleared first, so re-running a reopened
// tournament converges on identical results.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::db::{Database, Participant};
use crate::engine::game::{MatchOutcome, Winner};
use crate::engine::sandbox::Sandbox;
use crate::error::EngineError;
use crate::metrics;
use crate::replay;
use crate::tournament::{self, round_robin_pairs};
use crate::worker_pool::{MatchCompletion, MatchJob, WorkerPool};

/// Poll interval while the pool is saturated by other runs.
const POOL_BUSY_POLL: Duration = Duration::from_millis(500);

pub async fn create_tournament(
    db: &Database,
    name: &str,
    rounds_per_match: i64,
    created_by: Option<i64>,
) -> Result<crate::db::Tournament, EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("tournament name is required".into()));
    }
    if rounds_per_match < 1 {
        return Err(EngineError::Validation(
            "rounds_per_match must be at least 1".into(),
        ));
    }
    Ok(db.create_tournament(name, rounds_per_match, created_by).await?)
}

/// Bind one of the caller's strategies to a tournament slot. Selection
/// is only open while the tournament is pending; re-selection replaces
/// the previously bound strategy.
pub async fn select_strategy(
    db: &Database,
    tournament_id: i64,
    user_id: i64,
    strategy_id: i64,
) -> Result<Participant, EngineError> {
    let t = db
        .get_tournament(tournament_id)
        .await?
        .ok_or_else(|| EngineError::Validation("tournament not found".into()))?;
    if t.status != "pending" {
        return Err(EngineError::Conflict(format!(
            "tournament is {}, selection is closed",
            t.status
        )));
    }

    let strategy = db
        .get_strategy(strategy_id)
        .await?
        .ok_or_else(|| EngineError::Validation("strategy not found".into()))?;
    if strategy.user_id != user_id {
        return Err(EngineError::Ownership(
            "strategy belongs to another user".into(),
        ));
    }
    if !strategy.is_active {
        return Err(EngineError::Validation("strategy is not active".into()));
    }

    Ok(db.upsert_participant(tournament_id, user_id, strategy_id).await?)
}

/// Execute one full tournament run to a terminal state.
///
/// Preconditions are checked before the status transition; the
/// pending -> running step itself is the compare-and-set in
/// `Database::begin_run`, so two concurrent callers cannot both start
/// the same run. Any error after that point lands the tournament in
/// `failed` with the message recorded.
pub async fn run_tournament(
    db: &Database,
    pool: &WorkerPool,
    sandbox: &Sandbox,
    tournament_id: i64,
) -> Result<(), EngineError> {
    let tournament = db
        .get_tournament(tournament_id)
        .await?
        .ok_or_else(|| EngineError::Validation("tournament not found".into()))?;

    let rounds_per_match = u32::try_from(tournament.rounds_per_match)
        .ok()
        .filter(|&r| r >= 1)
        .ok_or_else(|| EngineError::Validation("rounds_per_match is out of range".into()))?;
    let participants = db.list_participants(tournament_id).await?;
    if participants.len() < 2 {
        return Err(EngineError::Validation(
            "a tournament needs at least two participants".into(),
        ));
    }

    if !db.begin_run(tournament_id).await? {
        return Err(EngineError::Conflict(format!(
            "tournament is {}, not pending",
            tournament.status
        )));
    }

    metrics::TOURNAMENTS_RUNNING.inc();
    tracing::info!(
        tournament_id,
        participants = participants.len(),
        rounds_per_match = tournament.rounds_per_match,
        "tournament run started"
    );

    let result = drive_run(
        db,
        pool,
        sandbox,
        tournament_id,
        &participants,
        rounds_per_match,
    )
    .await;
    metrics::TOURNAMENTS_RUNNING.dec();

    match result {
        Ok(()) => {
            db.finish_run(tournament_id).await?;
            metrics::TOURNAMENTS_COMPLETED_TOTAL.inc();
            tracing::info!(tournament_id, "tournament run completed");
            Ok(())
        }
        Err(e) => {
            metrics::TOURNAMENTS_FAILED_TOTAL.inc();
            tracing::error!(tournament_id, error = %e, "tournament run failed");
            // Best effort: the original error is the one worth surfacing
            // even if recording it fails too.
            if let Err(record_err) = db.fail_run(tournament_id, &e.to_string()).await {
                tracing::error!(tournament_id, error = %record_err, "failed to record run failure");
            }
            Err(e)
        }
    }
}

/// The run body between begin_run and the terminal transition.
async fn drive_run(
    db: &Database,
    pool: &WorkerPool,
    sandbox: &Sandbox,
    tournament_id: i64,
    participants: &[Participant],
    rounds_per_match: u32,
) -> Result<(), EngineError> {
    db.reset_participants(tournament_id).await?;
    db.clear_matches(tournament_id).await?;

    let mut sources = Vec::with_capacity(participants.len());
    for p in participants {
        let strategy = db.get_strategy(p.strategy_id).await?.ok_or_else(|| {
            EngineError::Internal(format!(
                "participant {} references missing strategy {}",
                p.id, p.strategy_id
            ))
        })?;
        sources.push(strategy.code);
    }

    let pairs = round_robin_pairs(participants.len());
    let (tx, mut rx) = mpsc::unbounded_channel::<MatchCompletion>();

    // Matches run in parallel on the pool, but results are applied
    // strictly in pair-enumeration order, buffered until their turn.
    // That keeps match record ids and score application reproducible.
    let mut next_dispatch = 0usize;
    let mut in_flight = 0usize;
    let mut next_apply = 0usize;
    let mut ready: BTreeMap<usize, MatchOutcome> = BTreeMap::new();

    while next_apply < pairs.len() {
        while next_dispatch < pairs.len() {
            let (i, j) = pairs[next_dispatch];
            let job = MatchJob {
                pair_index: next_dispatch,
                source_a: sources[i].clone(),
                source_b: sources[j].clone(),
                rounds: rounds_per_match,
            };
            if !pool.spawn_match(sandbox.clone(), job, tx.clone()) {
                break;
            }
            next_dispatch += 1;
            in_flight += 1;
        }

        if in_flight == 0 {
            // Pool saturated by other runs; wait for a slot.
            tokio::time::sleep(POOL_BUSY_POLL).await;
            continue;
        }

        let completion = rx.recv().await.ok_or_else(|| {
            EngineError::Internal("match worker channel closed mid-run".into())
        })?;
        in_flight -= 1;
        ready.insert(completion.pair_index, completion.outcome);

        while let Some(outcome) = ready.remove(&next_apply) {
            let (i, j) = pairs[next_apply];
            persist_match(db, tournament_id, &participants[i], &participants[j], &outcome)
                .await?;
            next_apply += 1;
        }
    }

    let scored = db.list_participants(tournament_id).await?;
    for standing in tournament::finalize_standings(&scored) {
        db.set_final_standing(standing.participant_id, standing.average_score, standing.rank)
            .await?;
    }
    Ok(())
}

async fn persist_match(
    db: &Database,
    tournament_id: i64,
    p1: &Participant,
    p2: &Participant,
    outcome: &MatchOutcome,
) -> Result<(), EngineError> {
    let move_log = replay::compress_move_log(&outcome.moves)
        .map_err(|e| EngineError::Internal(format!("move log compression failed: {e}")))?;

    db.insert_match(
        tournament_id,
        p1.id,
        p2.id,
        p1.strategy_id,
        p2.strategy_id,
        outcome.rounds as i64,
        outcome.score_a,
        outcome.score_b,
        outcome.winner.as_str(),
        &move_log,
    )
    .await?;

    let (w1, l1, d1) = match outcome.winner {
        Winner::P1 => (true, false, false),
        Winner::P2 => (false, true, false),
        Winner::Draw => (false, false, true),
    };
    db.apply_match_result(p1.id, outcome.score_a, w1, l1, d1).await?;
    db.apply_match_result(p2.id, outcome.score_b, l1, w1, d1).await?;
    Ok(())
}

/// Run a tournament as a detached background job; the HTTP layer
/// returns immediately after spawning.
pub fn spawn_run(
    db: Arc<Database>,
    pool: Arc<WorkerPool>,
    sandbox: Sandbox,
    tournament_id: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_tournament(&db, &pool, &sandbox, tournament_id).await {
            tracing::error!(tournament_id, error = %e, "background tournament run failed");
        }
    })
}
