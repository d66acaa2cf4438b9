// Weekly tournament scheduler.
//
// In production the cadence is Saturday 20:00 local time: each cycle
// creates a tournament, enrolls every user's newest active strategy
// and runs it. A dev interval can replace the weekly cadence for local
// testing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

use crate::db::Database;
use crate::engine::sandbox::Sandbox;
use crate::error::EngineError;
use crate::orchestrator;
use crate::worker_pool::WorkerPool;

pub const WEEKLY_WEEKDAY: Weekday = Weekday::Sat;
pub const WEEKLY_ROUNDS_PER_MATCH: i64 = 200;

fn weekly_time() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).unwrap()
}

/// Next occurrence of `target` weekday at time `at`, strictly after
/// `now`. If today is the target day but the time has already passed
/// (or is exactly now), the run lands a full week out.
pub fn next_weekly_run(now: NaiveDateTime, target: Weekday, at: NaiveTime) -> NaiveDateTime {
    let days_ahead = (target.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let mut candidate = (now.date() + chrono::Duration::days(days_ahead)).and_time(at);
    if candidate <= now {
        candidate += chrono::Duration::days(7);
    }
    candidate
}

/// One scheduler cycle: create the weekly tournament, enroll the
/// current field and run it. A field under two entrants leaves the
/// tournament pending for a later manual run.
pub async fn run_weekly(
    db: &Database,
    pool: &WorkerPool,
    sandbox: &Sandbox,
) -> Result<(), EngineError> {
    let name = format!(
        "Weekly Tournament {}",
        chrono::Local::now().format("%Y-%m-%d")
    );
    let tournament =
        orchestrator::create_tournament(db, &name, WEEKLY_ROUNDS_PER_MATCH, None).await?;
    let enrolled = db.enroll_active_strategies(tournament.id).await?;
    tracing::info!(tournament_id = tournament.id, enrolled, "weekly tournament created");

    if enrolled < 2 {
        tracing::warn!(
            tournament_id = tournament.id,
            enrolled,
            "not enough active strategies, skipping run"
        );
        return Ok(());
    }
    orchestrator::run_tournament(db, pool, sandbox, tournament.id).await
}

/// Spawn the scheduler loop. With `dev_interval` set the loop fires on
/// that fixed interval instead of the weekly cadence.
pub fn spawn_scheduler(
    db: Arc<Database>,
    pool: Arc<WorkerPool>,
    sandbox: Sandbox,
    dev_interval: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match dev_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => {
                    let now = chrono::Local::now().naive_local();
                    let next = next_weekly_run(now, WEEKLY_WEEKDAY, weekly_time());
                    let wait = (next - now)
                        .to_std()
                        .unwrap_or(Duration::from_secs(1));
                    tracing::info!(next = %next, "next weekly tournament scheduled");
                    tokio::time::sleep(wait).await;
                }
            }
            if let Err(e) = run_weekly(&db, &pool, &sandbox).await {
                tracing::error!(error = %e, "weekly tournament cycle failed");
            }
        }
    })
}
