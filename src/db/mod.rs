// Database access layer (SQLite via sqlx).
//
// This is the persistence port the orchestrator runs against:
// strategies, tournaments, participants and match records, plus the
// atomic status transitions that guard the tournament lifecycle.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::tournament::TournamentStatus;

/// A stored, user-authored decision program.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Strategy {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub code: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub rounds_per_match: i64,
    pub scheduled_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_by: Option<i64>,
}

/// A tournament-scoped binding of a user to one strategy, carrying the
/// running score state. One row per (tournament, user).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub id: i64,
    pub tournament_id: i64,
    pub user_id: i64,
    pub strategy_id: i64,
    pub total_score: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub average_score: f64,
    pub rank: Option<i64>,
}

/// One immutable record per unordered participant pair per run.
/// `move_log` is the gzip-compressed round log (see crate::replay).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchRecord {
    pub id: i64,
    pub tournament_id: i64,
    pub participant1_id: i64,
    pub participant2_id: i64,
    pub strategy1_id: i64,
    pub strategy2_id: i64,
    pub rounds: i64,
    pub score1: i64,
    pub score2: i64,
    pub winner: String,
    #[serde(skip_serializing)]
    pub move_log: Vec<u8>,
    pub created_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Each pooled connection to an in-memory SQLite database sees
        // a distinct database, so tests must stay on one connection.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn pool_for_tests(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                code TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournaments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                rounds_per_match INTEGER NOT NULL DEFAULT 200,
                scheduled_at TEXT NOT NULL DEFAULT (datetime('now')),
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                created_by INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tournament_id INTEGER NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                strategy_id INTEGER NOT NULL REFERENCES strategies(id),
                total_score INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                average_score REAL NOT NULL DEFAULT 0,
                rank INTEGER,
                UNIQUE(tournament_id, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tournament_id INTEGER NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
                participant1_id INTEGER NOT NULL REFERENCES participants(id),
                participant2_id INTEGER NOT NULL REFERENCES participants(id),
                strategy1_id INTEGER NOT NULL,
                strategy2_id INTEGER NOT NULL,
                rounds INTEGER NOT NULL,
                score1 INTEGER NOT NULL,
                score2 INTEGER NOT NULL,
                winner TEXT NOT NULL,
                move_log BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Strategies ────────────────────────────────────────────────────

    pub async fn create_strategy(
        &self,
        user_id: i64,
        name: &str,
        code: &str,
    ) -> Result<Strategy, sqlx::Error> {
        let row = sqlx::query_as::<_, Strategy>(
            "INSERT INTO strategies (user_id, name, code) VALUES (?, ?, ?) RETURNING id, user_id, name, code, is_active, created_at, updated_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>, sqlx::Error> {
        let row = sqlx::query_as::<_, Strategy>(
            "SELECT id, user_id, name, code, is_active, created_at, updated_at FROM strategies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_strategies(&self) -> Result<Vec<Strategy>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Strategy>(
            "SELECT id, user_id, name, code, is_active, created_at, updated_at FROM strategies ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_strategies_by_user(&self, user_id: i64) -> Result<Vec<Strategy>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Strategy>(
            "SELECT id, user_id, name, code, is_active, created_at, updated_at FROM strategies WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_strategy_code(&self, id: i64, code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE strategies SET code = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(code)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_strategy_active(&self, id: i64, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE strategies SET is_active = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(active)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Identity/ownership port: does this caller own this strategy?
    pub async fn strategy_owned_by(
        &self,
        strategy_id: i64,
        user_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM strategies WHERE id = ? AND user_id = ?",
        )
        .bind(strategy_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    // ── Tournaments ───────────────────────────────────────────────────

    pub async fn create_tournament(
        &self,
        name: &str,
        rounds_per_match: i64,
        created_by: Option<i64>,
    ) -> Result<Tournament, sqlx::Error> {
        let row = sqlx::query_as::<_, Tournament>(
            "INSERT INTO tournaments (name, rounds_per_match, created_by) VALUES (?, ?, ?) RETURNING id, name, status, rounds_per_match, scheduled_at, started_at, completed_at, error_message, created_by",
        )
        .bind(name)
        .bind(rounds_per_match)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_tournament(&self, id: i64) -> Result<Option<Tournament>, sqlx::Error> {
        let row = sqlx::query_as::<_, Tournament>(
            "SELECT id, name, status, rounds_per_match, scheduled_at, started_at, completed_at, error_message, created_by FROM tournaments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_tournaments(&self) -> Result<Vec<Tournament>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Tournament>(
            "SELECT id, name, status, rounds_per_match, scheduled_at, started_at, completed_at, error_message, created_by FROM tournaments ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Atomic pending → running transition. The WHERE clause on status
    /// is the compare-and-set that closes the check-then-write race:
    /// of two concurrent starts, exactly one sees rows_affected = 1.
    pub async fn begin_run(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tournaments SET status = ?, started_at = datetime('now'), error_message = NULL WHERE id = ? AND status = ?",
        )
        .bind(TournamentStatus::Running.as_str_name())
        .bind(id)
        .bind(TournamentStatus::Pending.as_str_name())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// running → completed.
    pub async fn finish_run(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tournaments SET status = ?, completed_at = datetime('now') WHERE id = ? AND status = ?",
        )
        .bind(TournamentStatus::Completed.as_str_name())
        .bind(id)
        .bind(TournamentStatus::Running.as_str_name())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// running → failed, capturing the error message.
    pub async fn fail_run(&self, id: i64, error_message: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tournaments SET status = ?, error_message = ?, completed_at = datetime('now') WHERE id = ? AND status = ?",
        )
        .bind(TournamentStatus::Failed.as_str_name())
        .bind(error_message)
        .bind(id)
        .bind(TournamentStatus::Running.as_str_name())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal → pending, making a later run a new orchestration pass
    /// over the same tournament id.
    pub async fn reopen(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tournaments SET status = ?, started_at = NULL, completed_at = NULL, error_message = NULL WHERE id = ? AND status IN (?, ?)",
        )
        .bind(TournamentStatus::Pending.as_str_name())
        .bind(id)
        .bind(TournamentStatus::Completed.as_str_name())
        .bind(TournamentStatus::Failed.as_str_name())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Participants ──────────────────────────────────────────────────

    /// Bind a user's strategy to a tournament slot. At most one row per
    /// (tournament, user): re-selection replaces the bound strategy.
    pub async fn upsert_participant(
        &self,
        tournament_id: i64,
        user_id: i64,
        strategy_id: i64,
    ) -> Result<Participant, sqlx::Error> {
        let row = sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO participants (tournament_id, user_id, strategy_id)
            VALUES (?, ?, ?)
            ON CONFLICT(tournament_id, user_id) DO UPDATE SET strategy_id = excluded.strategy_id
            RETURNING id, tournament_id, user_id, strategy_id, total_score, wins, losses, draws, average_score, rank
        "#,
        )
        .bind(tournament_id)
        .bind(user_id)
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Enroll every user with an active strategy, binding each user's
    /// newest active strategy. Used by the weekly scheduler.
    pub async fn enroll_active_strategies(&self, tournament_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO participants (tournament_id, user_id, strategy_id)
            SELECT ?, user_id, MAX(id) FROM strategies WHERE is_active = 1 GROUP BY user_id
            ON CONFLICT(tournament_id, user_id) DO UPDATE SET strategy_id = excluded.strategy_id
        "#,
        )
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Participants in load order (by id); this is the pairing order
    /// the orchestrator reproduces on every run.
    pub async fn list_participants(
        &self,
        tournament_id: i64,
    ) -> Result<Vec<Participant>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Participant>(
            "SELECT id, tournament_id, user_id, strategy_id, total_score, wins, losses, draws, average_score, rank FROM participants WHERE tournament_id = ? ORDER BY id",
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Zero all counters and clear ranks for a fresh run. The selection
    /// rows themselves survive; a run is a wipe-and-recompute of scores.
    pub async fn reset_participants(&self, tournament_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE participants SET total_score = 0, wins = 0, losses = 0, draws = 0, average_score = 0, rank = NULL WHERE tournament_id = ?",
        )
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fold one match result into a participant row. The increments are
    /// applied in a single UPDATE, so concurrent aggregation cannot
    /// lose counts.
    pub async fn apply_match_result(
        &self,
        participant_id: i64,
        score_delta: i64,
        won: bool,
        lost: bool,
        drew: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE participants SET total_score = total_score + ?, wins = wins + ?, losses = losses + ?, draws = draws + ? WHERE id = ?",
        )
        .bind(score_delta)
        .bind(won as i64)
        .bind(lost as i64)
        .bind(drew as i64)
        .bind(participant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_final_standing(
        &self,
        participant_id: i64,
        average_score: f64,
        rank: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE participants SET average_score = ?, rank = ? WHERE id = ?",
        )
        .bind(average_score)
        .bind(rank)
        .bind(participant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Matches ───────────────────────────────────────────────────────

    /// Wipe a tournament's match records ahead of a re-run. Matches are
    /// regenerated wholesale, never appended across runs.
    pub async fn clear_matches(&self, tournament_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM matches WHERE tournament_id = ?")
            .bind(tournament_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_match(
        &self,
        tournament_id: i64,
        participant1_id: i64,
        participant2_id: i64,
        strategy1_id: i64,
        strategy2_id: i64,
        rounds: i64,
        score1: i64,
        score2: i64,
        winner: &str,
        move_log: &[u8],
    ) -> Result<MatchRecord, sqlx::Error> {
        let row = sqlx::query_as::<_, MatchRecord>(
            r#"
            INSERT INTO matches (tournament_id, participant1_id, participant2_id, strategy1_id, strategy2_id, rounds, score1, score2, winner, move_log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, tournament_id, participant1_id, participant2_id, strategy1_id, strategy2_id, rounds, score1, score2, winner, move_log, created_at
        "#,
        )
        .bind(tournament_id)
        .bind(participant1_id)
        .bind(participant2_id)
        .bind(strategy1_id)
        .bind(strategy2_id)
        .bind(rounds)
        .bind(score1)
        .bind(score2)
        .bind(winner)
        .bind(move_log)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_matches(&self, tournament_id: i64) -> Result<Vec<MatchRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MatchRecord>(
            "SELECT id, tournament_id, participant1_id, participant2_id, strategy1_id, strategy2_id, rounds, score1, score2, winner, move_log, created_at FROM matches WHERE tournament_id = ? ORDER BY id",
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_match(
        &self,
        tournament_id: i64,
        match_id: i64,
    ) -> Result<Option<MatchRecord>, sqlx::Error> {
        let row = sqlx::query_as::<_, MatchRecord>(
            "SELECT id, tournament_id, participant1_id, participant2_id, strategy1_id, strategy2_id, rounds, score1, score2, winner, move_log, created_at FROM matches WHERE tournament_id = ? AND id = ?",
        )
        .bind(tournament_id)
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
