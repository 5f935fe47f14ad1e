//! Job queue storage.
//!
//! Jobs move `pending -> leased -> completed`, or end in `dead`. A leased job
//! whose lease has expired is claimable again, which gives at-least-once
//! delivery when a consumer dies mid-job. Every state change after a lease is
//! conditional on the caller still holding that lease.

use rusqlite::{OptionalExtension, params};

use super::models::{JobRecord, JobStatus, LeasedJob};
use super::{Database, DbResult};
use crate::error::DatabaseError;

/// Result of one claim attempt
#[derive(Debug, Default)]
pub struct LeaseClaim {
    pub job: Option<LeasedJob>,
    /// Jobs dead-lettered during the claim because their retry budget ran out
    pub exhausted: Vec<String>,
}

const JOB_COLUMNS: &str = "id, payload, status, attempts, available_at, lease_expires_at, \
                           last_error, created_at, updated_at";

impl Database {
    /// Insert a new pending job
    pub fn insert_job(&self, id: &str, payload: &str, now_ms: i64) -> DbResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO jobs (id, payload, status, attempts, available_at, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?3, ?3)
            "#,
            params![id, payload, now_ms],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Atomically claim the next available job.
    ///
    /// Available means pending and past its backoff delay, or leased with an
    /// expired lease. An expired lease that has already used `max_attempts`
    /// deliveries is dead-lettered instead of handed out again. Both steps run
    /// in one transaction, and the single UPDATE ... RETURNING claim is what
    /// keeps two consumers from claiming the same row.
    pub fn lease_next_job(
        &self,
        lease_id: &str,
        now_ms: i64,
        lease_expires_at_ms: i64,
        max_attempts: u32,
    ) -> DbResult<LeaseClaim> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let exhausted = {
            let mut stmt = tx
                .prepare(
                    r#"
                    UPDATE jobs
                    SET status = 'dead', lease_id = NULL, lease_expires_at = NULL,
                        last_error = 'lease expired after ' || attempts || ' attempts',
                        updated_at = ?1
                    WHERE status = 'leased' AND lease_expires_at <= ?1 AND attempts >= ?2
                    RETURNING id
                    "#,
                )
                .map_err(DatabaseError::Query)?;
            stmt.query_map(params![now_ms, max_attempts], |row| row.get::<_, String>(0))
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DatabaseError::Query)?
        };

        let job = tx
            .query_row(
                r#"
                UPDATE jobs
                SET status = 'leased',
                    lease_id = ?1,
                    lease_expires_at = ?3,
                    attempts = attempts + 1,
                    updated_at = ?2
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE (status = 'pending' AND available_at <= ?2)
                       OR (status = 'leased' AND lease_expires_at <= ?2)
                    ORDER BY available_at ASC, created_at ASC
                    LIMIT 1
                )
                RETURNING id, payload, attempts
                "#,
                params![lease_id, now_ms, lease_expires_at_ms],
                |row| {
                    let attempts: i64 = row.get(2)?;
                    Ok(LeasedJob {
                        id: row.get(0)?,
                        lease_id: lease_id.to_string(),
                        attempts: attempts.max(0) as u32,
                        payload: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(LeaseClaim { job, exhausted })
    }

    /// Push a held lease's expiry forward. Returns false if the lease is no longer held.
    pub fn extend_job_lease(
        &self,
        id: &str,
        lease_id: &str,
        lease_expires_at_ms: i64,
        now_ms: i64,
    ) -> DbResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE jobs
                SET lease_expires_at = ?3, updated_at = ?4
                WHERE id = ?1 AND status = 'leased' AND lease_id = ?2
                "#,
                params![id, lease_id, lease_expires_at_ms, now_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark a leased job completed. Returns false if the lease is no longer held.
    pub fn complete_job(&self, id: &str, lease_id: &str, now_ms: i64) -> DbResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE jobs
                SET status = 'completed', lease_id = NULL, lease_expires_at = NULL, updated_at = ?3
                WHERE id = ?1 AND status = 'leased' AND lease_id = ?2
                "#,
                params![id, lease_id, now_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Return a leased job to pending, visible again at `available_at_ms`.
    pub fn reschedule_job(
        &self,
        id: &str,
        lease_id: &str,
        error: &str,
        available_at_ms: i64,
        now_ms: i64,
    ) -> DbResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE jobs
                SET status = 'pending', lease_id = NULL, lease_expires_at = NULL,
                    last_error = ?3, available_at = ?4, updated_at = ?5
                WHERE id = ?1 AND status = 'leased' AND lease_id = ?2
                "#,
                params![id, lease_id, error, available_at_ms, now_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Move a leased job to the dead-letter state
    pub fn dead_letter_job(
        &self,
        id: &str,
        lease_id: &str,
        error: &str,
        now_ms: i64,
    ) -> DbResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE jobs
                SET status = 'dead', lease_id = NULL, lease_expires_at = NULL,
                    last_error = ?3, updated_at = ?4
                WHERE id = ?1 AND status = 'leased' AND lease_id = ?2
                "#,
                params![id, lease_id, error, now_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Put a dead job back in the queue with a fresh attempt budget
    pub fn requeue_dead_job(&self, id: &str, now_ms: i64) -> DbResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE jobs
                SET status = 'pending', attempts = 0, available_at = ?2, updated_at = ?2
                WHERE id = ?1 AND status = 'dead'
                "#,
                params![id, now_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Get a job by ID
    pub fn get_job(&self, id: &str) -> DbResult<Option<JobRecord>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            JobRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
    }

    /// List jobs, newest first, optionally filtered by status
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> DbResult<Vec<JobRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM jobs WHERE (?1 IS NULL OR status = ?1) \
                 ORDER BY created_at DESC LIMIT ?2",
                JOB_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let jobs = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit as i64],
                JobRecord::from_row,
            )
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(jobs)
    }

    /// Count jobs per status
    pub fn count_jobs_by_status(&self) -> DbResult<Vec<(JobStatus, usize)>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .map_err(DatabaseError::Query)?;

        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(DatabaseError::Query)?
            .filter_map(|r| r.ok())
            .filter_map(|(status, count)| {
                JobStatus::parse(&status).map(|s| (s, count.max(0) as usize))
            })
            .collect();

        Ok(counts)
    }

    /// Delete completed jobs last touched before the cutoff
    pub fn purge_completed_jobs(&self, before_ms: i64) -> DbResult<usize> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "DELETE FROM jobs WHERE status = 'completed' AND updated_at < ?1",
                params![before_ms],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn claim(db: &Database, lease_id: &str, now_ms: i64, expires_ms: i64) -> Option<LeasedJob> {
        db.lease_next_job(lease_id, now_ms, expires_ms, 3)
            .unwrap()
            .job
    }

    #[test]
    fn test_lease_claims_oldest_pending_job() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        db.insert_job("b", "{}", 2_000).unwrap();

        let leased = claim(&db, "lease-1", 5_000, 10_000).unwrap();
        assert_eq!(leased.id, "a");
        assert_eq!(leased.attempts, 1);

        let next = claim(&db, "lease-2", 5_000, 10_000).unwrap();
        assert_eq!(next.id, "b");

        assert!(claim(&db, "lease-3", 5_000, 10_000).is_none());
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();

        let first = claim(&db, "lease-1", 1_000, 2_000).unwrap();
        assert!(claim(&db, "lease-2", 1_500, 2_500).is_none());

        let second = claim(&db, "lease-2", 2_000, 3_000).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        // The first consumer lost its lease and cannot complete the job
        assert!(!db.complete_job("a", "lease-1", 2_100).unwrap());
        assert!(db.complete_job("a", "lease-2", 2_100).unwrap());
        assert_eq!(
            db.get_job("a").unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn test_expired_lease_past_attempt_budget_is_dead_lettered() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();

        // Three deliveries that never report back
        for (attempt, now) in [(1, 1_000), (2, 2_000), (3, 3_000)] {
            let leased = claim(&db, &format!("lease-{}", attempt), now, now + 500).unwrap();
            assert_eq!(leased.attempts, attempt);
        }

        let outcome = db.lease_next_job("lease-4", 4_000, 4_500, 3).unwrap();
        assert!(outcome.job.is_none());
        assert_eq!(outcome.exhausted, vec!["a".to_string()]);

        let record = db.get_job("a").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Dead);
        assert_eq!(record.attempts, 3);
        assert_eq!(
            record.last_error.as_deref(),
            Some("lease expired after 3 attempts")
        );
        assert!(claim(&db, "lease-5", 100_000, 100_500).is_none());
    }

    #[test]
    fn test_unexpired_lease_is_not_swept() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        claim(&db, "lease-1", 1_000, 60_000).unwrap();

        let outcome = db.lease_next_job("lease-2", 2_000, 3_000, 1).unwrap();
        assert!(outcome.job.is_none());
        assert!(outcome.exhausted.is_empty());
        assert_eq!(db.get_job("a").unwrap().unwrap().status, JobStatus::Leased);
    }

    #[test]
    fn test_extend_lease_requires_holding_it() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        claim(&db, "lease-1", 1_000, 2_000).unwrap();

        assert!(db.extend_job_lease("a", "lease-1", 10_000, 1_900).unwrap());
        assert!(claim(&db, "lease-2", 5_000, 6_000).is_none());
        assert!(!db.extend_job_lease("a", "lease-2", 20_000, 5_000).unwrap());
    }

    #[test]
    fn test_rescheduled_job_waits_for_backoff() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        claim(&db, "lease-1", 1_000, 60_000).unwrap();

        assert!(
            db.reschedule_job("a", "lease-1", "embedding timed out", 5_000, 1_100)
                .unwrap()
        );
        assert!(claim(&db, "lease-2", 4_999, 60_000).is_none());

        let again = claim(&db, "lease-2", 5_000, 60_000).unwrap();
        assert_eq!(again.attempts, 2);

        let record = db.get_job("a").unwrap().unwrap();
        assert_eq!(record.last_error.as_deref(), Some("embedding timed out"));
    }

    #[test]
    fn test_dead_jobs_are_not_delivered_until_requeued() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        claim(&db, "lease-1", 1_000, 2_000).unwrap();
        assert!(db.dead_letter_job("a", "lease-1", "missing", 1_100).unwrap());

        assert!(claim(&db, "lease-2", 10_000, 20_000).is_none());
        let dead = db.list_jobs(Some(JobStatus::Dead), 10).unwrap();
        assert_eq!(dead.len(), 1);

        assert!(db.requeue_dead_job("a", 11_000).unwrap());
        let leased = claim(&db, "lease-3", 11_000, 20_000).unwrap();
        assert_eq!(leased.attempts, 1);
    }

    #[test]
    fn test_purge_removes_only_old_completed_jobs() {
        let db = db();
        db.insert_job("old", "{}", 1_000).unwrap();
        db.insert_job("pending", "{}", 1_001).unwrap();
        claim(&db, "lease-1", 1_000, 2_000).unwrap();
        db.complete_job("old", "lease-1", 1_500).unwrap();

        assert_eq!(db.purge_completed_jobs(2_000).unwrap(), 1);
        assert!(db.get_job("old").unwrap().is_none());
        assert!(db.get_job("pending").unwrap().is_some());
    }

    #[test]
    fn test_count_jobs_by_status() {
        let db = db();
        db.insert_job("a", "{}", 1_000).unwrap();
        db.insert_job("b", "{}", 1_000).unwrap();
        claim(&db, "lease-1", 1_000, 2_000).unwrap();

        let counts = db.count_jobs_by_status().unwrap();
        assert!(counts.contains(&(JobStatus::Pending, 1)));
        assert!(counts.contains(&(JobStatus::Leased, 1)));
    }
}
