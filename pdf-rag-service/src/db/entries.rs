//! Vector index entry storage and brute-force similarity search.

use rusqlite::{Connection, OptionalExtension, params};

use super::models::{
    DocumentChunk, IndexEntry, ScoredEntry, embedding_from_bytes, embedding_to_bytes,
};
use super::{Database, DbResult};
use crate::error::DatabaseError;

/// Result of a batch upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written(usize),
    /// Nothing was written; the batch disagrees with the stored dimension
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result of a similarity search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(Vec<ScoredEntry>),
    /// The query vector cannot be compared with anything stored
    DimensionMismatch { expected: usize, actual: usize },
}

fn stored_dimension(conn: &Connection) -> DbResult<Option<usize>> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)?;
    Ok(stored.and_then(|v| v.parse::<usize>().ok()))
}

impl Database {
    /// Insert or replace a batch of entries in one transaction.
    ///
    /// The first batch ever written fixes the index dimension.
    pub fn upsert_entries(&self, entries: &[IndexEntry]) -> DbResult<UpsertOutcome> {
        let Some(first) = entries.first() else {
            return Ok(UpsertOutcome::Written(0));
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let expected = match stored_dimension(&tx)? {
            Some(dimension) => dimension,
            None => {
                tx.execute(
                    "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dimension', ?1)",
                    params![first.vector.len().to_string()],
                )
                .map_err(DatabaseError::Query)?;
                first.vector.len()
            }
        };

        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Ok(UpsertOutcome::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO index_entries
                        (id, job_id, chunk_index, source_file, page_number, content, embedding)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO UPDATE SET
                        job_id = excluded.job_id,
                        chunk_index = excluded.chunk_index,
                        source_file = excluded.source_file,
                        page_number = excluded.page_number,
                        content = excluded.content,
                        embedding = excluded.embedding
                    "#,
                )
                .map_err(DatabaseError::Query)?;

            for entry in entries {
                stmt.execute(params![
                    entry.id,
                    entry.job_id,
                    entry.chunk_index,
                    entry.chunk.source_file,
                    entry.chunk.page_number,
                    entry.chunk.text,
                    embedding_to_bytes(&entry.vector),
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(UpsertOutcome::Written(entries.len()))
    }

    /// Return the `limit` entries most similar to the query vector.
    ///
    /// Ordered by cosine similarity descending; equal scores keep insertion order.
    /// A query whose length differs from the index dimension matches nothing.
    pub fn search_entries(&self, query: &[f32], limit: usize) -> DbResult<SearchOutcome> {
        let conn = self.conn()?;

        if let Some(expected) = stored_dimension(&conn)? {
            if expected != query.len() {
                return Ok(SearchOutcome::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let mut stmt = conn
            .prepare(
                r#"
                SELECT seq, id, job_id, chunk_index, source_file, page_number, content, embedding
                FROM index_entries
                ORDER BY seq ASC
                "#,
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], |row| {
                let seq: i64 = row.get(0)?;
                let embedding_bytes: Vec<u8> = row.get(7)?;
                let entry = IndexEntry {
                    id: row.get(1)?,
                    job_id: row.get(2)?,
                    chunk_index: row.get(3)?,
                    vector: embedding_from_bytes(&embedding_bytes),
                    chunk: DocumentChunk {
                        source_file: row.get(4)?,
                        page_number: row.get(5)?,
                        text: row.get(6)?,
                    },
                };
                Ok((seq, entry))
            })
            .map_err(DatabaseError::Query)?;

        let mut results: Vec<(i64, ScoredEntry)> = Vec::new();
        for row in rows {
            let (seq, entry) = row.map_err(DatabaseError::Query)?;
            let score = cosine_similarity(query, &entry.vector);
            results.push((seq, ScoredEntry { entry, score }));
        }

        results.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        results.truncate(limit);

        Ok(SearchOutcome::Found(
            results.into_iter().map(|(_, scored)| scored).collect(),
        ))
    }

    /// Number of entries written for a job
    pub fn count_entries_for_job(&self, job_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM index_entries WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }

    /// Total number of entries in the index
    pub fn count_entries(&self) -> DbResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM index_entries", [], |row| row.get(0))
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}

/// Calculate cosine similarity between two vectors
pub(super) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, page: Option<u32>, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            job_id: "job-1".to_string(),
            chunk_index: page.unwrap_or(0),
            vector,
            chunk: DocumentChunk {
                text: format!("text of {}", id),
                source_file: "manual.pdf".to_string(),
                page_number: page,
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_upsert_replaces_by_identity() {
        let db = Database::open_in_memory().unwrap();
        let batch = vec![
            entry("e1", Some(1), vec![1.0, 0.0]),
            entry("e2", Some(2), vec![0.0, 1.0]),
        ];

        assert_eq!(
            db.upsert_entries(&batch).unwrap(),
            UpsertOutcome::Written(2)
        );
        assert_eq!(
            db.upsert_entries(&batch).unwrap(),
            UpsertOutcome::Written(2)
        );
        assert_eq!(db.count_entries_for_job("job-1").unwrap(), 2);
        assert_eq!(db.count_entries().unwrap(), 2);
    }

    #[test]
    fn test_dimension_mismatch_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_entries(&[entry("e1", Some(1), vec![1.0, 0.0])])
            .unwrap();

        let outcome = db
            .upsert_entries(&[
                entry("e2", Some(2), vec![1.0, 0.0]),
                entry("e3", Some(3), vec![1.0, 0.0, 0.0]),
            ])
            .unwrap();

        assert_eq!(
            outcome,
            UpsertOutcome::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(db.count_entries().unwrap(), 1);
    }

    #[test]
    fn test_search_orders_by_score_then_insertion() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_entries(&[
            entry("far", Some(1), vec![0.0, 1.0]),
            entry("tie-first", Some(2), vec![1.0, 0.0]),
            entry("tie-second", Some(3), vec![2.0, 0.0]),
            entry("unknown-page", None, vec![1.0, 1.0]),
        ])
        .unwrap();

        let SearchOutcome::Found(results) = db.search_entries(&[1.0, 0.0], 3).unwrap() else {
            panic!("query matches the index dimension");
        };
        let ids: Vec<&str> = results.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["tie-first", "tie-second", "unknown-page"]);
        assert_eq!(results[2].entry.chunk.page_number, None);
    }

    #[test]
    fn test_search_with_wrong_dimension_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_entries(&[
            entry("first", Some(1), vec![1.0, 0.0]),
            entry("second", Some(2), vec![0.0, 1.0]),
        ])
        .unwrap();

        assert_eq!(
            db.search_entries(&[1.0, 0.0, 0.0], 2).unwrap(),
            SearchOutcome::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_search_on_empty_index_finds_nothing() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.search_entries(&[1.0, 0.0], 2).unwrap(),
            SearchOutcome::Found(Vec::new())
        );
    }
}
