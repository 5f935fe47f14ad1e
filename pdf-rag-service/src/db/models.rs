//! Database model structs.
//!
//! This module contains the data structures for queue rows and vector index
//! entries.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a consumer (possibly delayed by backoff)
    Pending,
    /// Held by exactly one consumer until its lease expires
    Leased,
    /// Processed successfully
    Completed,
    /// Failed permanently, kept for manual inspection
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "leased" => Some(JobStatus::Leased),
            "completed" => Some(JobStatus::Completed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

/// Full queue row, used for inspection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let payload_str: String = row.get(1)?;
        let status_str: String = row.get(2)?;
        let attempts: i64 = row.get(3)?;
        let available_at: i64 = row.get(4)?;
        let lease_expires_at: Option<i64> = row.get(5)?;
        let created_at: i64 = row.get(7)?;
        let updated_at: i64 = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            // Malformed payloads are still shown verbatim
            payload: serde_json::from_str(&payload_str)
                .unwrap_or(serde_json::Value::String(payload_str)),
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Dead),
            attempts: attempts.max(0) as u32,
            available_at: from_millis(available_at),
            lease_expires_at: lease_expires_at.map(from_millis),
            last_error: row.get(6)?,
            created_at: from_millis(created_at),
            updated_at: from_millis(updated_at),
        })
    }
}

/// A job claimed by one consumer
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: String,
    pub lease_id: String,
    /// Delivery count including this one
    pub attempts: u32,
    /// Raw JSON payload; validated by the consumer
    pub payload: String,
}

/// One unit of extracted text with its source metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source_file: String,
    /// 1-based page number; `None` when the page is unknown
    pub page_number: Option<u32>,
}

/// A chunk with its embedding, as persisted in the vector index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Deterministic identity; writing the same id again replaces the entry
    pub id: String,
    pub job_id: String,
    pub chunk_index: u32,
    pub vector: Vec<f32>,
    pub chunk: DocumentChunk,
}

/// Search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
