use std::fmt;

use rusqlite::types::Type;
use serde::Serialize;

/// Persisted job state. Successful jobs are deleted, so there is no
/// completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Claimed,
    Failed,
}

impl JobStatus {
    /// Integer stored in the `status` column.
    pub fn code(self) -> i64 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Claimed => 1,
            JobStatus::Failed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(JobStatus::Pending),
            1 => Some(JobStatus::Claimed),
            2 => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Claimed => write!(f, "claimed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A family of jobs sharing one table and one payload shape.
///
/// The queue protocol (claim, complete, fail) is identical for every kind;
/// only the table name and the optional payload column differ.
pub trait JobKind: fmt::Debug + Clone + Send + Sync + 'static {
    type Payload: fmt::Debug + Clone + Send + Sync + 'static;

    /// Human-readable kind name used in logs
    const NAME: &'static str;
    const TABLE: &'static str;
    /// Column carrying the payload, `None` for kinds without one
    const PAYLOAD_COLUMN: Option<&'static str>;

    fn encode_payload(payload: &Self::Payload) -> Option<String>;

    /// `index` is the column position, used for error reporting.
    fn decode_payload(index: usize, value: Option<String>) -> rusqlite::Result<Self::Payload>;
}

/// Launch an app suspended and release it with JIT permitted. Payload is the
/// bundle identifier.
#[derive(Debug, Clone, Copy)]
pub struct Launch;

impl JobKind for Launch {
    type Payload = String;

    const NAME: &'static str = "launch";
    const TABLE: &'static str = "launch_queue";
    const PAYLOAD_COLUMN: Option<&'static str> = Some("bundle_id");

    fn encode_payload(payload: &String) -> Option<String> {
        Some(payload.clone())
    }

    fn decode_payload(index: usize, value: Option<String>) -> rusqlite::Result<String> {
        value.ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(index, "bundle_id".to_string(), Type::Null)
        })
    }
}

/// Mount the personalized developer disk image. No payload.
#[derive(Debug, Clone, Copy)]
pub struct Mount;

impl JobKind for Mount {
    type Payload = ();

    const NAME: &'static str = "mount";
    const TABLE: &'static str = "mount_queue";
    const PAYLOAD_COLUMN: Option<&'static str> = None;

    fn encode_payload(_payload: &()) -> Option<String> {
        None
    }

    fn decode_payload(_index: usize, _value: Option<String>) -> rusqlite::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Job<K: JobKind> {
    /// Insertion-ordered claim key
    pub ordinal: i64,
    pub udid: String,
    /// Network address the multiplexer registers the device under
    pub ip: String,
    pub payload: K::Payload,
    pub status: JobStatus,
    pub error: Option<String>,
}

pub type LaunchJob = Job<Launch>;
pub type MountJob = Job<Mount>;

impl Job<Launch> {
    pub fn bundle_id(&self) -> &str {
        &self.payload
    }
}

/// Where a device stands in a queue, as seen by whoever submitted the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum QueueStatus {
    /// Number of pending jobs ahead of this one
    Position(usize),
    InProgress,
    Failed(String),
    NotQueued,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStatus::Position(0) => write!(f, "next in queue"),
            QueueStatus::Position(n) => write!(f, "position {n}"),
            QueueStatus::InProgress => write!(f, "in progress"),
            QueueStatus::Failed(error) => write!(f, "failed: {error}"),
            QueueStatus::NotQueued => write!(f, "not queued"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [JobStatus::Pending, JobStatus::Claimed, JobStatus::Failed] {
            assert_eq!(JobStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(JobStatus::from_code(7), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Claimed.to_string(), "claimed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn launch_payload_requires_bundle_id() {
        assert_eq!(
            Launch::decode_payload(3, Some("com.example.app".to_string())).unwrap(),
            "com.example.app"
        );
        assert!(Launch::decode_payload(3, None).is_err());
    }

    #[test]
    fn queue_status_display_and_json() {
        assert_eq!(QueueStatus::Position(0).to_string(), "next in queue");
        assert_eq!(QueueStatus::Position(3).to_string(), "position 3");
        assert_eq!(
            serde_json::to_value(QueueStatus::Failed("Timeout".into())).unwrap(),
            serde_json::json!({"state": "failed", "detail": "Timeout"})
        );
        assert_eq!(
            serde_json::to_value(QueueStatus::NotQueued).unwrap(),
            serde_json::json!({"state": "not_queued"})
        );
    }

    #[test]
    fn mount_has_no_payload_column() {
        assert!(Mount::PAYLOAD_COLUMN.is_none());
        assert_eq!(Mount::encode_payload(&()), None);
    }
}
