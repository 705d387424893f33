//! Core types for swell-collector

use crate::bundle::RetentionReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a collection run
///
/// Formatted as `<32 hex random>_<unix seconds>`; it doubles as the name of
/// the run's bundle directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run id
    pub fn generate() -> Self {
        let random: u128 = rand::random();
        Self(format!("{random:032x}_{}", Utc::now().timestamp()))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata describing one saved artifact
///
/// Producers may attach arbitrary extra fields (`location`, `buoy`,
/// `station`, ...) through [`Record::with_extra`]; they are flattened into
/// the serialized object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Producing source (e.g. "NDBC", "OPC")
    pub source: String,

    /// Kind of data (e.g. "chart", "realtime")
    #[serde(rename = "type")]
    pub kind: String,

    /// Artifact file name inside the bundle directory
    pub filename: String,

    /// Lower is more important
    pub priority: i32,

    /// When the record was created
    pub timestamp: DateTime<Utc>,

    /// Relevant for south-facing shores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub south_facing: Option<bool>,

    /// Relevant for north-facing shores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub north_facing: Option<bool>,

    /// Where the payload came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Finer classification within `type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Error text for placeholder records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The artifact stands in for data that could not be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_placeholder: Option<bool>,

    /// Producer-specific fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Create a record timestamped now
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        filename: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            filename: filename.into(),
            priority,
            timestamp: Utc::now(),
            south_facing: None,
            north_facing: None,
            url: None,
            subtype: None,
            error: None,
            is_placeholder: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the south-facing tag
    pub fn south_facing(mut self, value: bool) -> Self {
        self.south_facing = Some(value);
        self
    }

    /// Set the north-facing tag
    pub fn north_facing(mut self, value: bool) -> Self {
        self.north_facing = Some(value);
        self
    }

    /// Set the source URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the subtype
    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Mark the record as a placeholder for data that could not be fetched
    pub fn placeholder(mut self, error: impl Into<String>) -> Self {
        self.is_placeholder = Some(true);
        self.error = Some(error.into());
        self
    }

    /// Attach a producer-specific field
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Contents of a bundle's `metadata.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Run that produced the bundle
    pub run_id: RunId,
    /// When aggregation completed
    pub timestamp: DateTime<Utc>,
    /// Records of every task that completed without failing, in completion order
    pub results: Vec<Record>,
}

/// Role of a scheduled task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    /// Runs unconditionally
    Primary,
    /// Runs only when the named primary failed or produced nothing
    Fallback {
        /// Name of the primary this task stands in for
        primary: String,
    },
}

/// Lifecycle state of a scheduled task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, not started
    Pending,
    /// Running
    Running,
    /// Finished; `records` is the number of records it produced
    Succeeded {
        /// Number of records produced
        records: usize,
    },
    /// Returned an error or panicked
    Failed {
        /// Error message
        error: String,
    },
    /// Stopped by shutdown before it finished
    Cancelled,
    /// A fallback whose primary succeeded with records
    NotScheduled,
}

impl TaskStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Whether a primary with this status hands over to its fallback
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed { .. } | TaskStatus::Succeeded { records: 0 }
        )
    }
}

/// Final state of one task, as reported in [`RunSummary`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Producer name
    pub name: String,
    /// Primary or fallback
    pub role: TaskRole,
    /// Terminal status
    pub status: TaskStatus,
}

/// Event emitted during a collection run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Bundle directory created, tasks about to launch
    RunStarted {
        /// Run id
        run_id: RunId,
        /// Bundle directory
        bundle_dir: PathBuf,
    },

    /// A task was spawned
    TaskStarted {
        /// Producer name
        name: String,
        /// Primary or fallback
        role: TaskRole,
    },

    /// A task reached a terminal status
    TaskFinished {
        /// Producer name
        name: String,
        /// Primary or fallback
        role: TaskRole,
        /// Terminal status
        status: TaskStatus,
    },

    /// A primary failed or came back empty, its fallback was spawned
    FallbackScheduled {
        /// Primary producer
        primary: String,
        /// Fallback producer
        fallback: String,
    },

    /// A primary produced records, its fallback will not run
    FallbackSkipped {
        /// Primary producer
        primary: String,
        /// Fallback producer
        fallback: String,
    },

    /// `metadata.json` was written
    ManifestWritten {
        /// Run id
        run_id: RunId,
        /// Number of records in the manifest
        records: usize,
    },

    /// `latest_bundle.txt` now names this run
    LatestUpdated {
        /// Run id
        run_id: RunId,
    },

    /// Teardown finished
    ShutdownComplete,
}

/// Outcome of a successful [`Collector::run`](crate::Collector::run)
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Run id
    pub run_id: RunId,
    /// Bundle directory
    pub bundle_dir: PathBuf,
    /// Path of the written manifest
    pub manifest_path: PathBuf,
    /// Number of records in the manifest
    pub records: usize,
    /// Final status of every task, in registration order
    pub tasks: Vec<TaskReport>,
    /// What retention removed before the run
    pub retention: RetentionReport,
}
