use crate::ModelError;
use crate::bundle::ConfigBundle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of a durable job record and of the messages derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Started,
    Finished,
    Error,
}

/// Outcome of a single hint. `Pending` means no sub-job has decided it yet;
/// every other value is final for the lifetime of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintStatus {
    Pending,
    Pass,
    Warning,
    Error,
    Off,
}

/// Severity attached to an engine message. Ordering matters: the highest
/// severity in a bucket decides the hint status (`error > warning > pass`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

/// Position of a finding inside the scanned resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
}

/// One finding emitted by the engine, or a synthetic entry written by the
/// worker (engine failures, collapsed oversized results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintMessage {
    pub hint_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<TextLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl HintMessage {
    pub fn new(hint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hint_id: hint_id.into(),
            message: message.into(),
            location: None,
            severity: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Per-hint slice of a job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintResult {
    pub name: String,
    pub status: HintStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<HintMessage>,
}

impl HintResult {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HintStatus::Pending,
            messages: Vec::new(),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.status != HintStatus::Pending
    }
}

/// Position of a sub-job within its parent job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartInfo {
    pub part: u32,
    pub total_parts: u32,
}

/// Error payload carried by failed jobs and result messages.
///
/// Engines report errors either as a bare string or as a
/// `{message, stack}` object; both decode into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JobErrorWire")]
pub struct JobError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobErrorWire {
    Full {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Text(String),
}

impl From<JobErrorWire> for JobError {
    fn from(wire: JobErrorWire) -> Self {
        match wire {
            JobErrorWire::Full { message, stack } => JobError { message, stack },
            JobErrorWire::Text(message) => JobError::new(message),
        }
    }
}

/// The durable job record. Created elsewhere in `pending`; only the sync
/// service mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub url: String,
    pub status: JobStatus,
    #[serde(default)]
    pub hints: Vec<HintResult>,
    #[serde(default)]
    pub config: Vec<ConfigBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Deadline for each sub-job, in seconds. `0` means "use the worker's
    /// default".
    #[serde(default)]
    pub max_run_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
}

impl Job {
    pub fn hint(&self, name: &str) -> Option<&HintResult> {
        self.hints.iter().find(|h| h.name == name)
    }

    pub fn hint_mut(&mut self, name: &str) -> Option<&mut HintResult> {
        self.hints.iter_mut().find(|h| h.name == name)
    }

    pub fn all_hints_decided(&self) -> bool {
        self.hints.iter().all(HintResult::is_decided)
    }

    /// Splits the job into one sub-job per configuration bundle.
    ///
    /// Every sub-job declares the same hint list: the union of hint names
    /// across all bundles plus the hints already present on the record.
    /// Hints a bundle does not mention stay untouched by that sub-job.
    pub fn split(&self) -> Vec<SubJob> {
        let mut names: BTreeSet<String> =
            self.hints.iter().map(|h| h.name.clone()).collect();
        for bundle in &self.config {
            names.extend(bundle.hints.keys().cloned());
        }
        let hints: Vec<HintResult> =
            names.into_iter().map(HintResult::pending).collect();

        let total_parts = self.config.len() as u32;
        self.config
            .iter()
            .enumerate()
            .map(|(index, bundle)| SubJob {
                id: self.id.clone(),
                url: self.url.clone(),
                config: vec![bundle.clone()],
                hints: hints.clone(),
                part_info: PartInfo {
                    part: index as u32 + 1,
                    total_parts,
                },
                max_run_time: self.max_run_time,
            })
            .collect()
    }
}

/// A single-configuration slice of a parent job, the unit of work on the
/// jobs queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubJob {
    pub id: String,
    pub url: String,
    pub config: Vec<ConfigBundle>,
    #[serde(default)]
    pub hints: Vec<HintResult>,
    pub part_info: PartInfo,
    #[serde(default)]
    pub max_run_time: u64,
}

impl SubJob {
    /// The one configuration bundle of this sub-job.
    pub fn bundle(&self) -> Result<&ConfigBundle, ModelError> {
        match self.config.as_slice() {
            [bundle] => Ok(bundle),
            other => Err(ModelError::BundleCount {
                id: self.id.clone(),
                count: other.len(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        self.bundle()?;
        if self.url.trim().is_empty() {
            return Err(ModelError::EmptyUrl {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}
