use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError, Result};
use crate::modules::renderer::Artifact;
use crate::utils::coordinate::{ImageShape, LandmarkPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| PipelineError::invalid(format!("malformed job id {s:?}: {e}")))
    }
}

/// Lifecycle of a job: `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for JobError {
    fn from(e: &PipelineError) -> Self {
        JobError { kind: e.kind(), message: e.to_string() }
    }
}

/// What was submitted, kept for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub image_shape: ImageShape,
    pub segmentation_shape: ImageShape,
    pub landmarks: Vec<LandmarkPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub input: JobInput,
    pub artifact: Option<Artifact>,
    pub error: Option<JobError>,
    pub cache_hit: bool,
    /// Hamming distance of the matched cache entry, on a hit.
    pub cache_distance: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, input: JobInput) -> Self {
        let now = Utc::now();
        Job {
            id,
            state: JobState::Pending,
            input,
            artifact: None,
            error: None,
            cache_hit: false,
            cache_distance: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// rejected records a submission that failed validation; it never enters the queue.
    pub fn rejected(id: JobId, input: JobInput, error: &PipelineError) -> Self {
        Job { state: JobState::Failed, error: Some(error.into()), ..Job::new(id, input) }
    }

    /// transition moves the job to `next`, refusing anything outside the lifecycle.
    ///
    /// # Arguments
    /// * `next` - target state
    ///
    /// # Returns
    /// * `Result<()>`
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition { from: self.state, to: next });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobState::Processing)
    }

    pub fn complete(&mut self, artifact: Artifact, cache_distance: Option<u32>) -> Result<()> {
        self.transition(JobState::Completed)?;
        self.artifact = Some(artifact);
        self.cache_hit = cache_distance.is_some();
        self.cache_distance = cache_distance;
        Ok(())
    }

    pub fn fail(&mut self, error: &PipelineError) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}

/// Read-only snapshot returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_distance: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        JobStatus {
            job_id: job.id,
            state: job.state,
            artifact: job.artifact,
            error: job.error,
            cache_hit: job.cache_hit,
            cache_distance: job.cache_distance,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::renderer::ArtifactKind;

    fn job() -> Job {
        Job::new(
            JobId::new(),
            JobInput {
                image_shape: ImageShape::new(4, 4),
                segmentation_shape: ImageShape::new(4, 4),
                landmarks: vec![LandmarkPoint::new(1.0, 1.0)],
            },
        )
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.start().unwrap();
        job.complete(Artifact::new(ArtifactKind::Vector, b"<svg/>".to_vec()), Some(3)).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.cache_hit);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut pending = job();
        let err = pending.transition(JobState::Completed).unwrap_err();
        assert_eq!(
            err,
            PipelineError::IllegalTransition { from: JobState::Pending, to: JobState::Completed }
        );
        assert_eq!(pending.state, JobState::Pending);

        let mut failed = job();
        failed.start().unwrap();
        failed.fail(&PipelineError::processing("boom")).unwrap();
        for next in [JobState::Pending, JobState::Processing, JobState::Completed, JobState::Failed] {
            assert!(failed.transition(next).is_err());
        }
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::ProcessingError);
    }

    #[test]
    fn test_rejected_job_is_terminal() {
        let base = job();
        let rejected = Job::rejected(base.id, base.input, &PipelineError::NoFaceDetected("none".into()));
        assert!(rejected.state.is_terminal());
        let status = JobStatus::from(rejected);
        assert_eq!(status.error_kind(), Some(ErrorKind::NoFaceDetected));
    }

    #[test]
    fn test_job_id_parsing_and_state_names() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("nope".parse::<JobId>().is_err());
        assert_eq!(serde_json::to_string(&JobState::Processing).unwrap(), "\"processing\"");
    }
}
