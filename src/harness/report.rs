use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::worker::{JobInfo, JobStatus};

/// Outcome of one job in a batch
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    /// Messages popped by the harness; `None` when an external reader drained the channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub(crate) fn new(
        info: JobInfo,
        status: JobStatus,
        messages: Option<u64>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: info.id,
            name: info.name,
            status,
            messages,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Aggregate outcome of a batch; successful only if every job succeeded
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_success())
    }

    /// Jobs that failed or were cancelled, in submission order
    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|job| !job.status.is_success())
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Process exit status: 0 iff every job succeeded
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn summary(&self) -> String {
        let succeeded = self.jobs.iter().filter(|job| job.status.is_success()).count();
        format!("{succeeded}/{} jobs succeeded", self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FailureCause;

    fn report(name: &str, status: JobStatus) -> JobReport {
        JobReport::new(JobInfo::new(name), status, Some(3), Utc::now())
    }

    #[test]
    fn test_any_failure_fails_batch() {
        let batch = BatchReport {
            batch_id: Uuid::now_v7(),
            jobs: vec![
                report("a", JobStatus::Succeeded),
                report("b", JobStatus::Failed(FailureCause::Numerical("nan".into()))),
                report("c", JobStatus::Cancelled),
            ],
        };

        assert!(!batch.is_success());
        assert_eq!(batch.exit_code(), 1);
        let failed: Vec<_> = batch.failures().map(|job| job.name.as_str()).collect();
        assert_eq!(failed, vec!["b", "c"]);
        assert_eq!(batch.summary(), "1/3 jobs succeeded");
    }

    #[test]
    fn test_report_json_shape() {
        let batch = BatchReport {
            batch_id: Uuid::now_v7(),
            jobs: vec![report("a", JobStatus::Succeeded)],
        };
        assert_eq!(batch.exit_code(), 0);

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["jobs"][0]["status"]["state"], "succeeded");
        assert_eq!(json["jobs"][0]["messages"], 3);
        assert!(json["jobs"][0]["started_at"].as_str().unwrap().contains('T'));
    }
}
