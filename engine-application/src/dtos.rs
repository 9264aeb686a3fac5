use serde::Serialize;

/// Outcome of one batch job run, printed as the job's final report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobSummary {
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,
    pub alerts_emitted: u64,
    pub first_error: Option<String>,
}

impl JobSummary {
    /// Records a failure without clobbering the first one seen.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.first_error.is_none() {
            self.first_error = Some(message.into());
        }
    }

    pub fn succeeded(&self) -> bool {
        self.rows_failed == 0 && self.first_error.is_none()
    }
}
