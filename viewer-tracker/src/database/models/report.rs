//! Analysis report database model.

use sqlx::FromRow;

use crate::Result;
use crate::domain::AnalysisReport;

/// Row of the `analysis_reports` table. The report itself is stored as JSON.
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisReportDbModel {
    pub job_id: String,
    pub report: String,
    pub created_at: i64,
}

impl AnalysisReportDbModel {
    pub fn from_report(report: &AnalysisReport) -> Result<Self> {
        Ok(Self {
            job_id: report.job_id.clone(),
            report: serde_json::to_string(report)?,
            created_at: crate::database::time::now_ms(),
        })
    }

    pub fn into_report(self) -> Result<AnalysisReport> {
        Ok(serde_json::from_str(&self.report)?)
    }
}
