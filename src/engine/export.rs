use crate::domain::{LoadTestConfig, TestResultSample, TestStats};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("Unsupported export format `{other}`")),
        }
    }
}

/// A finished run as handed to persistence or export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunExport {
    pub run_id: String,
    pub config: LoadTestConfig,
    pub stats: TestStats,
    pub samples: Vec<TestResultSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub file_name: String,
    pub mime_type: String,
    pub content: String,
}

pub fn export_run(run: &RunExport, format: ExportFormat) -> Result<ExportPayload, String> {
    match format {
        ExportFormat::Csv => {
            let mut csv = String::from(
                "timestamp_ms,request_index,method,url,status_code,latency_ms,success,error\n",
            );
            for sample in &run.samples {
                let _ = writeln!(
                    csv,
                    "{},{},{},{},{},{:.3},{},{}",
                    sample.timestamp_ms,
                    sample
                        .request_index
                        .map(|index| index.to_string())
                        .unwrap_or_default(),
                    csv_field(&sample.method),
                    csv_field(&sample.url),
                    sample.status_code,
                    sample.latency_ms,
                    sample.success,
                    csv_field(sample.error.as_deref().unwrap_or_default()),
                );
            }

            Ok(ExportPayload {
                file_name: format!("loadtest-{}.csv", run.run_id),
                mime_type: "text/csv".to_string(),
                content: csv,
            })
        }
        ExportFormat::Json => {
            let json = serde_json::to_string_pretty(run)
                .map_err(|err| format!("Failed to serialize load test export: {err}"))?;
            Ok(ExportPayload {
                file_name: format!("loadtest-{}.json", run.run_id),
                mime_type: "application/json".to_string(),
                content: json,
            })
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
