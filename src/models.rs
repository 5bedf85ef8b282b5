use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::db::PostingStore;
use crate::intake::Intake;
use crate::notify::NotificationHub;
use crate::queue::TaskQueue;
use crate::routes::flash::FlashSigner;

/// Event name pushed to clients once a posting has been extracted.
pub const JOB_PROCESSED_EVENT: &str = "job_processed";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PostingStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub hub: NotificationHub,
    pub flash: FlashSigner,
}

impl AppState {
    pub fn intake(&self) -> Intake {
        Intake::new(self.store.clone(), self.queue.clone())
    }
}

/// Lifecycle of a posting. `processing` is implicit while a worker holds the task
/// and is never written to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    New,
    Processed,
    Failed,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingStatus::New => "new",
            PostingStatus::Processed => "processed",
            PostingStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PostingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PostingStatus::New),
            "processed" => Ok(PostingStatus::Processed),
            "failed" => Ok(PostingStatus::Failed),
            other => Err(format!("unknown posting status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: i64,
    pub content: String,
    pub status: PostingStatus,
    pub fields: Option<JobFields>,
}

/// Structured result of an extraction.
///
/// Serialized with the display keys the prompt asks for, so the stored JSON and the
/// `job_processed` payload stay a flat key/value mapping. Keys the model adds on its
/// own are carried along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFields {
    #[serde(
        rename = "Job Title",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_title: Option<String>,
    #[serde(
        rename = "Company Name",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub company_name: Option<String>,
    #[serde(
        rename = "Location",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,
    #[serde(
        rename = "Salary",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub salary: Option<String>,
    #[serde(
        rename = "Job Description",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_description: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl JobFields {
    /// The five fields the prompt asks for, in display order.
    pub fn known(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("Job Title", self.job_title.as_deref()),
            ("Company Name", self.company_name.as_deref()),
            ("Location", self.location.as_deref()),
            ("Salary", self.salary.as_deref()),
            ("Job Description", self.job_description.as_deref()),
        ]
    }
}

// Models routinely answer `"Salary": 100000` or `null`; keep those instead of failing.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        serde_json::Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

/// Payload of the `job_processed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProcessedPayload {
    pub id: i64,
    pub fields: JobFields,
}

// API Request/Response types

#[derive(Debug, Deserialize)]
pub struct SubmitPostingForm {
    #[serde(default)]
    pub job_posting: String,
}

#[derive(Debug, Serialize)]
pub struct PostingListResponse {
    pub postings: Vec<Posting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
    pub queue: String,
}
