//! Domain model: reports, case workflow statuses, and agency routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Catch-all category assigned when the submitter does not pick one.
pub const DEFAULT_CATEGORY: &str = "lainnya";

/// The closed set of report categories.
pub const VALID_CATEGORIES: &[&str] = &[
    "kebersihan",
    "kriminalitas",
    "infrastruktur",
    "kesehatan",
    "keamanan",
    "lainnya",
];

/// Agency that owns infrastructure, sanitation, and uncategorized cases.
pub const AGENCY_INFRA: &str = "AGENCY_INFRA";
/// Agency that owns health cases.
pub const AGENCY_HEALTH: &str = "AGENCY_HEALTH";
/// Agency that owns safety and crime cases.
pub const AGENCY_SAFETY: &str = "AGENCY_SAFETY";

/// Returns true if `category` is in the closed category set.
#[must_use]
pub fn is_valid_category(category: &str) -> bool {
    VALID_CATEGORIES.contains(&category)
}

/// Maps a report category to the agency that owns the resulting case.
///
/// Unknown categories fall back to [`AGENCY_INFRA`]; routing never fails.
#[must_use]
pub fn agency_for_category(category: &str) -> &'static str {
    match category {
        "kesehatan" => AGENCY_HEALTH,
        "keamanan" | "kriminalitas" => AGENCY_SAFETY,
        _ => AGENCY_INFRA,
    }
}

/// Who may see a report and its reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Listed in the public feed; reporter identity shown to officers.
    #[serde(rename = "PUBLIC")]
    Public,
    /// Hidden from the public feed; reporter identity masked.
    #[serde(rename = "ANONYMOUS")]
    Anonymous,
}

impl Visibility {
    /// Parses a visibility value. Anything other than the two known values
    /// is rejected.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for unrecognized input.
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "PUBLIC" => Ok(Self::Public),
            "ANONYMOUS" => Ok(Self::Anonymous),
            other => Err(ServiceError::Validation(format!(
                "visibility must be PUBLIC or ANONYMOUS, got {other:?}"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Anonymous => "ANONYMOUS",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Workflow status of a case. RESOLVED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    #[serde(rename = "RECEIVED")]
    Received,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "RESOLVED")]
    Resolved,
}

impl CaseStatus {
    /// Parses a case status from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for unrecognized input.
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "RECEIVED" => Ok(Self::Received),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RESOLVED" => Ok(Self::Resolved),
            other => Err(ServiceError::Validation(format!(
                "status must be RECEIVED, IN_PROGRESS, or RESOLVED, got {other:?}"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
        }
    }

    /// True for statuses that close the case and its SLA job.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of an SLA job. COMPLETED is terminal; ESCALATED records a
/// breach that already produced an escalation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlaStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "ESCALATED")]
    Escalated,
}

impl SlaStatus {
    /// Parses an SLA status from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for unrecognized input.
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "ESCALATED" => Ok(Self::Escalated),
            other => Err(ServiceError::Validation(format!(
                "unknown SLA status {other:?}"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Escalated => "ESCALATED",
        }
    }
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A citizen report as held by the authoritative write store.
///
/// Reports are immutable once created; workflow state lives on the case,
/// not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_id: Uuid,
    pub reporter_user_id: String,
    pub visibility: Visibility,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Builds a fresh report with a new id and the current timestamp.
    /// Empty categories collapse to the catch-all.
    #[must_use]
    pub fn new(
        reporter_user_id: impl Into<String>,
        visibility: Visibility,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let category = category.into();
        Self {
            report_id: Uuid::new_v4(),
            reporter_user_id: reporter_user_id.into(),
            visibility,
            content: content.into(),
            category: if category.is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category
            },
            created_at: Utc::now(),
        }
    }
}
