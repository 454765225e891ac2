//! Event contracts for the `report-events` stream.
//!
//! Every service publishes and consumes the same envelope: structural
//! fields for cheap filtering plus an opaque JSON payload. The payload
//! shapes are typed here, one struct per event type, and the vocabulary is
//! unified — there is a single dotted naming scheme and a single stream,
//! regardless of which service emits.
//!
//! The envelope round-trips through JSON losslessly; consumers parse the
//! payload with [`Event::parse_payload`] against the struct matching
//! [`Event::event_type`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Name of the single shared stream.
pub const STREAM_NAME: &str = "report-events";

/// Event type names.
pub mod types {
    /// A citizen or operator submitted a new report.
    pub const REPORT_CREATED: &str = "report.created";
    /// An officer moved a case to a new workflow status.
    pub const REPORT_STATUS_UPDATED: &str = "report.status.updated";
    /// A citizen upvoted a public report.
    pub const REPORT_UPVOTED: &str = "report.upvoted";
    /// The SLA sweeper detected a breached deadline.
    pub const REPORT_ESCALATED: &str = "report.escalated";
    /// An operator revised a report's content, category, or status.
    pub const REPORT_UPDATED: &str = "report.updated";
    /// An operator removed a report.
    pub const REPORT_DELETED: &str = "report.deleted";
}

/// The envelope appended to the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub report_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Serialized domain payload; the bus never looks inside.
    pub payload: serde_json::Value,
}

impl Event {
    /// Wraps a payload in a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if the payload cannot be
    /// serialized.
    pub fn new<P: Serialize>(
        event_type: &str,
        report_id: Uuid,
        payload: &P,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            report_id,
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Deserializes the payload into the struct for this event type.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` when the payload does not match
    /// the expected shape.
    pub fn parse_payload<P: DeserializeOwned>(&self) -> Result<P, ServiceError> {
        serde_json::from_value(self.payload.clone()).map_err(|err| {
            ServiceError::Validation(format!(
                "payload of {} event {} does not parse: {err}",
                self.event_type, self.event_id
            ))
        })
    }

    /// Serializes the envelope for the stream.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` on serialization failure.
    pub fn to_json(&self) -> Result<Vec<u8>, ServiceError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope read back from the stream.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for bytes that are not a valid
    /// envelope.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ServiceError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Payload of [`types::REPORT_CREATED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCreated {
    pub report_id: Uuid,
    pub reporter_user_id: String,
    pub visibility: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of [`types::REPORT_STATUS_UPDATED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatusUpdated {
    pub report_id: Uuid,
    pub old_status: String,
    pub new_status: String,
    pub owner_agency: String,
    pub changed_at: DateTime<Utc>,
}

/// Payload of [`types::REPORT_UPVOTED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportUpvoted {
    pub report_id: Uuid,
    pub voter_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of [`types::REPORT_ESCALATED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEscalated {
    pub report_id: Uuid,
    pub reason: String,
    pub escalation_level: i64,
}

/// Payload of [`types::REPORT_UPDATED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportUpdated {
    pub report_id: Uuid,
    pub content: String,
    pub category: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Payload of [`types::REPORT_DELETED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDeleted {
    pub report_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_payload() -> ReportCreated {
        ReportCreated {
            report_id: Uuid::new_v4(),
            reporter_user_id: "citizen1".into(),
            visibility: "PUBLIC".into(),
            content: "Jalan rusak di depan pasar".into(),
            category: "infrastruktur".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_round_trips() {
        let payload = created_payload();
        let event = Event::new(types::REPORT_CREATED, payload.report_id, &payload).unwrap();

        let bytes = event.to_json().unwrap();
        let parsed = Event::from_json(&bytes).unwrap();

        assert_eq!(parsed, event);
        assert_eq!(parsed.parse_payload::<ReportCreated>().unwrap(), payload);
    }

    #[test]
    fn envelope_carries_structural_fields() {
        let payload = created_payload();
        let event = Event::new(types::REPORT_CREATED, payload.report_id, &payload).unwrap();

        assert_eq!(event.event_type, "report.created");
        assert_eq!(event.report_id, payload.report_id);
        // Fresh event id per envelope, not derived from the report.
        assert_ne!(event.event_id, event.report_id);
    }

    #[test]
    fn mismatched_payload_shape_is_rejected() {
        let payload = created_payload();
        let event = Event::new(types::REPORT_CREATED, payload.report_id, &payload).unwrap();

        let err = event.parse_payload::<ReportEscalated>().unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn timestamp_serializes_as_rfc3339() {
        let payload = created_payload();
        let event = Event::new(types::REPORT_CREATED, payload.report_id, &payload).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(ts.contains('T'), "expected RFC3339 timestamp, got {ts}");
    }
}
