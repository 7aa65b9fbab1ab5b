//! NATS message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::vehicle_state::VehicleSnapshot;

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Empty payload that accepts both `null` and `{}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Request a single vehicle snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleGetRequest {
    pub vehicle_id: String,
}

/// Request the vehicles currently assigned to a block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclesByBlockRequest {
    pub block_id: String,
}

/// Explicitly evict a vehicle from the state store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictVehicleRequest {
    pub vehicle_id: String,
}

/// Response for list of vehicle snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleListResponse {
    pub items: Vec<VehicleSnapshot>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_round_trip() {
        let request = Request::new(VehicleGetRequest {
            vehicle_id: "1701".to_string(),
        });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"vehicleId\":\"1701\""));

        let parsed: Request<VehicleGetRequest> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, request.id);
        assert_eq!(parsed.payload.vehicle_id, "1701");
    }

    #[test]
    fn test_error_response_carries_request_id() {
        let id = Uuid::new_v4();
        let error = ErrorResponse::new(id, "NOT_FOUND", "no such vehicle");
        assert_eq!(error.id, id);
        assert_eq!(error.error.code, "NOT_FOUND");
    }

    #[test]
    fn test_empty_payload_accepts_null_and_object() {
        let _: Request<EmptyPayload> = serde_json::from_str(
            r#"{"id":"123e4567-e89b-12d3-a456-426614174000","timestamp":"2026-08-01T08:00:00Z","payload":{}}"#,
        )
        .unwrap();
    }
}
