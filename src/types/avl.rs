use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::geo::Location;

/// How the assignment hint on an AVL report should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentType {
    Block,
    Route,
    Trip,
    #[default]
    None,
}

/// A single position fix from a vehicle. Immutable once accepted.
///
/// This is also the wire format on the AVL feed subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvlReport {
    pub vehicle_id: String,
    /// Fix time, epoch milliseconds.
    pub time: i64,
    pub lat: f64,
    pub lon: f64,
    /// Heading in degrees [0, 360), if the feed provides one.
    pub heading: Option<f64>,
    /// Speed in m/s, if the feed provides one.
    pub speed: Option<f64>,
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub assignment_type: AssignmentType,
}

impl AvlReport {
    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }

    /// A usable heading: present and within [0, 360).
    pub fn valid_heading(&self) -> Option<f64> {
        self.heading
            .filter(|h| h.is_finite() && (0.0..360.0).contains(h))
    }

    /// An assignment hint the block assigner can act on.
    pub fn has_valid_assignment(&self) -> bool {
        self.assignment_type != AssignmentType::None
            && self
                .assignment_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }

    /// Reject reports that cannot be matched at all: bad coordinates,
    /// missing vehicle id, or a nonsensical timestamp.
    pub fn validate(&self) -> Result<(), String> {
        if self.vehicle_id.is_empty() {
            return Err("empty vehicle id".to_string());
        }
        if !self.location().is_valid() {
            return Err(format!("invalid coordinates ({}, {})", self.lat, self.lon));
        }
        if self.time <= 0 {
            return Err(format!("invalid fix time {}", self.time));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> AvlReport {
        AvlReport {
            vehicle_id: "1701".to_string(),
            time: 1_700_000_000_000,
            lat: 50.0755,
            lon: 14.4378,
            heading: Some(182.5),
            speed: Some(11.2),
            assignment_id: Some("block-7".to_string()),
            assignment_type: AssignmentType::Block,
        }
    }

    #[test]
    fn test_avl_report_deserialize() {
        let json = r#"{
            "vehicleId": "1701",
            "time": 1700000000000,
            "lat": 50.0755,
            "lon": 14.4378,
            "heading": 182.5,
            "assignmentId": "block-7",
            "assignmentType": "BLOCK"
        }"#;

        let parsed: AvlReport = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.vehicle_id, "1701");
        assert_eq!(parsed.assignment_type, AssignmentType::Block);
        assert!(parsed.has_valid_assignment());
        assert!(parsed.speed.is_none());
    }

    #[test]
    fn test_assignment_type_defaults_to_none() {
        let json = r#"{"vehicleId": "1701", "time": 1, "lat": 0.0, "lon": 0.0}"#;
        let parsed: AvlReport = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.assignment_type, AssignmentType::None);
        assert!(!parsed.has_valid_assignment());
    }

    #[test]
    fn test_valid_heading_range() {
        let mut r = report();
        assert_eq!(r.valid_heading(), Some(182.5));

        r.heading = Some(360.0);
        assert!(r.valid_heading().is_none());

        r.heading = None;
        assert!(r.valid_heading().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_reports() {
        let mut r = report();
        assert!(r.validate().is_ok());

        r.lat = 95.0;
        assert!(r.validate().is_err());

        let mut r = report();
        r.vehicle_id.clear();
        assert!(r.validate().is_err());

        let mut r = report();
        r.time = 0;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_empty_assignment_id_is_not_valid() {
        let mut r = report();
        r.assignment_id = Some(String::new());
        assert!(!r.has_valid_assignment());
    }
}
