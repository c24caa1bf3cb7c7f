// Core records and request shapes for driver-load assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Statuses
// ============================================================================

/// Error returned when a status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Driver availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriverStatus {
    Active,
    Inactive,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for DriverStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            other => Err(UnknownStatus {
                kind: "driver",
                value: other.to_string(),
            }),
        }
    }
}

/// Load lifecycle status
///
/// Only the assignment coordinator moves a load out of `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Open,
    Assigned,
    Completed,
    Cancelled,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for LoadStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "ASSIGNED" => Ok(Self::Assigned),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                kind: "load",
                value: other.to_string(),
            }),
        }
    }
}

/// Assignment lifecycle status
///
/// `Assigned` is the only non-terminal state. The only legal moves are
/// `Assigned -> Completed` and `Assigned -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignmentStatus {
    Assigned,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Assigned)
    }

    /// Check whether `self -> target` is a permitted transition
    pub fn can_transition_to(&self, target: AssignmentStatus) -> bool {
        matches!(
            (self, target),
            (Self::Assigned, Self::Completed) | (Self::Assigned, Self::Cancelled)
        )
    }

    /// Load status that mirrors this assignment status
    pub fn load_status(&self) -> LoadStatus {
        match self {
            Self::Assigned => LoadStatus::Assigned,
            Self::Completed => LoadStatus::Completed,
            Self::Cancelled => LoadStatus::Cancelled,
        }
    }

    /// Audit event type recorded when an assignment reaches this status
    pub fn audit_event_type(&self) -> Option<&'static str> {
        match self {
            Self::Assigned => None,
            Self::Completed => Some("LOAD_COMPLETED"),
            Self::Cancelled => Some("ASSIGNMENT_CANCELLED"),
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSIGNED" => Ok(Self::Assigned),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                kind: "assignment",
                value: other.to_string(),
            }),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(DriverStatus, LoadStatus, AssignmentStatus);

// ============================================================================
// Records
// ============================================================================

/// Driver record (owned by driver management, read-only here)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub license_number: String,
    pub status: DriverStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Create an active driver stamped with the current time
    pub fn new(name: impl Into<String>, license_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            license_number: license_number.into(),
            status: DriverStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Freight load record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    pub cargo_type: String,
    pub status: LoadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Load {
    /// Create an open load stamped with the current time
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        cargo_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            origin: origin.into(),
            destination: destination.into(),
            cargo_type: cargo_type.into(),
            status: LoadStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this load carrying a different status
    pub fn with_status(&self, status: LoadStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Binding of one driver to one load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub load_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    /// A fresh assignment always starts in `Assigned`
    pub fn new(driver_id: Uuid, load_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver_id,
            load_id,
            status: AssignmentStatus::Assigned,
            assigned_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Assigned
    }
}

/// Assignment joined with its driver and load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDetails {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub driver: Driver,
    pub load: Load,
}

/// Payload published on the assignment-created topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentCreatedEvent {
    pub assignment_id: Uuid,
    pub driver: Driver,
    pub load: Load,
}

// ============================================================================
// Requests
// ============================================================================

/// Request validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be a UUID")]
    InvalidId { field: &'static str },

    #[error("status must be one of COMPLETED, CANCELLED")]
    InvalidTargetStatus,
}

/// Parse an identifier from the wire
pub fn parse_id(field: &'static str, raw: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidId { field })
}

/// Body of `POST /api/assignments`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    pub driver_id: String,
    pub load_id: String,
}

impl CreateAssignmentRequest {
    /// Validate and return `(driver_id, load_id)`
    pub fn validate(&self) -> Result<(Uuid, Uuid), ValidationError> {
        let driver_id = parse_id("driverId", &self.driver_id)?;
        let load_id = parse_id("loadId", &self.load_id)?;
        Ok((driver_id, load_id))
    }
}

/// Body of `PATCH /api/assignments/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAssignmentStatusRequest {
    pub status: String,
}

impl UpdateAssignmentStatusRequest {
    /// Only terminal statuses are accepted as targets
    pub fn validate(&self) -> Result<AssignmentStatus, ValidationError> {
        match self.status.parse::<AssignmentStatus>() {
            Ok(status) if status.is_terminal() => Ok(status),
            _ => Err(ValidationError::InvalidTargetStatus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_transitions() {
        use AssignmentStatus::*;

        assert!(Assigned.can_transition_to(Completed));
        assert!(Assigned.can_transition_to(Cancelled));
        assert!(!Assigned.can_transition_to(Assigned));
        for terminal in [Completed, Cancelled] {
            for target in [Assigned, Completed, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_load_status_follows_assignment() {
        assert_eq!(AssignmentStatus::Assigned.load_status(), LoadStatus::Assigned);
        assert_eq!(AssignmentStatus::Completed.load_status(), LoadStatus::Completed);
        assert_eq!(AssignmentStatus::Cancelled.load_status(), LoadStatus::Cancelled);
    }

    #[test]
    fn test_audit_event_types() {
        assert_eq!(AssignmentStatus::Assigned.audit_event_type(), None);
        assert_eq!(
            AssignmentStatus::Completed.audit_event_type(),
            Some("LOAD_COMPLETED")
        );
        assert_eq!(
            AssignmentStatus::Cancelled.audit_event_type(),
            Some("ASSIGNMENT_CANCELLED")
        );
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("OPEN".parse::<LoadStatus>().unwrap(), LoadStatus::Open);
        assert_eq!(LoadStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!("INACTIVE".parse::<DriverStatus>().unwrap(), DriverStatus::Inactive);
        assert!("open".parse::<LoadStatus>().is_err());
        assert!("PENDING".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let driver = Driver::new("John Doe", "ABC123");
        let load = Load::new("City A", "City B", "Electronics");
        let event = AssignmentCreatedEvent {
            assignment_id: Uuid::new_v4(),
            driver: driver.clone(),
            load: load.with_status(LoadStatus::Assigned),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("assignmentId").is_some());
        assert_eq!(json["driver"]["licenseNumber"], "ABC123");
        assert_eq!(json["load"]["cargoType"], "Electronics");
        assert_eq!(json["load"]["status"], "ASSIGNED");
    }

    #[test]
    fn test_details_flatten_assignment_fields() {
        let driver = Driver::new("Jane", "XYZ789");
        let load = Load::new("A", "B", "Grain");
        let assignment = Assignment::new(driver.id, load.id);
        let details = AssignmentDetails {
            assignment: assignment.clone(),
            driver,
            load,
        };

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["id"], assignment.id.to_string());
        assert_eq!(json["status"], "ASSIGNED");
        assert!(json["driver"].is_object());
        assert!(json["load"].is_object());
    }

    #[test]
    fn test_create_request_validation() {
        let driver_id = Uuid::new_v4();
        let load_id = Uuid::new_v4();
        let ok = CreateAssignmentRequest {
            driver_id: driver_id.to_string(),
            load_id: load_id.to_string(),
        };
        assert_eq!(ok.validate().unwrap(), (driver_id, load_id));

        let bad = CreateAssignmentRequest {
            driver_id: "driver-1".to_string(),
            load_id: load_id.to_string(),
        };
        assert_eq!(
            bad.validate().unwrap_err(),
            ValidationError::InvalidId { field: "driverId" }
        );
    }

    #[test]
    fn test_update_request_rejects_non_terminal_target() {
        let to = |s: &str| UpdateAssignmentStatusRequest { status: s.to_string() };

        assert_eq!(to("COMPLETED").validate().unwrap(), AssignmentStatus::Completed);
        assert_eq!(to("CANCELLED").validate().unwrap(), AssignmentStatus::Cancelled);
        assert_eq!(
            to("ASSIGNED").validate().unwrap_err(),
            ValidationError::InvalidTargetStatus
        );
        assert!(to("DONE").validate().is_err());
    }
}
