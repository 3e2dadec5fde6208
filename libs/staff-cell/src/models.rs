// libs/staff-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub staff_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub role: StaffRole,
    pub phone: Option<String>,
    pub is_active: bool,
}

impl StaffMember {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Doctor,
    Nurse,
    Receptionist,
    Admin,
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaffRole::Doctor => write!(f, "doctor"),
            StaffRole::Nurse => write!(f, "nurse"),
            StaffRole::Receptionist => write!(f, "receptionist"),
            StaffRole::Admin => write!(f, "admin"),
        }
    }
}

/// Per-date availability override. No record for a (staff, date) pair means
/// the member is available; an explicit record wins in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffAvailabilityRecord {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub availability_date: NaiveDate,
    pub is_available: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAvailabilityRequest {
    pub staff_id: Uuid,
    pub availability_date: NaiveDate,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum StaffError {
    #[error("Staff member not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
