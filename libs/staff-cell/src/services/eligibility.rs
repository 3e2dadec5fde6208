// libs/staff-cell/src/services/eligibility.rs
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;
use chrono::{NaiveDate, Utc};

use std::sync::Arc;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{SetAvailabilityRequest, StaffAvailabilityRecord, StaffError, StaffMember, StaffRole};

pub struct EligibilityService {
    supabase: Arc<SupabaseClient>,
}

impl EligibilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Active doctors minus those with an explicit unavailable record for the
    /// date. Eligibility is a set; the name ordering is for display only.
    pub fn filter_eligible(
        all_staff: Vec<StaffMember>,
        availability_records: &[StaffAvailabilityRecord],
        date: NaiveDate,
    ) -> Vec<StaffMember> {
        let mut eligible: Vec<StaffMember> = all_staff
            .into_iter()
            .filter(|staff| staff.role == StaffRole::Doctor && staff.is_active)
            .filter(|staff| {
                !availability_records.iter().any(|record| {
                    record.staff_id == staff.id
                        && record.availability_date == date
                        && !record.is_available
                })
            })
            .collect();

        eligible.sort_by(|a, b| {
            a.first_name
                .cmp(&b.first_name)
                .then_with(|| a.last_name.cmp(&b.last_name))
        });

        eligible
    }

    /// Doctors eligible to be selected for booking on the given date.
    pub async fn eligible_staff(&self, date: NaiveDate) -> Result<Vec<StaffMember>, StaffError> {
        debug!("Resolving eligible staff for {}", date);

        let staff = self.get_active_doctors().await?;
        let records = self.get_availability_records_for_date(date).await?;

        Ok(Self::filter_eligible(staff, &records, date))
    }

    /// Whether one specific staff member can be booked on the date. Used by
    /// the booking write path before it takes the scheduling lock.
    pub async fn is_staff_available(
        &self,
        staff_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, StaffError> {
        let path = format!("/rest/v1/staff?id=eq.{}", staff_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StaffError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(StaffError::NotFound);
        }

        let staff: StaffMember = serde_json::from_value(result[0].clone())
            .map_err(|e| StaffError::DatabaseError(format!("Failed to parse staff member: {}", e)))?;

        if staff.role != StaffRole::Doctor || !staff.is_active {
            return Ok(false);
        }

        let records = self.get_availability_records(staff_id, date).await?;
        Ok(!records.iter().any(|record| !record.is_available))
    }

    /// Upsert the per-date availability flag (vacation, sick day, ad-hoc
    /// return). One record per (staff, date).
    pub async fn set_staff_availability(
        &self,
        request: SetAvailabilityRequest,
    ) -> Result<StaffAvailabilityRecord, StaffError> {
        debug!(
            "Setting availability for staff {} on {} to {}",
            request.staff_id, request.availability_date, request.is_available
        );

        let existing = self
            .get_availability_records(request.staff_id, request.availability_date)
            .await?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = if let Some(record) = existing.first() {
            let path = format!("/rest/v1/staff_availability?id=eq.{}", record.id);
            let update_data = json!({
                "is_available": request.is_available,
                "updated_at": Utc::now().to_rfc3339(),
            });
            self.supabase
                .request_with_headers(Method::PATCH, &path, Some(update_data), Some(headers))
                .await
                .map_err(|e| StaffError::DatabaseError(e.to_string()))?
        } else {
            let record_data = json!({
                "staff_id": request.staff_id,
                "availability_date": request.availability_date,
                "is_available": request.is_available,
                "created_at": Utc::now().to_rfc3339(),
                "updated_at": Utc::now().to_rfc3339(),
            });
            self.supabase
                .request_with_headers(Method::POST, "/rest/v1/staff_availability", Some(record_data), Some(headers))
                .await
                .map_err(|e| StaffError::DatabaseError(e.to_string()))?
        };

        if result.is_empty() {
            return Err(StaffError::DatabaseError("Failed to store availability record".to_string()));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| StaffError::DatabaseError(format!("Failed to parse availability record: {}", e)))
    }

    /// Availability records from a date forward, newest first, for the
    /// staff dashboard listing.
    pub async fn list_staff_availability(
        &self,
        from_date: NaiveDate,
    ) -> Result<Vec<StaffAvailabilityRecord>, StaffError> {
        let path = format!(
            "/rest/v1/staff_availability?availability_date=gte.{}&order=availability_date.desc",
            from_date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StaffError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<StaffAvailabilityRecord>, _>>()
            .map_err(|e| StaffError::DatabaseError(format!("Failed to parse availability records: {}", e)))
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn get_active_doctors(&self) -> Result<Vec<StaffMember>, StaffError> {
        let path = "/rest/v1/staff?role=eq.doctor&is_active=eq.true&order=first_name.asc,last_name.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| StaffError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<StaffMember>, _>>()
            .map_err(|e| StaffError::DatabaseError(format!("Failed to parse staff: {}", e)))
    }

    async fn get_availability_records_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<StaffAvailabilityRecord>, StaffError> {
        let path = format!("/rest/v1/staff_availability?availability_date=eq.{}", date);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StaffError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<StaffAvailabilityRecord>, _>>()
            .map_err(|e| {
                warn!("Malformed staff_availability rows for {}: {}", date, e);
                StaffError::DatabaseError(format!("Failed to parse availability records: {}", e))
            })
    }

    async fn get_availability_records(
        &self,
        staff_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<StaffAvailabilityRecord>, StaffError> {
        let path = format!(
            "/rest/v1/staff_availability?staff_id=eq.{}&availability_date=eq.{}",
            staff_id, date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| StaffError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<StaffAvailabilityRecord>, _>>()
            .map_err(|e| StaffError::DatabaseError(format!("Failed to parse availability records: {}", e)))
    }
}
