// libs/appointment-cell/src/services/booking.rs
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use staff_cell::services::eligibility::EligibilityService;
use staff_cell::models::StaffError;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
    AvailableSlot, BookAppointmentRequest, BookingType, BusinessHourWindow,
    RescheduleAppointmentRequest, Service, UpdateAppointmentStatusRequest,
};
use crate::services::availability::{day_of_week, minute_of_day, AvailabilityEngine};

const LOCK_TTL_SECONDS: i64 = 30;
const LOCK_MAX_ATTEMPTS: u32 = 3;

pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    engine: AvailabilityEngine,
    eligibility_service: EligibilityService,
    clinic_utc_offset_minutes: i32,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            engine: AvailabilityEngine::new(),
            eligibility_service: EligibilityService::new(config),
            clinic_utc_offset_minutes: config.clinic_utc_offset_minutes,
        }
    }

    /// Book an appointment. Re-validates against the freshest appointment
    /// state under a per-(resource, date) scheduling lock, so of two
    /// concurrent overlapping submissions at most one commits.
    pub async fn submit_booking(
        &self,
        request: BookAppointmentRequest,
        booking_type: BookingType,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking {} appointment for patient {} on {} at {}",
            booking_type, request.patient_id, request.appointment_date, request.start_time
        );

        // Step 1: structural validation
        if request.appointment_date < self.clinic_today() {
            return Err(AppointmentError::ValidationError(
                "Appointment date cannot be in the past".to_string(),
            ));
        }

        let service = self.get_service(request.service_id).await?;
        if !service.is_active {
            return Err(AppointmentError::ValidationError(
                "Service is not currently offered".to_string(),
            ));
        }
        if service.duration_minutes <= 0 {
            return Err(AppointmentError::ValidationError(
                "Service has a non-positive duration".to_string(),
            ));
        }

        // Step 2: end time and business-hours containment
        let start = minute_of_day(request.start_time);
        let end = start + service.duration_minutes;
        if end > 24 * 60 {
            return Err(AppointmentError::ValidationError(
                "Appointment cannot cross midnight".to_string(),
            ));
        }

        let windows = self.get_business_hour_windows().await?;
        let weekday = day_of_week(request.appointment_date);

        // Containment in a single window, not the merged span: the gap
        // between disjoint windows would pass a span check but is closed
        // time, and the read path never offers a candidate there.
        if !self
            .engine
            .interval_within_business_hours(&windows, weekday, start, end)
        {
            return Err(AppointmentError::NotWithinBusinessHours);
        }

        // Step 3: staff day-eligibility, when a specific staff member is requested
        if let Some(staff_id) = request.staff_id {
            let available = self
                .eligibility_service
                .is_staff_available(staff_id, request.appointment_date)
                .await
                .map_err(|e| match e {
                    StaffError::NotFound => {
                        AppointmentError::ValidationError("Selected staff member does not exist".to_string())
                    }
                    other => AppointmentError::DatabaseError(other.to_string()),
                })?;

            if !available {
                return Err(AppointmentError::StaffIneligible);
            }
        }

        // Step 4: serialize re-validation and insert per (resource, date)
        let lock_key = Self::lock_key(request.staff_id, request.appointment_date);
        self.acquire_booking_lock(&lock_key).await?;

        let outcome = self
            .validate_and_create(&request, &service, booking_type, end)
            .await;

        // The lock is released on every path; a failed release only delays
        // the next booker until the TTL expires.
        if let Err(e) = self.release_booking_lock(&lock_key).await {
            warn!("Failed to release booking lock {}: {}", lock_key, e);
        }

        let appointment = outcome?;
        info!("Appointment {} booked ({})", appointment.id, booking_type);
        Ok(appointment)
    }

    /// Move an appointment to a new date and start time. The new interval
    /// goes through the same business-hours, eligibility, and conflict
    /// validation as a fresh booking, under the same scheduling lock, with
    /// the appointment's own row excluded from the conflict set so a move
    /// within one day never collides with itself.
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Rescheduling appointment {} to {} at {}",
            appointment_id, request.appointment_date, request.start_time
        );

        let current = self.get_appointment(appointment_id).await?;
        if !matches!(
            current.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        ) {
            return Err(AppointmentError::ValidationError(format!(
                "A {} appointment cannot be rescheduled",
                current.status
            )));
        }

        if request.appointment_date < self.clinic_today() {
            return Err(AppointmentError::ValidationError(
                "Appointment date cannot be in the past".to_string(),
            ));
        }

        let service = self.get_service(current.service_id).await?;
        let start = minute_of_day(request.start_time);
        let end = start + service.duration_minutes;
        if end > 24 * 60 {
            return Err(AppointmentError::ValidationError(
                "Appointment cannot cross midnight".to_string(),
            ));
        }

        let windows = self.get_business_hour_windows().await?;
        let weekday = day_of_week(request.appointment_date);
        if !self
            .engine
            .interval_within_business_hours(&windows, weekday, start, end)
        {
            return Err(AppointmentError::NotWithinBusinessHours);
        }

        if let Some(staff_id) = current.staff_id {
            let available = self
                .eligibility_service
                .is_staff_available(staff_id, request.appointment_date)
                .await
                .map_err(|e| match e {
                    StaffError::NotFound => {
                        AppointmentError::ValidationError("Selected staff member does not exist".to_string())
                    }
                    other => AppointmentError::DatabaseError(other.to_string()),
                })?;

            if !available {
                return Err(AppointmentError::StaffIneligible);
            }
        }

        let lock_key = Self::lock_key(current.staff_id, request.appointment_date);
        self.acquire_booking_lock(&lock_key).await?;

        let outcome = self
            .revalidate_and_move(&current, &request, start, end)
            .await;

        if let Err(e) = self.release_booking_lock(&lock_key).await {
            warn!("Failed to release booking lock {}: {}", lock_key, e);
        }

        let appointment = outcome?;
        info!(
            "Appointment {} moved to {} at {}",
            appointment.id, appointment.appointment_date, appointment.start_time
        );
        Ok(appointment)
    }

    /// Read-path candidate generation: fetches service, windows, and the
    /// date's appointments immediately before invoking the engine. Nothing
    /// is cached between calls.
    pub async fn available_slots_for(
        &self,
        service_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, AppointmentError> {
        debug!("Computing available slots for service {} on {}", service_id, date);

        let service = self.get_service(service_id).await?;
        let windows = self.get_business_hour_windows().await?;
        let appointments = self.get_appointments_for_date(date, None).await?;

        Ok(self.engine.available_slots(&service, date, &windows, &appointments))
    }

    /// Authoritative free/occupied answer for one interval, scoped to a
    /// staff member when one is given and to the whole clinic otherwise.
    pub async fn is_interval_free(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        staff_id: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        let appointments = self.get_appointments_for_date(date, staff_id).await?;
        Ok(self.engine.is_slot_free(
            date,
            minute_of_day(start_time),
            minute_of_day(end_time),
            &appointments,
        ))
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(staff_id) = query.staff_id {
            query_parts.push(format!("staff_id=eq.{}", staff_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("appointment_date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("appointment_date=lte.{}", to_date));
        }

        query_parts.push("order=appointment_date.desc,start_time.desc".to_string());
        if let Some(limit) = query.limit {
            query_parts.push(format!("limit={}", limit));
        }
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    /// Staff status actions: confirm, complete, cancel, no-show. Flipping to
    /// cancelled frees the interval for new bookings implicitly.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentStatusRequest,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment {} to {}", appointment_id, request.status);

        let current = self.get_appointment(appointment_id).await?;

        if !current.status.valid_transitions().contains(&request.status) {
            warn!(
                "Invalid status transition attempted on {}: {} -> {}",
                appointment_id, current.status, request.status
            );
            return Err(AppointmentError::InvalidStatusTransition(current.status, request.status));
        }

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(request.status.to_string()));
        if let Some(notes) = request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(Value::Object(update_data)), Some(headers))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError("Failed to update appointment".to_string()));
        }

        let updated: Appointment = serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse updated appointment: {}", e)))?;

        info!("Appointment {} moved to {}", appointment_id, updated.status);
        Ok(updated)
    }

    pub async fn list_services(&self) -> Result<Vec<Service>, AppointmentError> {
        let path = "/rest/v1/services?is_active=eq.true&order=name.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Service>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse services: {}", e)))
    }

    pub async fn list_business_hours(&self) -> Result<Vec<BusinessHourWindow>, AppointmentError> {
        self.get_business_hour_windows().await
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    /// Current date at the clinic, derived from the fixed configured offset.
    fn clinic_today(&self) -> NaiveDate {
        (Utc::now() + ChronoDuration::minutes(self.clinic_utc_offset_minutes as i64)).date_naive()
    }

    fn lock_key(staff_id: Option<Uuid>, date: NaiveDate) -> String {
        match staff_id {
            Some(id) => format!("{}:{}", id, date),
            None => format!("clinic:{}", date),
        }
    }

    /// Steps 3-4 of the booking transaction, run under the scheduling lock:
    /// re-fetch the resource's appointments and insert only when still free.
    async fn validate_and_create(
        &self,
        request: &BookAppointmentRequest,
        service: &Service,
        booking_type: BookingType,
        end_minute: i32,
    ) -> Result<Appointment, AppointmentError> {
        let fresh_appointments = self
            .get_appointments_for_date(request.appointment_date, request.staff_id)
            .await?;

        let start_minute = minute_of_day(request.start_time);
        if !self
            .engine
            .is_slot_free(request.appointment_date, start_minute, end_minute, &fresh_appointments)
        {
            warn!(
                "Slot starting {} on {} taken between render and commit",
                request.start_time, request.appointment_date
            );
            return Err(AppointmentError::SlotNoLongerAvailable);
        }

        let end_time = request.start_time + ChronoDuration::minutes(service.duration_minutes as i64);
        self.create_appointment_record(request, end_time, booking_type).await
    }

    /// The locked half of rescheduling: re-fetch the target date's
    /// appointments, drop the moving row from the conflict set, and PATCH
    /// the new interval only when it is still free.
    async fn revalidate_and_move(
        &self,
        current: &Appointment,
        request: &RescheduleAppointmentRequest,
        start_minute: i32,
        end_minute: i32,
    ) -> Result<Appointment, AppointmentError> {
        let mut fresh_appointments = self
            .get_appointments_for_date(request.appointment_date, current.staff_id)
            .await?;
        fresh_appointments.retain(|apt| apt.id != current.id);

        if !self.engine.is_slot_free(
            request.appointment_date,
            start_minute,
            end_minute,
            &fresh_appointments,
        ) {
            warn!(
                "Reschedule target {} on {} taken between render and commit",
                request.start_time, request.appointment_date
            );
            return Err(AppointmentError::SlotNoLongerAvailable);
        }

        let end_time = request.start_time + ChronoDuration::minutes((end_minute - start_minute) as i64);

        let mut update_data = serde_json::Map::new();
        update_data.insert("appointment_date".to_string(), json!(request.appointment_date));
        update_data.insert("start_time".to_string(), json!(request.start_time));
        update_data.insert("end_time".to_string(), json!(end_time));
        if let Some(notes) = &request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/appointments?id=eq.{}", current.id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(Value::Object(update_data)), Some(headers))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError("Failed to reschedule appointment".to_string()));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse rescheduled appointment: {}", e)))
    }

    async fn create_appointment_record(
        &self,
        request: &BookAppointmentRequest,
        end_time: NaiveTime,
        booking_type: BookingType,
    ) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();
        let appointment_data = json!({
            "patient_id": request.patient_id,
            "service_id": request.service_id,
            "staff_id": request.staff_id,
            "appointment_date": request.appointment_date,
            "start_time": request.start_time,
            "end_time": end_time,
            "status": AppointmentStatus::Pending.to_string(),
            "booking_type": booking_type.to_string(),
            "notes": request.notes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::POST, "/rest/v1/appointments", Some(appointment_data), Some(headers))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::DatabaseError("Failed to create appointment".to_string()));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse created appointment: {}", e)))
    }

    async fn get_service(&self, service_id: Uuid) -> Result<Service, AppointmentError> {
        let path = format!("/rest/v1/services?id=eq.{}", service_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::ServiceNotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse service: {}", e)))
    }

    async fn get_business_hour_windows(&self) -> Result<Vec<BusinessHourWindow>, AppointmentError> {
        let path = "/rest/v1/time_slots?is_active=eq.true&order=day_of_week.asc,start_time.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<BusinessHourWindow>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse business hours: {}", e)))
    }

    /// Non-cancelled appointments for the date, narrowed to one staff member
    /// when the booking tracks staff and clinic-wide otherwise.
    async fn get_appointments_for_date(
        &self,
        date: NaiveDate,
        staff_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?appointment_date=eq.{}&status=neq.cancelled&order=start_time.asc",
            date
        );
        if let Some(staff_id) = staff_id {
            path.push_str(&format!("&staff_id=eq.{}", staff_id));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    /// Take the per-(resource, date) lock by unique insert into
    /// `booking_locks`. Contention is retried briefly; a booker that never
    /// gets the lock reports the slot as gone rather than guessing.
    async fn acquire_booking_lock(&self, lock_key: &str) -> Result<(), AppointmentError> {
        for attempt in 1..=LOCK_MAX_ATTEMPTS {
            // Clear any lock that outlived its holder first.
            let expired_path = format!(
                "/rest/v1/booking_locks?lock_key=eq.{}&expires_at=lt.{}",
                lock_key,
                Utc::now().to_rfc3339()
            );
            let _: Vec<Value> = self
                .supabase
                .request(Method::DELETE, &expired_path, None)
                .await
                .unwrap_or_default();

            let lock_data = json!({
                "lock_key": lock_key,
                "acquired_at": Utc::now().to_rfc3339(),
                "expires_at": (Utc::now() + ChronoDuration::seconds(LOCK_TTL_SECONDS)).to_rfc3339(),
            });

            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

            match self
                .supabase
                .request_with_headers::<Vec<Value>>(
                    Method::POST,
                    "/rest/v1/booking_locks",
                    Some(lock_data),
                    Some(headers),
                )
                .await
            {
                Ok(_) => {
                    debug!("Acquired booking lock {} (attempt {})", lock_key, attempt);
                    return Ok(());
                }
                Err(e) if attempt < LOCK_MAX_ATTEMPTS => {
                    debug!("Booking lock {} contended: {}", lock_key, e);
                    tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => {
                    warn!("Could not acquire booking lock {}: {}", lock_key, e);
                    return Err(AppointmentError::SlotNoLongerAvailable);
                }
            }
        }

        Err(AppointmentError::SlotNoLongerAvailable)
    }

    async fn release_booking_lock(&self, lock_key: &str) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/booking_locks?lock_key=eq.{}", lock_key);
        let _: Vec<Value> = self
            .supabase
            .request(Method::DELETE, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
