// libs/staff-cell/tests/eligibility_test.rs

use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use staff_cell::models::{StaffAvailabilityRecord, StaffError, StaffMember, StaffRole};
use staff_cell::services::eligibility::EligibilityService;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

fn test_config(mock_server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: mock_server.uri(),
        supabase_service_key: "test-service-key".to_string(),
        clinic_utc_offset_minutes: 0,
        listen_port: 3000,
    }
}

fn june_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
}

fn staff(first_name: &str, last_name: &str, role: StaffRole, is_active: bool) -> StaffMember {
    StaffMember {
        id: Uuid::new_v4(),
        user_id: None,
        staff_number: None,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        role,
        phone: None,
        is_active,
    }
}

fn unavailable_record(staff_id: Uuid, date: NaiveDate) -> StaffAvailabilityRecord {
    StaffAvailabilityRecord {
        id: Uuid::new_v4(),
        staff_id,
        availability_date: date,
        is_available: false,
        created_at: None,
        updated_at: None,
    }
}

// ==============================================================================
// PURE FILTER
// ==============================================================================

#[test]
fn only_active_doctors_are_eligible() {
    let date = june_date();
    let all_staff = vec![
        staff("Amara", "Diallo", StaffRole::Doctor, true),
        staff("Ben", "Hart", StaffRole::Nurse, true),
        staff("Carla", "Mendes", StaffRole::Doctor, false),
        staff("Dana", "Reyes", StaffRole::Receptionist, true),
    ];

    let eligible = EligibilityService::filter_eligible(all_staff, &[], date);

    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].full_name(), "Amara Diallo");
}

#[test]
fn explicit_unavailable_record_excludes_a_doctor() {
    let date = june_date();
    let excluded = staff("Amara", "Diallo", StaffRole::Doctor, true);
    let kept = staff("Elena", "Sokolova", StaffRole::Doctor, true);
    let records = vec![unavailable_record(excluded.id, date)];

    let eligible = EligibilityService::filter_eligible(vec![excluded, kept], &records, date);

    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].full_name(), "Elena Sokolova");
}

#[test]
fn record_for_a_different_date_does_not_exclude() {
    let date = june_date();
    let other_date = NaiveDate::from_ymd_opt(2025, 6, 17).unwrap();
    let doctor = staff("Amara", "Diallo", StaffRole::Doctor, true);
    let records = vec![unavailable_record(doctor.id, other_date)];

    let eligible = EligibilityService::filter_eligible(vec![doctor], &records, date);

    assert_eq!(eligible.len(), 1);
}

#[test]
fn positive_record_keeps_the_doctor_eligible() {
    let date = june_date();
    let doctor = staff("Amara", "Diallo", StaffRole::Doctor, true);
    let mut record = unavailable_record(doctor.id, date);
    record.is_available = true;

    let eligible = EligibilityService::filter_eligible(vec![doctor], &[record], date);

    assert_eq!(eligible.len(), 1);
}

#[test]
fn eligible_doctors_are_ordered_by_name() {
    let date = june_date();
    let all_staff = vec![
        staff("Elena", "Sokolova", StaffRole::Doctor, true),
        staff("Amara", "Zuma", StaffRole::Doctor, true),
        staff("Amara", "Diallo", StaffRole::Doctor, true),
    ];

    let eligible = EligibilityService::filter_eligible(all_staff, &[], date);

    let names: Vec<String> = eligible.iter().map(|s| s.full_name()).collect();
    assert_eq!(names, vec!["Amara Diallo", "Amara Zuma", "Elena Sokolova"]);
}

// ==============================================================================
// BACKEND-FACING PATHS
// ==============================================================================

#[tokio::test]
async fn eligible_staff_filters_out_doctors_marked_unavailable() {
    let mock_server = MockServer::start().await;
    let date = june_date();
    let away_id = Uuid::new_v4();
    let present_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": away_id,
                "first_name": "Amara",
                "last_name": "Diallo",
                "role": "doctor",
                "is_active": true,
            },
            {
                "id": present_id,
                "first_name": "Elena",
                "last_name": "Sokolova",
                "role": "doctor",
                "is_active": true,
            },
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/staff_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "staff_id": away_id,
            "availability_date": date.to_string(),
            "is_available": false,
        }])))
        .mount(&mock_server)
        .await;

    let service = EligibilityService::new(&test_config(&mock_server));
    let eligible = service.eligible_staff(date).await.unwrap();

    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, present_id);
}

#[tokio::test]
async fn is_staff_available_is_false_for_non_doctor_roles() {
    let mock_server = MockServer::start().await;
    let staff_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": staff_id,
            "first_name": "Dana",
            "last_name": "Reyes",
            "role": "receptionist",
            "is_active": true,
        }])))
        .mount(&mock_server)
        .await;

    let service = EligibilityService::new(&test_config(&mock_server));
    let available = service.is_staff_available(staff_id, june_date()).await.unwrap();

    assert!(!available);
}

#[tokio::test]
async fn is_staff_available_without_records_defaults_to_available() {
    let mock_server = MockServer::start().await;
    let staff_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": staff_id,
            "first_name": "Amara",
            "last_name": "Diallo",
            "role": "doctor",
            "is_active": true,
        }])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/staff_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = EligibilityService::new(&test_config(&mock_server));
    let available = service.is_staff_available(staff_id, june_date()).await.unwrap();

    assert!(available);
}

#[tokio::test]
async fn unknown_staff_member_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = EligibilityService::new(&test_config(&mock_server));
    let result = service.is_staff_available(Uuid::new_v4(), june_date()).await;

    assert_matches!(result, Err(StaffError::NotFound));
}

#[tokio::test]
async fn set_availability_creates_a_record_when_none_exists() {
    let mock_server = MockServer::start().await;
    let date = june_date();
    let staff_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/staff_availability"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "staff_id": staff_id,
            "availability_date": date.to_string(),
            "is_available": false,
        }])))
        .mount(&mock_server)
        .await;

    let service = EligibilityService::new(&test_config(&mock_server));
    let record = service
        .set_staff_availability(staff_cell::models::SetAvailabilityRequest {
            staff_id,
            availability_date: date,
            is_available: false,
        })
        .await
        .unwrap();

    assert_eq!(record.staff_id, staff_id);
    assert!(!record.is_available);
}
