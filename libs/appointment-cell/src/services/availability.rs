// libs/appointment-cell/src/services/availability.rs
//
// Pure slot-availability computation. Every overlap decision in the system
// goes through `intervals_overlap`; nothing else re-implements the
// comparison.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use tracing::debug;

use crate::models::{
    Appointment, AvailableSlot, BusinessHourWindow, BusinessSpan, Service,
};

/// Minute-of-day (0..=1439) for a wall-clock time. Seconds are dropped; the
/// schema stores whole-minute times.
pub fn minute_of_day(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

fn time_from_minutes(minutes: i32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
}

/// Weekday number matching the `time_slots` schema: 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

pub struct AvailabilityEngine;

impl AvailabilityEngine {
    pub fn new() -> Self {
        Self
    }

    /// Half-open interval overlap on minute-of-day values. Back-to-back
    /// intervals (`a_end == b_start`) do not overlap.
    pub fn intervals_overlap(&self, a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
        a_start < b_end && b_start < a_end
    }

    /// Whether `[start, end)` on `date` is free of every appointment that
    /// still occupies its slot. Cancelled rows never block.
    pub fn is_slot_free(
        &self,
        date: NaiveDate,
        start: i32,
        end: i32,
        existing_appointments: &[Appointment],
    ) -> bool {
        !existing_appointments.iter().any(|apt| {
            apt.appointment_date == date
                && apt.status.occupies_slot()
                && self.intervals_overlap(
                    start,
                    end,
                    minute_of_day(apt.start_time),
                    minute_of_day(apt.end_time),
                )
        })
    }

    /// Whether `[start, end)` lies entirely inside one active window for the
    /// weekday. The gap between disjoint windows is closed time, so an
    /// interval straddling a window boundary is not within business hours
    /// even when the merged span contains it.
    pub fn interval_within_business_hours(
        &self,
        windows: &[BusinessHourWindow],
        day_of_week: i32,
        start: i32,
        end: i32,
    ) -> bool {
        windows.iter().any(|window| {
            window.is_active
                && window.day_of_week == day_of_week
                && start >= minute_of_day(window.start_time)
                && end <= minute_of_day(window.end_time)
        })
    }

    /// Merged business-hours bound for a weekday: earliest start to latest
    /// end over the active windows. `None` means the day is closed. Gaps
    /// between disjoint windows are NOT open time; callers use this only as
    /// an outer bound.
    pub fn compute_business_span(
        &self,
        windows: &[BusinessHourWindow],
        day_of_week: i32,
    ) -> Option<BusinessSpan> {
        let mut span: Option<BusinessSpan> = None;

        for window in windows {
            if !window.is_active || window.day_of_week != day_of_week {
                continue;
            }
            let start = minute_of_day(window.start_time);
            let end = minute_of_day(window.end_time);
            span = Some(match span {
                None => BusinessSpan { earliest_start: start, latest_end: end },
                Some(s) => BusinessSpan {
                    earliest_start: s.earliest_start.min(start),
                    latest_end: s.latest_end.max(end),
                },
            });
        }

        span
    }

    /// All bookable start times for a service on a date, ordered ascending.
    ///
    /// Candidates are generated per window, stepping through each active
    /// window at the service duration, so a gap between disjoint windows
    /// never produces a candidate. The merged span bounds candidate ends.
    /// An empty result is a normal outcome, not an error.
    pub fn available_slots(
        &self,
        service: &Service,
        date: NaiveDate,
        windows: &[BusinessHourWindow],
        existing_appointments: &[Appointment],
    ) -> Vec<AvailableSlot> {
        let weekday = day_of_week(date);

        let span = match self.compute_business_span(windows, weekday) {
            Some(span) => span,
            None => {
                debug!("No business-hour windows for weekday {}, day is closed", weekday);
                return vec![];
            }
        };

        let duration = service.duration_minutes;
        if duration <= 0 {
            // Invalid durations are rejected at the service-definition
            // boundary; never step a window with one.
            return vec![];
        }
        let mut slots: Vec<AvailableSlot> = Vec::new();

        for window in windows {
            if !window.is_active || window.day_of_week != weekday {
                continue;
            }

            let window_start = minute_of_day(window.start_time);
            let window_end = minute_of_day(window.end_time);

            let mut candidate_start = window_start;
            while candidate_start + duration <= window_end {
                let candidate_end = candidate_start + duration;

                if candidate_end <= span.latest_end
                    && self.is_slot_free(date, candidate_start, candidate_end, existing_appointments)
                {
                    if let (Some(start_time), Some(end_time)) =
                        (time_from_minutes(candidate_start), time_from_minutes(candidate_end))
                    {
                        slots.push(AvailableSlot { start_time, end_time });
                    }
                }

                candidate_start += duration;
            }
        }

        slots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        slots.dedup_by(|a, b| a.start_time == b.start_time);

        debug!("Found {} available slots for service {} on {}", slots.len(), service.id, date);
        slots
    }
}

impl Default for AvailabilityEngine {
    fn default() -> Self {
        Self::new()
    }
}
