pub mod availability;
pub mod booking;

pub use availability::AvailabilityEngine;
pub use booking::BookingService;
