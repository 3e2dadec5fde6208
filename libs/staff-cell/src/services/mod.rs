pub mod eligibility;

pub use eligibility::EligibilityService;
