pub mod credits;
pub mod engagement;

pub use credits::RedirectCredits;
pub use engagement::EngagementLedger;
