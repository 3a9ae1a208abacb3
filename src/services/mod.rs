pub mod analytics;
pub mod notifications;

pub use analytics::AnalyticsService;
pub use notifications::ReadStateTracker;
