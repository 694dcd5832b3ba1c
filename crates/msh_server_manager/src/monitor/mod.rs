mod crash_detection;
mod events;

pub use crash_detection::CrashDetector;
pub use events::ServerEvent;
