use std::time::Instant;

pub trait TimeSource: Send + Sync {
    // Monotonic "now" used for batch deadlines
    fn now(&self) -> Instant;
}

#[derive(Clone, Default)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
