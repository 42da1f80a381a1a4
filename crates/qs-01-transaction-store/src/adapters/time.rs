use chrono::{DateTime, Utc};

use crate::ports::outbound::TimeSource;

/// Default time source using the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
