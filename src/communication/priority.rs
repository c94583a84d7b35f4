//! Urgency classification from an event's optional expiry.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Events expiring within this many seconds are treated as urgent
pub const URGENCY_WINDOW_SECS: i64 = 5 * 60;

/// Urgency tier driving topic selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    /// Low-latency path
    Urgent,
    /// Deadline is comfortably in the future
    Deferrable,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Deferrable => "deferrable",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn urgency_window() -> Duration {
    Duration::seconds(URGENCY_WINDOW_SECS)
}

/// Classify an event by its expiry relative to `now`.
///
/// Missing expiry resolves to [`PriorityTier::Urgent`]. Only an expiry strictly
/// later than `now + URGENCY_WINDOW_SECS` is deferrable.
pub fn classify(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> PriorityTier {
    match expiry {
        Some(expiry) if expiry > now + urgency_window() => PriorityTier::Deferrable,
        _ => PriorityTier::Urgent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiry_is_urgent() {
        assert_eq!(classify(None, Utc::now()), PriorityTier::Urgent);
    }

    #[test]
    fn test_far_expiry_is_deferrable() {
        let now = Utc::now();
        let expiry = now + Duration::minutes(10);
        assert_eq!(classify(Some(expiry), now), PriorityTier::Deferrable);
    }

    #[test]
    fn test_boundary_is_urgent() {
        let now = Utc::now();
        assert_eq!(classify(Some(now + urgency_window()), now), PriorityTier::Urgent);
        assert_eq!(
            classify(Some(now + urgency_window() + Duration::milliseconds(1)), now),
            PriorityTier::Deferrable
        );
    }

    #[test]
    fn test_near_and_past_expiry_are_urgent() {
        let now = Utc::now();
        assert_eq!(classify(Some(now + Duration::minutes(2)), now), PriorityTier::Urgent);
        assert_eq!(classify(Some(now - Duration::hours(1)), now), PriorityTier::Urgent);
    }
}
