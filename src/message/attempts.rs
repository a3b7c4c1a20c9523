//! The `attempts` sentinel.
//!
//! `spec.md` models delivery attempts as an unsigned counter with an `∞`
//! sentinel meaning "do not requeue" — set by `AckManager::nack` when the
//! caller passes `requeue=false`, and read back by `AttemptsProcessor` to
//! force the message to the DLQ on the next pipeline pass. We keep the
//! finite count and the sentinel as distinct enum states instead of
//! overloading `u32::MAX`, per the design note calling for "a dedicated
//! flag" in a typed language.

use std::fmt;

/// Delivery attempt counter with a typed "do not requeue" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryAttempts {
    /// A finite number of attempts so far. Starts at `Count(1)` when a
    /// message is first published.
    Count(u32),
    /// The sentinel set by a non-requeue nack. Always compares as exceeding
    /// any finite `maxDeliveryAttempts`.
    NoRequeue,
}

impl DeliveryAttempts {
    /// The initial value for a freshly published message.
    pub const INITIAL: Self = Self::Count(1);

    /// One more delivery attempt. A sentinel stays a sentinel.
    pub fn incremented(self) -> Self {
        match self {
            Self::Count(n) => Self::Count(n.saturating_add(1)),
            Self::NoRequeue => Self::NoRequeue,
        }
    }

    /// Whether this value should force a DLQ on the next `AttemptsProcessor`
    /// pass given `max`.
    pub fn exceeds(self, max: u32) -> bool {
        match self {
            Self::Count(n) => n > max,
            Self::NoRequeue => true,
        }
    }

    pub fn as_count(self) -> Option<u32> {
        match self {
            Self::Count(n) => Some(n),
            Self::NoRequeue => None,
        }
    }
}

impl Default for DeliveryAttempts {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for DeliveryAttempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::NoRequeue => write!(f, "∞"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_one() {
        assert_eq!(DeliveryAttempts::INITIAL, DeliveryAttempts::Count(1));
    }

    #[test]
    fn increment_advances_count() {
        let a = DeliveryAttempts::Count(1).incremented();
        assert_eq!(a, DeliveryAttempts::Count(2));
    }

    #[test]
    fn sentinel_stays_sentinel_when_incremented() {
        assert_eq!(DeliveryAttempts::NoRequeue.incremented(), DeliveryAttempts::NoRequeue);
    }

    #[test]
    fn sentinel_always_exceeds_any_max() {
        assert!(DeliveryAttempts::NoRequeue.exceeds(u32::MAX));
    }

    #[test]
    fn finite_count_exceeds_only_above_max() {
        assert!(!DeliveryAttempts::Count(2).exceeds(2));
        assert!(DeliveryAttempts::Count(3).exceeds(2));
    }

    #[test]
    fn display_uses_infinity_symbol_for_sentinel() {
        assert_eq!(DeliveryAttempts::NoRequeue.to_string(), "∞");
        assert_eq!(DeliveryAttempts::Count(5).to_string(), "5");
    }
}
