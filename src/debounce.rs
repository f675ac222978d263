// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clusters::AttributeValue;
use crate::constants::DEFAULT_MOTION_DEBOUNCE;
use crate::devices::AttributeRecord;

/// Whether a decoded attribute should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Publish,
    /// Neither published nor stored.
    Suppress,
}

/// Cooldown for presence-style attributes.
///
/// A change to `false` within `window` of the attribute's last accepted
/// update is suppressed. `true` is never suppressed.
#[derive(Debug, Clone)]
pub struct DebouncePolicy {
    window: Duration,
    attributes: HashSet<&'static str>,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_DEBOUNCE)
    }
}

impl DebouncePolicy {
    /// Policy covering `motionState` with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            attributes: HashSet::from(["motionState"]),
        }
    }

    /// Also debounce `name`.
    pub fn with_attribute(mut self, name: &'static str) -> Self {
        self.attributes.insert(name);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn decide(
        &self,
        name: &str,
        value: &AttributeValue,
        previous: Option<&AttributeRecord>,
        now: DateTime<Utc>,
    ) -> Decision {
        if !self.attributes.contains(name) || value.as_bool() != Some(false) {
            return Decision::Publish;
        }
        let Some(previous) = previous else {
            return Decision::Publish;
        };
        // A clock step backwards counts as inside the window
        let within = now
            .signed_duration_since(previous.last_seen_at)
            .to_std()
            .map(|elapsed| elapsed < self.window)
            .unwrap_or(true);
        if within {
            Decision::Suppress
        } else {
            Decision::Publish
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(value: bool, secs: i64) -> AttributeRecord {
        AttributeRecord {
            value: value.into(),
            last_seen_at: at(secs),
        }
    }

    #[test]
    fn test_false_within_window_suppressed() {
        let policy = DebouncePolicy::default();
        let previous = record(true, 0);
        let decision = policy.decide("motionState", &false.into(), Some(&previous), at(179));
        assert_eq!(decision, Decision::Suppress);
    }

    #[test]
    fn test_false_at_window_publishes() {
        let policy = DebouncePolicy::default();
        let previous = record(true, 0);
        assert_eq!(
            policy.decide("motionState", &false.into(), Some(&previous), at(180)),
            Decision::Publish
        );
        assert_eq!(
            policy.decide("motionState", &false.into(), Some(&previous), at(600)),
            Decision::Publish
        );
    }

    #[test]
    fn test_true_never_suppressed() {
        let policy = DebouncePolicy::default();
        let previous = record(true, 0);
        assert_eq!(
            policy.decide("motionState", &true.into(), Some(&previous), at(1)),
            Decision::Publish
        );
    }

    #[test]
    fn test_first_value_and_other_attributes_publish() {
        let policy = DebouncePolicy::default();
        assert_eq!(
            policy.decide("motionState", &false.into(), None, at(0)),
            Decision::Publish
        );
        let previous = record(true, 0);
        assert_eq!(
            policy.decide("contactState", &false.into(), Some(&previous), at(1)),
            Decision::Publish
        );
        let policy = policy.with_attribute("contactState");
        assert_eq!(
            policy.decide("contactState", &false.into(), Some(&previous), at(1)),
            Decision::Suppress
        );
    }
}
