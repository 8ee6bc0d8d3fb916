//! Per-request routing analytics.

use std::time::Duration;

use serde::Serialize;

use crate::selector::Target;

/// Status recorded for a target that was never attempted, or whose attempt
/// produced no response.
pub const NOT_ATTEMPTED: i32 = -1;

/// What happened to one proxied request across all of its attempts.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAnalytics {
    pub object_key: String,
    pub request_body_size: u64,
    pub method: String,
    pub initial_target: Option<Target>,
    pub initial_target_reason: String,
    pub bolt_endpoint: String,
    #[serde(with = "duration_ms")]
    pub bolt_duration: Duration,
    pub bolt_status: i32,
    #[serde(with = "duration_ms")]
    pub origin_duration: Duration,
    pub origin_status: i32,
}

impl RequestAnalytics {
    pub fn new(object_key: &str, request_body_size: u64, method: &str) -> Self {
        Self {
            object_key: object_key.to_string(),
            request_body_size,
            method: method.to_string(),
            initial_target: None,
            initial_target_reason: String::new(),
            bolt_endpoint: String::new(),
            bolt_duration: Duration::ZERO,
            bolt_status: NOT_ATTEMPTED,
            origin_duration: Duration::ZERO,
            origin_status: NOT_ATTEMPTED,
        }
    }

    /// Record the outcome of an attempt against `target`. `status` is `None`
    /// when no response was received.
    pub fn record(&mut self, target: Target, elapsed: Duration, status: Option<u16>) {
        let status = status.map_or(NOT_ATTEMPTED, i32::from);
        match target {
            Target::Bolt => {
                self.bolt_duration += elapsed;
                self.bolt_status = status;
            }
            Target::Origin => {
                self.origin_duration += elapsed;
                self.origin_status = status;
            }
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_marks_both_targets_not_attempted() {
        let a = RequestAnalytics::new("k", 3, "GET");
        assert_eq!(a.bolt_status, NOT_ATTEMPTED);
        assert_eq!(a.origin_status, NOT_ATTEMPTED);
        assert!(a.initial_target.is_none());
    }

    #[test]
    fn test_record_per_target() {
        let mut a = RequestAnalytics::new("k", 0, "GET");
        a.record(Target::Bolt, Duration::from_millis(5), None);
        a.record(Target::Origin, Duration::from_millis(7), Some(200));
        assert_eq!(a.bolt_status, NOT_ATTEMPTED);
        assert_eq!(a.origin_status, 200);
        assert_eq!(a.bolt_duration, Duration::from_millis(5));
    }

    #[test]
    fn test_redirect_reissue_accumulates_duration() {
        let mut a = RequestAnalytics::new("k", 0, "GET");
        a.record(Target::Origin, Duration::from_millis(10), Some(301));
        a.record(Target::Origin, Duration::from_millis(20), Some(200));
        assert_eq!(a.origin_status, 200);
        assert_eq!(a.origin_duration, Duration::from_millis(30));
    }

    #[test]
    fn test_serializes_as_json() {
        let mut a = RequestAnalytics::new("dir/k", 12, "PUT");
        a.initial_target = Some(Target::Origin);
        a.initial_target_reason = "cluster unhealthy".to_string();
        a.record(Target::Origin, Duration::from_millis(2), Some(200));

        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["initial_target"], "origin");
        assert_eq!(v["bolt_status"], -1);
        assert_eq!(v["origin_status"], 200);
        assert_eq!(v["origin_duration"], 2.0);
        assert_eq!(v["request_body_size"], 12);
    }
}
