//! Per-user, per-command rate limiting.
//!
//! [`check_cooldown`] is the pure rule; [`CooldownTracker`] remembers when
//! each user last ran each command and charges the window on success.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// The daily window used by `bless`.
pub fn daily() -> Duration {
    Duration::hours(24)
}

/// Whether a command may run now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    Allowed,
    /// Still cooling down; carries the remaining wait.
    Wait(Duration),
}

/// Decide whether a use at `now` is allowed given the previous use.
///
/// A use exactly `window` after the last one is allowed.
pub fn check_cooldown(
    last_use: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> CooldownStatus {
    let Some(last) = last_use else {
        return CooldownStatus::Allowed;
    };
    let ready_at = last + window;
    if now >= ready_at {
        CooldownStatus::Allowed
    } else {
        CooldownStatus::Wait(ready_at - now)
    }
}

/// Render a wait as `"{h}h {m}m {s}s"`, truncating sub-second remainders.
pub fn format_wait(wait: Duration) -> String {
    let secs = wait.num_seconds().max(0);
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Last-use timestamps keyed by `(command, user)`.
#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    last_use: HashMap<(String, String), DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check without recording anything.
    pub fn status(
        &self,
        command: &str,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> CooldownStatus {
        let last = self
            .last_use
            .get(&(command.to_string(), user_id.to_string()))
            .copied();
        check_cooldown(last, now, window)
    }

    /// Charge the cooldown if the command is allowed at `now`.
    ///
    /// Returns the remaining wait when it is not.
    pub fn try_acquire(
        &mut self,
        command: &str,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), Duration> {
        match self.status(command, user_id, now, window) {
            CooldownStatus::Allowed => {
                self.last_use
                    .insert((command.to_string(), user_id.to_string()), now);
                Ok(())
            }
            CooldownStatus::Wait(wait) => Err(wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_use_is_allowed() {
        assert_eq!(check_cooldown(None, t0(), daily()), CooldownStatus::Allowed);
    }

    #[test]
    fn use_inside_window_reports_remaining() {
        let now = t0() + Duration::hours(1) + Duration::minutes(30);
        assert_eq!(
            check_cooldown(Some(t0()), now, daily()),
            CooldownStatus::Wait(Duration::hours(22) + Duration::minutes(30))
        );
    }

    #[test]
    fn window_boundary_is_allowed() {
        assert_eq!(
            check_cooldown(Some(t0()), t0() + daily(), daily()),
            CooldownStatus::Allowed
        );
    }

    #[test]
    fn format_wait_splits_units() {
        let wait = Duration::hours(5) + Duration::minutes(7) + Duration::seconds(9);
        assert_eq!(format_wait(wait), "5h 7m 9s");
        assert_eq!(format_wait(Duration::milliseconds(999)), "0h 0m 0s");
        assert_eq!(format_wait(Duration::hours(23) + Duration::seconds(59)), "23h 0m 59s");
    }

    #[test]
    fn tracker_charges_on_success_only() {
        let mut tracker = CooldownTracker::new();
        assert!(tracker.try_acquire("bless", "u", t0(), daily()).is_ok());

        let later = t0() + Duration::hours(2);
        let wait = tracker.try_acquire("bless", "u", later, daily()).unwrap_err();
        assert_eq!(wait, Duration::hours(22));

        // A rejected attempt does not push the window back.
        let next_day = t0() + daily();
        assert!(tracker.try_acquire("bless", "u", next_day, daily()).is_ok());
    }

    #[test]
    fn tracker_is_per_user_and_per_command() {
        let mut tracker = CooldownTracker::new();
        tracker.try_acquire("bless", "a", t0(), daily()).unwrap();
        assert!(tracker.try_acquire("bless", "b", t0(), daily()).is_ok());
        assert!(tracker.try_acquire("other", "a", t0(), daily()).is_ok());
    }
}
