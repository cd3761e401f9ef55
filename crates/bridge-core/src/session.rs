//! Market session classification and the session-aware order policy.
//!
//! The oracle maps a wall-clock instant, converted to the exchange
//! timezone, onto one of the four session kinds and decides tradability
//! and the preferred order type for each.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::order::OrderType;

/// Market session kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Pre-market: `[pre_start, regular_open)`.
    Pre,
    /// Regular trading hours: `[regular_open, regular_close)`.
    Regular,
    /// Post-market: `[regular_close, post_end)`.
    Post,
    /// Everything else, including weekends.
    Closed,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre_market"),
            Self::Regular => write!(f, "regular"),
            Self::Post => write!(f, "post_market"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Session boundaries in the exchange timezone.
///
/// All intervals are half-open; a boundary instant belongs to the later
/// session.
#[derive(Debug, Clone)]
pub struct MarketHours {
    pre_start: NaiveTime,
    regular_open: NaiveTime,
    regular_close: NaiveTime,
    post_end: NaiveTime,
    timezone: Tz,
}

impl MarketHours {
    pub fn new(
        pre_start: NaiveTime,
        regular_open: NaiveTime,
        regular_close: NaiveTime,
        post_end: NaiveTime,
        timezone: Tz,
    ) -> Result<Self, CoreError> {
        if !(pre_start < regular_open && regular_open < regular_close && regular_close < post_end) {
            return Err(CoreError::BoundaryOrder(format!(
                "{pre_start} < {regular_open} < {regular_close} < {post_end} does not hold"
            )));
        }
        Ok(Self {
            pre_start,
            regular_open,
            regular_close,
            post_end,
            timezone,
        })
    }

    /// Parse boundaries from `HH:MM` strings and a timezone name.
    pub fn parse(
        pre_start: &str,
        regular_open: &str,
        regular_close: &str,
        post_end: &str,
        timezone: &str,
    ) -> Result<Self, CoreError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| CoreError::UnknownTimezone(timezone.to_string()))?;
        Self::new(
            parse_hhmm(pre_start)?,
            parse_hhmm(regular_open)?,
            parse_hhmm(regular_close)?,
            parse_hhmm(post_end)?,
            tz,
        )
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// True when the instant falls on Saturday or Sunday in the exchange
    /// timezone.
    pub fn is_weekend(&self, instant: DateTime<Utc>) -> bool {
        matches!(
            instant.with_timezone(&self.timezone).weekday(),
            Weekday::Sat | Weekday::Sun
        )
    }

    /// Classify an instant into a session kind.
    pub fn session_at(&self, instant: DateTime<Utc>) -> SessionKind {
        let local = instant.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return SessionKind::Closed;
        }

        let t = local.time();
        if self.pre_start <= t && t < self.regular_open {
            SessionKind::Pre
        } else if self.regular_open <= t && t < self.regular_close {
            SessionKind::Regular
        } else if self.regular_close <= t && t < self.post_end {
            SessionKind::Post
        } else {
            SessionKind::Closed
        }
    }

    /// Next boundary crossing after `instant`, skipping weekend days.
    ///
    /// Returns the boundary instant and the session that begins there.
    /// `None` only if no boundary exists within the date range chrono can
    /// represent, which does not occur for realistic inputs.
    pub fn next_transition(
        &self,
        instant: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, SessionKind)> {
        let local = instant.with_timezone(&self.timezone);
        let boundaries = [
            (self.pre_start, SessionKind::Pre),
            (self.regular_open, SessionKind::Regular),
            (self.regular_close, SessionKind::Post),
            (self.post_end, SessionKind::Closed),
        ];

        let mut date = local.date_naive();
        // Eight days is enough to clear any weekend plus a DST gap.
        for _ in 0..8 {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                for (time, kind) in boundaries {
                    let candidate = self
                        .timezone
                        .from_local_datetime(&date.and_time(time))
                        .earliest()?
                        .with_timezone(&Utc);
                    if candidate > instant {
                        return Some((candidate, kind));
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| CoreError::InvalidTime(s.to_string()))
}

/// Trading decision for a given instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub session: SessionKind,
    pub tradable: bool,
    /// Preferred order type; `None` when not tradable because the market
    /// is closed.
    pub order_type: Option<OrderType>,
    pub reason: String,
}

/// Session policy: market hours plus the extended-hours gates.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    hours: MarketHours,
    allow_pre: bool,
    allow_post: bool,
}

impl SessionPolicy {
    pub fn new(hours: MarketHours, allow_pre: bool, allow_post: bool) -> Self {
        Self {
            hours,
            allow_pre,
            allow_post,
        }
    }

    pub fn hours(&self) -> &MarketHours {
        &self.hours
    }

    pub fn session_at(&self, instant: DateTime<Utc>) -> SessionKind {
        self.hours.session_at(instant)
    }

    /// Decide tradability and order type for an instant.
    ///
    /// Regular hours use market orders; extended hours use limit orders
    /// when the corresponding gate is enabled; closed is never tradable.
    pub fn decide(&self, instant: DateTime<Utc>) -> TradeDecision {
        let session = self.hours.session_at(instant);
        match session {
            SessionKind::Regular => TradeDecision {
                session,
                tradable: true,
                order_type: Some(OrderType::Market),
                reason: "regular hours: market orders".to_string(),
            },
            SessionKind::Pre => TradeDecision {
                session,
                tradable: self.allow_pre,
                order_type: Some(OrderType::Limit),
                reason: if self.allow_pre {
                    "pre-market: limit orders".to_string()
                } else {
                    "pre-market trading disabled".to_string()
                },
            },
            SessionKind::Post => TradeDecision {
                session,
                tradable: self.allow_post,
                order_type: Some(OrderType::Limit),
                reason: if self.allow_post {
                    "post-market: limit orders".to_string()
                } else {
                    "post-market trading disabled".to_string()
                },
            },
            SessionKind::Closed => TradeDecision {
                session,
                tradable: false,
                order_type: None,
                reason: if self.hours.is_weekend(instant) {
                    "weekend".to_string()
                } else {
                    "outside trading hours".to_string()
                },
            },
        }
    }

    pub fn next_transition(
        &self,
        instant: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, SessionKind)> {
        self.hours.next_transition(instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Eastern;

    fn us_hours() -> MarketHours {
        MarketHours::parse("04:00", "09:30", "16:00", "20:00", "US/Eastern").unwrap()
    }

    /// 2024-01-09 is a Tuesday.
    fn eastern(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(2024, 1, day, hour, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_session_classification() {
        let hours = us_hours();
        assert_eq!(hours.session_at(eastern(9, 3, 59)), SessionKind::Closed);
        assert_eq!(hours.session_at(eastern(9, 5, 0)), SessionKind::Pre);
        assert_eq!(hours.session_at(eastern(9, 10, 0)), SessionKind::Regular);
        assert_eq!(hours.session_at(eastern(9, 17, 30)), SessionKind::Post);
        assert_eq!(hours.session_at(eastern(9, 21, 0)), SessionKind::Closed);
    }

    #[test]
    fn test_boundaries_belong_to_later_session() {
        let hours = us_hours();
        assert_eq!(hours.session_at(eastern(9, 4, 0)), SessionKind::Pre);
        assert_eq!(hours.session_at(eastern(9, 9, 30)), SessionKind::Regular);
        assert_eq!(hours.session_at(eastern(9, 16, 0)), SessionKind::Post);
        assert_eq!(hours.session_at(eastern(9, 20, 0)), SessionKind::Closed);
    }

    #[test]
    fn test_weekend_is_closed() {
        let hours = us_hours();
        // 2024-01-13/14 are Saturday/Sunday.
        assert_eq!(hours.session_at(eastern(13, 10, 0)), SessionKind::Closed);
        assert_eq!(hours.session_at(eastern(14, 10, 0)), SessionKind::Closed);
        assert!(hours.is_weekend(eastern(13, 10, 0)));
    }

    #[test]
    fn test_decide_policy_matrix() {
        let policy = SessionPolicy::new(us_hours(), true, false);

        let regular = policy.decide(eastern(9, 10, 0));
        assert!(regular.tradable);
        assert_eq!(regular.order_type, Some(OrderType::Market));

        let pre = policy.decide(eastern(9, 5, 0));
        assert!(pre.tradable);
        assert_eq!(pre.order_type, Some(OrderType::Limit));

        let post = policy.decide(eastern(9, 17, 0));
        assert!(!post.tradable);
        assert_eq!(post.order_type, Some(OrderType::Limit));
        assert_eq!(post.reason, "post-market trading disabled");

        let closed = policy.decide(eastern(9, 22, 0));
        assert!(!closed.tradable);
        assert_eq!(closed.order_type, None);
    }

    #[test]
    fn test_weekend_reason() {
        let policy = SessionPolicy::new(us_hours(), true, true);
        let decision = policy.decide(eastern(13, 10, 0));
        assert!(!decision.tradable);
        assert_eq!(decision.reason, "weekend");
    }

    #[test]
    fn test_next_transition_same_day() {
        let hours = us_hours();
        let (at, kind) = hours.next_transition(eastern(9, 10, 0)).unwrap();
        assert_eq!(kind, SessionKind::Post);
        assert_eq!(at, eastern(9, 16, 0));
    }

    #[test]
    fn test_next_transition_skips_weekend() {
        let hours = us_hours();
        // Friday 2024-01-12 after post close: next boundary is Monday
        // 2024-01-15 pre-market start.
        let (at, kind) = hours.next_transition(eastern(12, 21, 0)).unwrap();
        assert_eq!(kind, SessionKind::Pre);
        assert_eq!(at, eastern(15, 4, 0));
    }

    #[test]
    fn test_next_transition_at_boundary_moves_forward() {
        let hours = us_hours();
        let (at, kind) = hours.next_transition(eastern(9, 9, 30)).unwrap();
        assert_eq!(kind, SessionKind::Post);
        assert_eq!(at, eastern(9, 16, 0));
    }

    #[test]
    fn test_rejects_unordered_boundaries() {
        assert!(MarketHours::parse("09:30", "04:00", "16:00", "20:00", "US/Eastern").is_err());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(MarketHours::parse("4am", "09:30", "16:00", "20:00", "US/Eastern").is_err());
        assert!(MarketHours::parse("04:00", "09:30", "16:00", "20:00", "Mars/Olympus").is_err());
    }
}
