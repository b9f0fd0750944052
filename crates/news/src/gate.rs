use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::America::New_York;
use tracing::{debug, warn};

use common::{currencies_for_symbol, NewsEvent, Result};

use crate::calendar::CalendarSource;

/// Answer to "may I trade now?".
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reason: String,
    pub next_event: Option<NewsEvent>,
}

/// Gap after an event inside which a following event counts as consecutive.
const CONSECUTIVE_WINDOW_MIN: i64 = 30;

/// Holds the upcoming high-impact events for one symbol's currencies and
/// answers time-window queries. A gate built from a failed source refresh
/// reports "unknown" and blocks trading; it never blocks position
/// monitoring, which does not consult it.
#[derive(Debug, Clone)]
pub struct NewsGate {
    /// Future high-impact (3-star, non-holiday) events, ascending by time.
    events: Vec<NewsEvent>,
    /// Holiday rows for trading-day checks, any impact.
    holidays: Vec<NewsEvent>,
    available: bool,
}

impl NewsGate {
    /// Build from calendar rows, keeping future 3-star events sorted.
    pub fn from_events(mut events: Vec<NewsEvent>, now: DateTime<Utc>) -> Self {
        events.sort_by_key(|e| e.time);
        let holidays = events.iter().filter(|e| e.is_holiday).cloned().collect();
        let events = events
            .into_iter()
            .filter(|e| !e.is_holiday && e.impact >= 3 && e.time > now)
            .collect();
        Self {
            events,
            holidays,
            available: true,
        }
    }

    /// Gate standing in for an unreachable calendar: trading is blocked,
    /// monitoring is unaffected.
    pub fn unavailable() -> Self {
        Self {
            events: Vec::new(),
            holidays: Vec::new(),
            available: false,
        }
    }

    /// Refresh from a source for the currencies of one symbol. Source
    /// failure degrades to the unavailable gate rather than erroring out.
    pub async fn load(
        source: &dyn CalendarSource,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let currencies = match currencies_for_symbol(symbol) {
            Some((base, quote)) => vec![base, quote],
            None => {
                debug!(symbol, "not a six-letter FX symbol, news gate wide open");
                return Ok(Self::from_events(Vec::new(), now));
            }
        };
        match source.month_events(&currencies).await {
            Ok(events) => Ok(Self::from_events(events, now)),
            Err(e) => {
                warn!(symbol, error = %e, "Calendar unavailable, blocking analysis");
                Ok(Self::unavailable())
            }
        }
    }

    /// Blocked inside `[event - before, event + after]` around any event
    /// (an event at exactly `now` blocks), and — when `consecutive` — also
    /// while the next event sits within `after + 30 min` of now.
    pub fn may_trade(
        &self,
        now: DateTime<Utc>,
        before: Duration,
        after: Duration,
        consecutive: bool,
    ) -> GateVerdict {
        if !self.available {
            return GateVerdict {
                allowed: false,
                reason: "news source unavailable".into(),
                next_event: None,
            };
        }

        for event in &self.events {
            if now >= event.time - before && now <= event.time + after {
                let minutes = (event.time - now).num_minutes();
                return GateVerdict {
                    allowed: false,
                    reason: format!("news window: {} in {} min", event.title, minutes),
                    next_event: Some(event.clone()),
                };
            }
        }

        let next = self.events.iter().find(|e| e.time > now).cloned();
        if consecutive {
            if let Some(event) = &next {
                if event.time - now <= after + Duration::minutes(CONSECUTIVE_WINDOW_MIN) {
                    return GateVerdict {
                        allowed: false,
                        reason: format!("consecutive: {} too close", event.title),
                        next_event: Some(event.clone()),
                    };
                }
            }
        }

        let reason = match &next {
            Some(event) => format!(
                "next event in {} min ({})",
                (event.time - now).num_minutes(),
                event.title
            ),
            None => "no upcoming high-impact events".into(),
        };
        GateVerdict {
            allowed: true,
            reason,
            next_event: next,
        }
    }

    /// Non-weekend and no holiday on the New-York date.
    pub fn trading_day(&self, now: DateTime<Utc>) -> (bool, String, Vec<NewsEvent>) {
        let local = now.with_timezone(&New_York);
        match local.weekday() {
            Weekday::Sat | Weekday::Sun => {
                return (false, format!("weekend ({})", local.weekday()), Vec::new());
            }
            _ => {}
        }

        let today: Vec<NewsEvent> = self
            .holidays
            .iter()
            .filter(|h| h.time.with_timezone(&New_York).date_naive() == local.date_naive())
            .cloned()
            .collect();
        if !today.is_empty() {
            let names: Vec<&str> = today.iter().map(|h| h.title.as_str()).collect();
            return (false, format!("holiday: {}", names.join(", ")), today);
        }

        (true, format!("trading day ({})", local.weekday()), Vec::new())
    }
}
