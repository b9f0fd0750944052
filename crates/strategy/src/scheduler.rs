use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use common::config::{parse_hhmm, parse_zone, ScheduleConfig};
use common::{Error, Result};

use crate::detectors::StrategyKind;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// One configured session, as the user wrote it.
#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub strategy: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A non-wrapping `[start, end)` slice of the day owned by one session.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start_min: u32,
    end_min: u32,
    session: usize,
}

/// Maps wall-time to the strategy that owns it. Sessions are half-open
/// intervals in the schedule zone; a session whose end is not after its
/// start wraps past midnight and is split in two. Gaps fall back to the
/// default strategy.
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    enabled: bool,
    zone: Tz,
    default_strategy: String,
    sessions: Vec<Session>,
    segments: Vec<Segment>,
}

impl SessionSchedule {
    /// Validates at construction: overlapping sessions and unknown
    /// strategy names are rejected; uncovered minutes only warn.
    pub fn from_config(config: &ScheduleConfig, default_strategy: &str) -> Result<Self> {
        if StrategyKind::from_name(default_strategy).is_none() {
            return Err(Error::Config(format!(
                "unknown default strategy '{default_strategy}'"
            )));
        }

        let zone = parse_zone(&config.timezone)?;
        let mut sessions = Vec::new();
        let mut segments = Vec::new();

        for session_cfg in &config.sessions {
            if StrategyKind::from_name(&session_cfg.strategy).is_none() {
                return Err(Error::Config(format!(
                    "session '{}' references unknown strategy '{}'",
                    session_cfg.name, session_cfg.strategy
                )));
            }
            let start = parse_hhmm(&session_cfg.start_time)?;
            let end = parse_hhmm(&session_cfg.end_time)?;
            let session_idx = sessions.len();
            sessions.push(Session {
                name: session_cfg.name.clone(),
                strategy: session_cfg.strategy.clone(),
                start,
                end,
            });

            let start_min = start.hour() * 60 + start.minute();
            let end_min = end.hour() * 60 + end.minute();
            if end_min > start_min {
                segments.push(Segment {
                    start_min,
                    end_min,
                    session: session_idx,
                });
            } else {
                // Wraps past midnight: split at 24:00.
                segments.push(Segment {
                    start_min,
                    end_min: MINUTES_PER_DAY,
                    session: session_idx,
                });
                if end_min > 0 {
                    segments.push(Segment {
                        start_min: 0,
                        end_min,
                        session: session_idx,
                    });
                }
            }
        }

        segments.sort_by_key(|s| s.start_min);
        for pair in segments.windows(2) {
            if pair[0].end_min > pair[1].start_min {
                return Err(Error::Config(format!(
                    "sessions '{}' and '{}' overlap",
                    sessions[pair[0].session].name, sessions[pair[1].session].name
                )));
            }
        }

        if config.enabled && !segments.is_empty() {
            let covered: u32 = segments.iter().map(|s| s.end_min - s.start_min).sum();
            if covered < MINUTES_PER_DAY {
                warn!(
                    uncovered_minutes = MINUTES_PER_DAY - covered,
                    "Schedule leaves part of the day on the default strategy"
                );
            }
        }

        Ok(Self {
            enabled: config.enabled && !config.sessions.is_empty(),
            zone,
            default_strategy: default_strategy.to_string(),
            sessions,
            segments,
        })
    }

    pub fn current_session(&self, now: DateTime<Utc>) -> Option<&Session> {
        if !self.enabled {
            return None;
        }
        let local = now.with_timezone(&self.zone).time();
        let minute = local.hour() * 60 + local.minute();
        self.segments
            .iter()
            .find(|s| s.start_min <= minute && minute < s.end_min)
            .map(|s| &self.sessions[s.session])
    }

    /// Exactly one strategy name for any instant; boundary instants belong
    /// to the session that starts there.
    pub fn current_strategy(&self, now: DateTime<Utc>) -> &str {
        self.current_session(now)
            .map(|s| s.strategy.as_str())
            .unwrap_or(&self.default_strategy)
    }

    /// The next boundary crossing after `now` and the strategy that takes
    /// over there.
    pub fn next_transition(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, String)> {
        if !self.enabled || self.segments.is_empty() {
            return None;
        }
        let local = now.with_timezone(&self.zone);
        let minute_now = local.time().hour() * 60 + local.time().minute();

        let mut boundaries: Vec<u32> = self
            .segments
            .iter()
            .flat_map(|s| [s.start_min, s.end_min])
            .filter(|&m| m < MINUTES_PER_DAY)
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();

        let (day_offset, boundary) = match boundaries.iter().find(|&&m| m > minute_now) {
            Some(&m) => (0, m),
            None => (1, boundaries[0]),
        };

        let date = local.date_naive() + Duration::days(day_offset);
        let time = NaiveTime::from_hms_opt(boundary / 60, boundary % 60, 0)?;
        let at = self
            .zone
            .from_local_datetime(&date.and_time(time))
            .earliest()?
            .with_timezone(&Utc);
        let strategy = self.current_strategy(at).to_string();
        Some((at, strategy))
    }
}

/// A crossing from one session (or the gap) into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub from: Option<String>,
    pub to: Option<String>,
    pub strategy: String,
}

/// Wraps a schedule and reports when the active session flips between
/// observations; the driver logs the change.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    schedule: SessionSchedule,
    last: Option<Option<String>>,
}

impl SessionTracker {
    pub fn new(schedule: SessionSchedule) -> Self {
        Self {
            schedule,
            last: None,
        }
    }

    pub fn schedule(&self) -> &SessionSchedule {
        &self.schedule
    }

    pub fn observe(&mut self, now: DateTime<Utc>) -> (String, Option<SessionChange>) {
        let session = self.schedule.current_session(now).map(|s| s.name.clone());
        let strategy = self.schedule.current_strategy(now).to_string();

        let change = match &self.last {
            Some(previous) if *previous != session => Some(SessionChange {
                from: previous.clone(),
                to: session.clone(),
                strategy: strategy.clone(),
            }),
            _ => None,
        };
        self.last = Some(session);
        (strategy, change)
    }
}
