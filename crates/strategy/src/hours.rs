use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use common::config::{parse_hhmm, parse_zone, TradingHoursConfig};
use common::Result;

/// The daily analysis window. Outside it the loop only monitors positions.
#[derive(Debug, Clone)]
pub struct TradingHours {
    enabled: bool,
    start: NaiveTime,
    end: NaiveTime,
    zone: Tz,
}

impl TradingHours {
    pub fn from_config(config: &TradingHoursConfig) -> Result<Self> {
        Ok(Self {
            enabled: config.enabled,
            start: parse_hhmm(&config.start_time)?,
            end: parse_hhmm(&config.end_time)?,
            zone: parse_zone(&config.timezone)?,
        })
    }

    /// Whether `now` falls inside the window. An end before the start
    /// wraps past midnight. Disabled hours always trade.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = now.with_timezone(&self.zone).time();
        if self.start <= self.end {
            self.start <= local && local <= self.end
        } else {
            local >= self.start || local <= self.end
        }
    }
}
