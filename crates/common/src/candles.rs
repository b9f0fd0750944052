use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::types::{Bar, Timeframe};
use crate::{BrokerGateway, Error, Result};

/// Where in time a candle is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleAnchor {
    /// The forming bar.
    Now,
    /// A wall-clock time in the reader's reference zone (New York).
    Clock(NaiveTime),
}

impl std::str::FromStr for CandleAnchor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "now" | "current" => return Ok(CandleAnchor::Now),
            _ => {}
        }
        if let Some(hour_str) = s.strip_suffix("am") {
            let hour: u32 = hour_str
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid clock anchor '{s}'")))?;
            let hour = if hour == 12 { 0 } else { hour };
            return NaiveTime::from_hms_opt(hour, 0, 0)
                .ok_or_else(|| Error::Config(format!("invalid clock anchor '{s}'")))
                .map(CandleAnchor::Clock);
        }
        if let Some(hour_str) = s.strip_suffix("pm") {
            let hour: u32 = hour_str
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid clock anchor '{s}'")))?;
            let hour = if hour == 12 { 12 } else { hour + 12 };
            return NaiveTime::from_hms_opt(hour, 0, 0)
                .ok_or_else(|| Error::Config(format!("invalid clock anchor '{s}'")))
                .map(CandleAnchor::Clock);
        }
        NaiveTime::parse_from_str(&s, "%H:%M")
            .map(CandleAnchor::Clock)
            .map_err(|_| Error::Config(format!("invalid clock anchor '{s}'")))
    }
}

/// Reads candles by timeframe and named anchor, translating New-York
/// wall-clock targets into the broker's zone.
///
/// The broker-zone offset is discovered once by comparing a recently closed
/// H1 bar's broker open-time against the last full UTC hour, unless the
/// configuration pins it explicitly.
pub struct CandleReader {
    gateway: Arc<dyn BrokerGateway>,
    zone: Tz,
    offset_override: Option<Duration>,
    detected_offset: Mutex<Option<Duration>>,
}

impl CandleReader {
    pub fn new(gateway: Arc<dyn BrokerGateway>, zone: Tz, offset_override: Option<i32>) -> Self {
        Self {
            gateway,
            zone,
            offset_override: offset_override.map(|m| Duration::minutes(m as i64)),
            detected_offset: Mutex::new(None),
        }
    }

    /// Broker-zone offset from UTC, rounded to the nearest half hour.
    pub async fn broker_offset(&self, symbol: &str, now: DateTime<Utc>) -> Result<Duration> {
        if let Some(offset) = self.offset_override {
            return Ok(offset);
        }
        if let Some(offset) = *self.detected_offset.lock().expect("offset lock") {
            return Ok(offset);
        }

        let bars = self.gateway.rates(symbol, Timeframe::H1, 2).await?;
        if bars.len() < 2 {
            return Err(Error::InsufficientHistory(format!(
                "{symbol}: need 2 H1 bars to detect the broker offset"
            )));
        }
        // The second-to-last bar closed on the most recent full UTC hour.
        let closed = &bars[bars.len() - 2];
        let broker_close = closed.open_time + Duration::hours(1);
        let utc_close = now
            .naive_utc()
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .expect("hour truncation");
        let raw_minutes = (broker_close - utc_close).num_minutes();
        let offset = Duration::minutes((raw_minutes as f64 / 30.0).round() as i64 * 30);

        *self.detected_offset.lock().expect("offset lock") = Some(offset);
        Ok(offset)
    }

    /// The bar whose `[open_time, open_time + timeframe)` interval contains
    /// the anchored instant, or the forming bar for `Now`.
    pub async fn get_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        anchor: CandleAnchor,
        now: DateTime<Utc>,
    ) -> Result<Bar> {
        match anchor {
            CandleAnchor::Now => {
                let bars = self.gateway.rates(symbol, timeframe, 1).await?;
                bars.into_iter().next_back().ok_or_else(|| {
                    Error::InsufficientHistory(format!("{symbol}: no {timeframe} bars"))
                })
            }
            CandleAnchor::Clock(time) => {
                let target_utc = self.zone_instant_today(time, now)?;
                let offset = self.broker_offset(symbol, now).await?;
                let target_broker = target_utc.naive_utc() + offset;

                let count = history_count(timeframe);
                let bars = self.gateway.rates(symbol, timeframe, count).await?;
                bars.into_iter()
                    .rev()
                    .find(|bar| bar.covers(target_broker))
                    .ok_or_else(|| {
                        Error::InsufficientHistory(format!(
                            "{symbol}: no {timeframe} bar covering {target_broker}"
                        ))
                    })
            }
        }
    }

    /// Today's wall-clock instant in the reference zone, as UTC. During a
    /// DST fold the earlier instant wins.
    fn zone_instant_today(&self, time: NaiveTime, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let local_date = now.with_timezone(&self.zone).date_naive();
        let naive = local_date.and_time(time);
        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| Error::Validation(format!("nonexistent local time {naive}")))
    }
}

/// Enough history to span three days of bars on any intraday timeframe.
fn history_count(timeframe: Timeframe) -> usize {
    let minutes = timeframe.duration().num_minutes().max(1) as usize;
    ((3 * 24 * 60) / minutes + 2).clamp(8, 500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_parses_twelve_hour_tags() {
        assert_eq!(
            "1am".parse::<CandleAnchor>().unwrap(),
            CandleAnchor::Clock(NaiveTime::from_hms_opt(1, 0, 0).unwrap())
        );
        assert_eq!(
            "12am".parse::<CandleAnchor>().unwrap(),
            CandleAnchor::Clock(NaiveTime::from_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            "12pm".parse::<CandleAnchor>().unwrap(),
            CandleAnchor::Clock(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );
        assert_eq!(
            "5pm".parse::<CandleAnchor>().unwrap(),
            CandleAnchor::Clock(NaiveTime::from_hms_opt(17, 0, 0).unwrap())
        );
    }

    #[test]
    fn anchor_parses_now_and_hhmm() {
        assert_eq!("now".parse::<CandleAnchor>().unwrap(), CandleAnchor::Now);
        assert_eq!(
            "13:30".parse::<CandleAnchor>().unwrap(),
            CandleAnchor::Clock(NaiveTime::from_hms_opt(13, 30, 0).unwrap())
        );
        assert!("sometime".parse::<CandleAnchor>().is_err());
    }

    #[test]
    fn history_count_scales_with_timeframe() {
        assert_eq!(history_count(Timeframe::H4), 20);
        assert_eq!(history_count(Timeframe::M5), 500);
        assert_eq!(history_count(Timeframe::D1), 8);
    }
}
