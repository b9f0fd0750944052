//! Secondary confirmation shapes read next to a CRT signal: the "vayas"
//! trend-exhaustion candle and the engulfing reversal candle. Both are
//! advisory; they annotate the analysis rather than gate it.

use common::{Bar, Direction};

/// A candle that failed to extend the previous candle's push: after a
/// bullish bar, a bar that neither breaks the prior high nor closes above
/// it (and the mirror case after a bearish bar).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vayas {
    /// Which trend looks exhausted.
    pub exhausted: Direction,
}

pub fn vayas(previous: &Bar, current: &Bar) -> Option<Vayas> {
    if previous.close > previous.open
        && current.high <= previous.high
        && current.close < previous.high
    {
        return Some(Vayas {
            exhausted: Direction::Bullish,
        });
    }
    if previous.close < previous.open
        && current.low >= previous.low
        && current.close > previous.low
    {
        return Some(Vayas {
            exhausted: Direction::Bearish,
        });
    }
    None
}

/// A full-range engulfing reversal candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Engulfing {
    pub direction: Direction,
}

pub fn engulfing(previous: &Bar, current: &Bar) -> Option<Engulfing> {
    if previous.close < previous.open
        && current.close > current.open
        && current.low < previous.low
        && current.high > previous.high
    {
        return Some(Engulfing {
            direction: Direction::Bullish,
        });
    }
    if previous.close > previous.open
        && current.close < current.open
        && current.low < previous.low
        && current.high > previous.high
    {
        return Some(Engulfing {
            direction: Direction::Bearish,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Timeframe;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64, hour: u32) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::H4,
            open_time: NaiveDate::from_ymd_opt(2025, 1, 15)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    #[test]
    fn stalled_rally_reads_as_bullish_exhaustion() {
        let previous = bar(1.1000, 1.1050, 1.0990, 1.1045, 8);
        let current = bar(1.1045, 1.1048, 1.1020, 1.1030, 12);
        assert_eq!(
            vayas(&previous, &current),
            Some(Vayas {
                exhausted: Direction::Bullish
            })
        );
    }

    #[test]
    fn new_high_is_no_exhaustion() {
        let previous = bar(1.1000, 1.1050, 1.0990, 1.1045, 8);
        let current = bar(1.1045, 1.1060, 1.1030, 1.1055, 12);
        assert_eq!(vayas(&previous, &current), None);
    }

    #[test]
    fn stalled_selloff_reads_as_bearish_exhaustion() {
        let previous = bar(1.1050, 1.1060, 1.1000, 1.1005, 8);
        let current = bar(1.1005, 1.1030, 1.1002, 1.1020, 12);
        assert_eq!(
            vayas(&previous, &current),
            Some(Vayas {
                exhausted: Direction::Bearish
            })
        );
    }

    #[test]
    fn bullish_engulfing_swallows_a_bearish_bar() {
        let previous = bar(1.1030, 1.1035, 1.1010, 1.1015, 8);
        let current = bar(1.1012, 1.1045, 1.1005, 1.1040, 12);
        assert_eq!(
            engulfing(&previous, &current),
            Some(Engulfing {
                direction: Direction::Bullish
            })
        );
    }

    #[test]
    fn partial_cover_is_not_engulfing() {
        let previous = bar(1.1030, 1.1035, 1.1010, 1.1015, 8);
        let current = bar(1.1012, 1.1030, 1.1005, 1.1025, 12);
        assert_eq!(engulfing(&previous, &current), None);
    }
}
