//! CRT Revision: the second key candle sweeps exactly one extreme of the
//! first with a wick while its body closes back inside the first candle's
//! range. Price is expected to revert toward the opposite extreme.

use common::{Bar, Direction};
use serde_json::json;

use super::{bar_json, close_type_str, HtfSignal, StrategyKind, SweepKind};

#[derive(Debug, Clone)]
pub struct CrtRevision {
    pub direction: Direction,
    pub target_price: f64,
    pub sweep_price: f64,
    pub sweep: SweepKind,
}

/// Detected iff c5's body sits inside c1's full range and exactly one of
/// c1's extremes was swept. Sweeping both is the Extreme pattern, not a
/// revision.
pub fn detect(c1: &Bar, c5: &Bar) -> Option<CrtRevision> {
    let body_inside = c5.body_bottom() >= c1.low && c5.body_top() <= c1.high;
    if !body_inside {
        return None;
    }

    let swept_high = c5.high > c1.high;
    let swept_low = c5.low < c1.low;
    if swept_high == swept_low {
        return None;
    }

    if swept_high {
        Some(CrtRevision {
            direction: Direction::Bearish,
            target_price: c1.low,
            sweep_price: c1.high,
            sweep: SweepKind::BullishSweep,
        })
    } else {
        Some(CrtRevision {
            direction: Direction::Bullish,
            target_price: c1.high,
            sweep_price: c1.low,
            sweep: SweepKind::BearishSweep,
        })
    }
}

impl CrtRevision {
    pub fn into_signal(self, c1: &Bar, c5: &Bar) -> HtfSignal {
        let context = json!({
            "pattern": "crt_revision",
            "sweep": format!("{:?}", self.sweep),
            "sweep_price": self.sweep_price,
            "target_price": self.target_price,
            "body_inside_range": true,
            "close_type": close_type_str(c5.direction()),
            "candle_1am": bar_json(c1),
            "candle_5am": bar_json(c5),
        });
        HtfSignal {
            strategy: StrategyKind::CrtRevision,
            direction: self.direction,
            target_price: self.target_price,
            sweep: self.sweep,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Timeframe;
    use chrono::NaiveDate;

    fn h4(open: f64, high: f64, low: f64, close: f64, hour: u32) -> Bar {
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
    fn low_sweep_with_body_inside_targets_range_high() {
        // Seed scenario: c1 range 1.10700-1.11000; c5 high 1.10900,
        // low 1.10650, body 1.10650-1.10750.
        let c1 = h4(1.10750, 1.11000, 1.10700, 1.10950, 8);
        let c5 = h4(1.10750, 1.10900, 1.10650, 1.10650, 12);

        let crt = detect(&c1, &c5).unwrap();
        assert_eq!(crt.direction, Direction::Bullish);
        assert!((crt.target_price - 1.11000).abs() < 1e-9);
        assert!((crt.sweep_price - 1.10700).abs() < 1e-9);
    }

    #[test]
    fn high_sweep_with_body_inside_targets_range_low() {
        let c1 = h4(1.10750, 1.11000, 1.10700, 1.10950, 8);
        let c5 = h4(1.10950, 1.11080, 1.10800, 1.10850, 12);

        let crt = detect(&c1, &c5).unwrap();
        assert_eq!(crt.direction, Direction::Bearish);
        assert!((crt.target_price - 1.10700).abs() < 1e-9);
    }

    #[test]
    fn body_escaping_the_range_is_not_revision() {
        let c1 = h4(1.10750, 1.11000, 1.10700, 1.10950, 8);
        // Sweeps the low but closes below the range too.
        let c5 = h4(1.10800, 1.10850, 1.10600, 1.10620, 12);
        assert!(detect(&c1, &c5).is_none());
    }

    #[test]
    fn sweeping_both_extremes_is_not_revision() {
        let c1 = h4(1.10750, 1.11000, 1.10700, 1.10950, 8);
        let c5 = h4(1.10800, 1.11050, 1.10650, 1.10900, 12);
        assert!(detect(&c1, &c5).is_none());
    }

    #[test]
    fn no_sweep_at_all_is_not_revision() {
        let c1 = h4(1.10750, 1.11000, 1.10700, 1.10950, 8);
        let c5 = h4(1.10800, 1.10950, 1.10750, 1.10900, 12);
        assert!(detect(&c1, &c5).is_none());
    }
}
