//! CRT Extreme: the second key candle engulfs both extremes of the first.
//! The close decides which side the move continues toward; a doji defaults
//! to the bullish side.

use common::{Bar, BarDirection, Direction};
use serde_json::json;

use super::{bar_json, close_type_str, HtfSignal, StrategyKind, SweepKind};

#[derive(Debug, Clone)]
pub struct CrtExtreme {
    pub direction: Direction,
    pub target_price: f64,
    pub swept_high: f64,
    pub swept_low: f64,
    pub close_type: BarDirection,
}

pub fn detect(c1: &Bar, c5: &Bar) -> Option<CrtExtreme> {
    if !(c5.high > c1.high && c5.low < c1.low) {
        return None;
    }

    let close_type = c5.direction();
    let (direction, target_price) = match close_type {
        BarDirection::Bullish | BarDirection::Doji => (Direction::Bullish, c5.high),
        BarDirection::Bearish => (Direction::Bearish, c5.low),
    };

    Some(CrtExtreme {
        direction,
        target_price,
        swept_high: c1.high,
        swept_low: c1.low,
        close_type,
    })
}

impl CrtExtreme {
    pub fn into_signal(self, c1: &Bar, c5: &Bar) -> HtfSignal {
        let context = json!({
            "pattern": "crt_extreme",
            "sweep": "ExtremeSweep",
            "swept_high": self.swept_high,
            "swept_low": self.swept_low,
            "target_price": self.target_price,
            "close_type": close_type_str(self.close_type),
            "candle_1am": bar_json(c1),
            "candle_5am": bar_json(c5),
        });
        HtfSignal {
            strategy: StrategyKind::CrtExtreme,
            direction: self.direction,
            target_price: self.target_price,
            sweep: SweepKind::ExtremeSweep,
            context,
        }
    }
}
