//! Turtle-Soup on the H4 key candles: the 9 AM bar sweeping an extreme of
//! the 1 AM or 5 AM bar signals a reversal toward the swept bar's opposite
//! extreme.

use common::{Bar, Direction};
use serde_json::json;

use super::{bar_json, HtfSignal, StrategyKind, SweepKind};

/// Which key candle got swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCandle {
    OneAm,
    FiveAm,
}

impl KeyCandle {
    fn tag(self) -> &'static str {
        match self {
            KeyCandle::OneAm => "1am",
            KeyCandle::FiveAm => "5am",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurtleSoup {
    pub swept_candle: KeyCandle,
    pub sweep: SweepKind,
    pub direction: Direction,
    pub target_price: f64,
    pub sweep_price: f64,
}

/// Detect a sweep by the 9 AM bar (which may still be forming) against the
/// 1 AM and 5 AM bars. When both earlier highs (or lows) could be swept,
/// the bar holding the more extreme level is the swept one; ties go to the
/// earlier bar.
pub fn detect(c1: &Bar, c5: &Bar, c9: &Bar) -> Option<TurtleSoup> {
    if c9.high > c1.high.max(c5.high) {
        // Liquidity above got taken; expect a reversal down.
        let (swept_candle, swept) = if c5.high > c1.high {
            (KeyCandle::FiveAm, c5)
        } else {
            (KeyCandle::OneAm, c1)
        };
        return Some(TurtleSoup {
            swept_candle,
            sweep: SweepKind::BullishSweep,
            direction: Direction::Bearish,
            target_price: swept.low,
            sweep_price: swept.high,
        });
    }

    if c9.low < c1.low.min(c5.low) {
        let (swept_candle, swept) = if c5.low < c1.low {
            (KeyCandle::FiveAm, c5)
        } else {
            (KeyCandle::OneAm, c1)
        };
        return Some(TurtleSoup {
            swept_candle,
            sweep: SweepKind::BearishSweep,
            direction: Direction::Bullish,
            target_price: swept.high,
            sweep_price: swept.low,
        });
    }

    None
}

impl TurtleSoup {
    pub fn into_signal(self, c1: &Bar, c5: &Bar, c9: &Bar) -> HtfSignal {
        let context = json!({
            "pattern": "turtle_soup",
            "swept_candle": self.swept_candle.tag(),
            "sweep": format!("{:?}", self.sweep),
            "sweep_price": self.sweep_price,
            "target_price": self.target_price,
            "candle_1am": bar_json(c1),
            "candle_5am": bar_json(c5),
            "candle_9am": bar_json(c9),
        });
        HtfSignal {
            strategy: StrategyKind::TurtleSoup,
            direction: self.direction,
            target_price: self.target_price,
            sweep: self.sweep,
            context,
        }
    }
}
