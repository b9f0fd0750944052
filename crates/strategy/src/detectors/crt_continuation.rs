//! CRT Continuation: the second key candle's whole body breaks out of the
//! first candle's range, and the move is expected to extend into the
//! following candle. Target is the breakout candle's extreme.

use common::{Bar, Direction};
use serde_json::json;

use super::{bar_json, close_type_str, HtfSignal, StrategyKind, SweepKind};

#[derive(Debug, Clone)]
pub struct CrtContinuation {
    pub direction: Direction,
    pub target_price: f64,
    pub sweep_price: f64,
    pub sweep: SweepKind,
}

/// Both bars must be closed. Bullish when c5's body bottom clears both
/// c1's high and c1's body top; bearish symmetric below.
pub fn detect(c1: &Bar, c5: &Bar) -> Option<CrtContinuation> {
    let body_top_1 = c1.body_top();
    let body_bottom_1 = c1.body_bottom();
    let body_top_5 = c5.body_top();
    let body_bottom_5 = c5.body_bottom();

    if body_bottom_5 > c1.high && body_bottom_5 > body_top_1 {
        return Some(CrtContinuation {
            direction: Direction::Bullish,
            target_price: c5.high,
            sweep_price: c1.high,
            sweep: SweepKind::BullishSweep,
        });
    }

    if body_top_5 < c1.low && body_top_5 < body_bottom_1 {
        return Some(CrtContinuation {
            direction: Direction::Bearish,
            target_price: c5.low,
            sweep_price: c1.low,
            sweep: SweepKind::BearishSweep,
        });
    }

    None
}

impl CrtContinuation {
    pub fn into_signal(self, c1: &Bar, c5: &Bar) -> HtfSignal {
        let context = json!({
            "pattern": "crt_continuation",
            "sweep": format!("{:?}", self.sweep),
            "sweep_price": self.sweep_price,
            "target_price": self.target_price,
            "close_type": close_type_str(c5.direction()),
            "candle_1am": bar_json(c1),
            "candle_5am": bar_json(c5),
        });
        HtfSignal {
            strategy: StrategyKind::CrtContinuation,
            direction: self.direction,
            target_price: self.target_price,
            sweep: self.sweep,
            context,
        }
    }
}
