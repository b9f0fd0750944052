//! Previous-daily-high/low levels: liquidity pools the market tends to
//! reach for. A level counts as taken once the bid comes within tolerance
//! of it; a strict crossing distinguishes a full take from a touch.

use common::{Bar, Direction};
use serde_json::json;

use super::{HtfSignal, StrategyKind, SweepKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    PrevDayHigh,
    PrevDayLow,
}

#[derive(Debug, Clone)]
pub struct DailyLevel {
    pub kind: LevelKind,
    /// The level price (the day's high or low).
    pub price: f64,
    /// How many closed daily bars back the level comes from (1 = yesterday).
    pub days_back: usize,
    /// Bid within tolerance of the level but not past it.
    pub is_taking: bool,
    /// Bid strictly beyond the level.
    pub has_taken: bool,
    pub distance: f64,
    /// Opposite extreme of the same daily bar; the reversal target.
    pub opposite_extreme: f64,
}

/// Scan the previous daily bars (oldest first, most recent previous day
/// last; the forming daily bar must not be included) and report the taken
/// level closest to the bid, if any. `tolerance` is in price units.
pub fn detect(previous_days: &[Bar], bid: f64, tolerance: f64) -> Option<DailyLevel> {
    let mut best: Option<DailyLevel> = None;

    for (idx, day) in previous_days.iter().rev().enumerate() {
        let days_back = idx + 1;

        let high_taken = bid >= day.high - tolerance;
        if high_taken {
            let candidate = DailyLevel {
                kind: LevelKind::PrevDayHigh,
                price: day.high,
                days_back,
                is_taking: bid <= day.high,
                has_taken: bid > day.high,
                distance: (bid - day.high).abs(),
                opposite_extreme: day.low,
            };
            best = closer(best, candidate);
        }

        let low_taken = bid <= day.low + tolerance;
        if low_taken {
            let candidate = DailyLevel {
                kind: LevelKind::PrevDayLow,
                price: day.low,
                days_back,
                is_taking: bid >= day.low,
                has_taken: bid < day.low,
                distance: (bid - day.low).abs(),
                opposite_extreme: day.high,
            };
            best = closer(best, candidate);
        }
    }

    best
}

fn closer(best: Option<DailyLevel>, candidate: DailyLevel) -> Option<DailyLevel> {
    match best {
        Some(current) if current.distance <= candidate.distance => Some(current),
        _ => Some(candidate),
    }
}

impl DailyLevel {
    /// A taken high reads bearish (liquidity above is spent), a taken low
    /// bullish; the reversal targets the same day's opposite extreme.
    pub fn into_signal(self) -> HtfSignal {
        let (direction, sweep) = match self.kind {
            LevelKind::PrevDayHigh => (Direction::Bearish, SweepKind::BullishSweep),
            LevelKind::PrevDayLow => (Direction::Bullish, SweepKind::BearishSweep),
        };
        let context = json!({
            "pattern": "daily_levels_sweep",
            "level": format!("{:?}", self.kind),
            "level_price": self.price,
            "days_back": self.days_back,
            "is_taking": self.is_taking,
            "has_taken": self.has_taken,
            "target_price": self.opposite_extreme,
        });
        HtfSignal {
            strategy: StrategyKind::DailyLevels,
            direction,
            target_price: self.opposite_extreme,
            sweep,
            context,
        }
    }
}
