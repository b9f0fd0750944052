//! Pure pattern detectors over small windows of bars. No I/O here: the
//! pipeline fetches the bars and quotes, detectors only judge them. Any
//! anomaly (missing bars, degenerate ranges) reads as "not detected".

pub mod confirmation;
pub mod crt_continuation;
pub mod crt_extreme;
pub mod crt_revision;
pub mod daily_levels;
pub mod fvg;
pub mod turtle_soup;

use common::{Bar, BarDirection, Direction};
use serde_json::json;

/// The strategy family selectable by name from the scheduler. Adding a
/// strategy means adding a detector and one more arm here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// No analysis; placeholder outside configured sessions.
    Default,
    TurtleSoup,
    CrtContinuation,
    CrtRevision,
    CrtExtreme,
    DailyLevels,
}

impl StrategyKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(StrategyKind::Default),
            "turtle_soup_fvg" => Some(StrategyKind::TurtleSoup),
            "crt_continuation" => Some(StrategyKind::CrtContinuation),
            "crt_revision" => Some(StrategyKind::CrtRevision),
            "crt_extreme" => Some(StrategyKind::CrtExtreme),
            "daily_levels_sweep" => Some(StrategyKind::DailyLevels),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Default => "default",
            StrategyKind::TurtleSoup => "turtle_soup_fvg",
            StrategyKind::CrtContinuation => "crt_continuation",
            StrategyKind::CrtRevision => "crt_revision",
            StrategyKind::CrtExtreme => "crt_extreme",
            StrategyKind::DailyLevels => "daily_levels_sweep",
        }
    }

    pub fn known_names() -> &'static [&'static str] {
        &[
            "default",
            "turtle_soup_fvg",
            "crt_continuation",
            "crt_revision",
            "crt_extreme",
            "daily_levels_sweep",
        ]
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which liquidity got taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// A prior high was exceeded.
    BullishSweep,
    /// A prior low was undercut.
    BearishSweep,
    /// Both extremes taken in one bar.
    ExtremeSweep,
}

/// Output every high-timeframe detector funnels into: the direction the
/// entry FVG must confirm and the price the trade targets.
#[derive(Debug, Clone)]
pub struct HtfSignal {
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub target_price: f64,
    pub sweep: SweepKind,
    /// Pattern context preserved verbatim into the order ledger.
    pub context: serde_json::Value,
}

pub(crate) fn bar_json(bar: &Bar) -> serde_json::Value {
    json!({
        "time": bar.open_time.to_string(),
        "open": bar.open,
        "high": bar.high,
        "low": bar.low,
        "close": bar.close,
    })
}

pub(crate) fn close_type_str(direction: BarDirection) -> &'static str {
    match direction {
        BarDirection::Bullish => "BULLISH",
        BarDirection::Bearish => "BEARISH",
        BarDirection::Doji => "DOJI",
    }
}
