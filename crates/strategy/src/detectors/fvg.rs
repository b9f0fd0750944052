//! Fair-Value-Gap detection over the forming bar and its two predecessors.
//!
//! A fresh gap forms between v1 (oldest) and v3 (forming): the middle bar
//! is ignored for formation. An already-formed gap between v1 and v2 is
//! still reported while the current price interacts with it. All derived
//! flags are judged from the forming bar and the live tick price.

use common::{Bar, Direction, Timeframe};

#[derive(Debug, Clone)]
pub struct Fvg {
    pub kind: Direction,
    pub bottom: f64,
    pub top: f64,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// The forming bar touched the gap range.
    pub entered: bool,
    /// Previously entered and the tick price has left the range.
    pub exited: bool,
    pub exit_direction: Option<Direction>,
    pub bottom_touched: bool,
    pub top_touched: bool,
    pub filled_completely: bool,
    pub current_price: f64,
    pub v1: Bar,
    pub v3: Bar,
}

impl Fvg {
    pub fn size(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn context_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": format!("{}", self.kind),
            "bottom": self.bottom,
            "top": self.top,
            "size": self.size(),
            "timeframe": self.timeframe.as_str(),
            "entered": self.entered,
            "exited": self.exited,
            "filled_completely": self.filled_completely,
        })
    }
}

/// Detect an FVG from the oldest-first window `[v1, v2, v3]` and the
/// current tick price. `v3` is the forming bar. Returns `None` when no gap
/// exists — a zero-size gap is no gap.
pub fn detect(v1: &Bar, v2: &Bar, v3: &Bar, current_price: f64) -> Option<Fvg> {
    // Fresh gap formed with the current bar.
    if v3.low > v1.high {
        return Some(analyze(Direction::Bullish, v1.high, v3.low, v1, v3, current_price));
    }
    if v3.high < v1.low {
        return Some(analyze(Direction::Bearish, v3.high, v1.low, v1, v3, current_price));
    }

    // Older gap between v1 and v2, only interesting while price interacts
    // with it (inside, or within twice the gap size of either edge).
    if v2.low > v1.high {
        let (bottom, top) = (v1.high, v2.low);
        if interacting(bottom, top, current_price) {
            return Some(analyze(Direction::Bullish, bottom, top, v1, v3, current_price));
        }
    }
    if v2.high < v1.low {
        let (bottom, top) = (v2.high, v1.low);
        if interacting(bottom, top, current_price) {
            return Some(analyze(Direction::Bearish, bottom, top, v1, v3, current_price));
        }
    }

    None
}

fn interacting(bottom: f64, top: f64, price: f64) -> bool {
    let size = top - bottom;
    (bottom <= price && price <= top)
        || (price > top && price - top < size * 2.0)
        || (price < bottom && bottom - price < size * 2.0)
}

fn analyze(
    kind: Direction,
    bottom: f64,
    top: f64,
    v1: &Bar,
    v3: &Bar,
    current_price: f64,
) -> Fvg {
    let touching = bottom <= current_price && current_price <= top;
    let tolerance = (top - bottom) * 0.0001;

    let high_in = bottom <= v3.high && v3.high <= top;
    let low_in = bottom <= v3.low && v3.low <= top;
    let crossed = v3.low < bottom && v3.high > top;
    let overlapped = v3.low <= top && v3.high >= bottom;
    let entered = high_in || low_in || crossed || overlapped;

    let mut bottom_touched = false;
    let mut top_touched = false;
    let mut filled_completely = false;
    match kind {
        Direction::Bullish => {
            // The gap closes when the forming bar's low reaches back down
            // to v1's high.
            if v3.low <= v1.high + tolerance {
                filled_completely = true;
                bottom_touched = true;
                top_touched = true;
            } else if v3.low <= top + tolerance {
                top_touched = true;
            }
        }
        Direction::Bearish => {
            // The gap closes when the forming bar's high reaches back up
            // to v1's low.
            if v3.high >= v1.low - tolerance {
                filled_completely = true;
                bottom_touched = true;
                top_touched = true;
            } else if v3.high >= bottom - tolerance {
                bottom_touched = true;
            }
        }
    }
    if current_price <= bottom + tolerance {
        bottom_touched = true;
    }
    if current_price >= top - tolerance {
        top_touched = true;
    }

    let (exited, exit_direction) = if entered && !touching {
        if current_price > top {
            (true, Some(Direction::Bullish))
        } else if current_price < bottom {
            (true, Some(Direction::Bearish))
        } else {
            (false, None)
        }
    } else {
        (false, None)
    };

    Fvg {
        kind,
        bottom,
        top,
        symbol: v3.symbol.clone(),
        timeframe: v3.timeframe,
        entered,
        exited,
        exit_direction,
        bottom_touched,
        top_touched,
        filled_completely,
        current_price,
        v1: v1.clone(),
        v3: v3.clone(),
    }
}
