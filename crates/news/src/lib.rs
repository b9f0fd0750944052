pub mod calendar;
pub mod gate;

pub use calendar::{CalendarSource, InvestingCalendar};
pub use gate::{GateVerdict, NewsGate};
