pub mod bridge;
pub mod driver;
pub mod monitor;

pub use bridge::Mt5BridgeClient;
pub use driver::Driver;
pub use monitor::{MonitorReport, PositionMonitor};
