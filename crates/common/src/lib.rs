pub mod candles;
pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use candles::{CandleAnchor, CandleReader};
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::BrokerGateway;
pub use types::*;
