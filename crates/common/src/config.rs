use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;
use crate::{Error, Result};

/// Full configuration surface, loaded from one TOML file at boot.
/// Unknown keys are rejected; invalid values are fatal with a clear message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub mt5: Mt5Config,
    /// Instruments analyzed each cycle.
    pub symbols: Vec<String>,
    #[serde(default)]
    pub trading_hours: TradingHoursConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub strategy_schedule: ScheduleConfig,
    #[serde(default)]
    pub strategy_config: StrategyTuning,
    #[serde(default)]
    pub risk_management: RiskConfig,
    #[serde(default)]
    pub position_monitoring: MonitoringConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Mt5Config {
    pub login: u64,
    /// Overridable via the MT5_PASSWORD environment variable.
    #[serde(default)]
    pub password: String,
    pub server: String,
    /// HTTP endpoint of the local terminal bridge.
    pub bridge_url: String,
    /// Explicit broker-zone offset from UTC, in minutes. When absent the
    /// offset is auto-detected from a recently closed bar.
    #[serde(default)]
    pub broker_utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TradingHoursConfig {
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_time: "09:00".into(),
            end_time: "13:00".into(),
            timezone: "America/New_York".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// Default strategy when no session override applies.
    pub name: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ny_zone")]
    pub timezone: String,
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub strategy: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyTuning {
    /// Timeframe the entry FVG is read on.
    #[serde(default = "default_entry_timeframe")]
    pub crt_entry_timeframe: Timeframe,
    #[serde(default = "default_min_rr")]
    pub min_rr: f64,
    /// Timeframe the CRT / Turtle-Soup key candles are read on.
    #[serde(default = "default_high_timeframe")]
    pub crt_high_timeframe: Timeframe,
    #[serde(default)]
    pub crt_use_vayas: bool,
    #[serde(default)]
    pub crt_use_engulfing: bool,
    #[serde(default = "default_lookback")]
    pub crt_lookback: usize,
    /// Tolerance, in pips, for a daily level to count as taken.
    #[serde(default = "default_level_tolerance")]
    pub level_tolerance_pips: f64,
}

impl Default for StrategyTuning {
    fn default() -> Self {
        Self {
            crt_entry_timeframe: default_entry_timeframe(),
            min_rr: default_min_rr(),
            crt_high_timeframe: default_high_timeframe(),
            crt_use_vayas: false,
            crt_use_engulfing: false,
            crt_lookback: default_lookback(),
            level_tolerance_pips: default_level_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    #[serde(default = "default_risk_percent")]
    pub risk_per_trade_percent: f64,
    #[serde(default = "default_max_trades")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_position")]
    pub max_position_size: f64,
    #[serde(default)]
    pub close_day_on_first_tp: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_percent: default_risk_percent(),
            max_trades_per_day: default_max_trades(),
            max_position_size: default_max_position(),
            close_day_on_first_tp: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
    #[serde(default)]
    pub auto_close: AutoCloseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    /// Fraction of the entry→TP move that arms the trail.
    pub trigger_percent: f64,
    /// Fraction of the entry→TP move the stop is advanced to.
    pub sl_percent: f64,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_percent: 0.70,
            sl_percent: 0.50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutoCloseConfig {
    pub enabled: bool,
    /// Wall-clock flat-all time, "HH:MM" in `timezone`.
    pub time: String,
    pub timezone: String,
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: "16:50".into(),
            timezone: "America/New_York".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NewsConfig {
    pub enabled: bool,
    /// Zone the calendar page renders event times in.
    pub calendar_timezone: String,
    pub block_minutes_before: i64,
    pub block_minutes_after: i64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            calendar_timezone: "Europe/Paris".into(),
            block_minutes_before: 5,
            block_minutes_after: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "sqlite:rangebot.db".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// DEBUG | INFO | WARNING | ERROR
    pub log_level: String,
    /// Route orders to the simulated broker while reading live market data.
    #[serde(default)]
    pub paper_trading: bool,
    /// Simulated account equity in paper mode.
    #[serde(default = "default_paper_equity")]
    pub paper_equity: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".into(),
            paper_trading: false,
            paper_equity: default_paper_equity(),
        }
    }
}

fn default_paper_equity() -> f64 {
    10_000.0
}

fn default_ny_zone() -> String {
    "America/New_York".into()
}

fn default_entry_timeframe() -> Timeframe {
    Timeframe::M5
}

fn default_high_timeframe() -> Timeframe {
    Timeframe::H4
}

fn default_min_rr() -> f64 {
    2.0
}

fn default_lookback() -> usize {
    5
}

fn default_level_tolerance() -> f64 {
    1.0
}

fn default_risk_percent() -> f64 {
    1.0
}

fn default_max_trades() -> u32 {
    2
}

fn default_max_position() -> f64 {
    1.0
}

impl Config {
    /// Load, apply environment overrides, and validate. Any failure here is
    /// fatal at boot.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read '{path}': {e}")))?;
        let mut cfg: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("'{path}': {e}")))?;

        if let Ok(password) = std::env::var("MT5_PASSWORD") {
            cfg.mt5.password = password;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config("symbols list is empty".into()));
        }
        if self.mt5.password.is_empty() {
            return Err(Error::Config(
                "mt5.password is empty (set it in the file or via MT5_PASSWORD)".into(),
            ));
        }
        if self.strategy_config.min_rr < 1.0 {
            return Err(Error::Config(format!(
                "strategy_config.min_rr must be >= 1, got {}",
                self.strategy_config.min_rr
            )));
        }
        match self.strategy_config.crt_entry_timeframe {
            Timeframe::M1 | Timeframe::M5 | Timeframe::M15 | Timeframe::M30 | Timeframe::H1 => {}
            other => {
                return Err(Error::Config(format!(
                    "strategy_config.crt_entry_timeframe must be one of M1/M5/M15/M30/H1, got {other}"
                )))
            }
        }
        match self.strategy_config.crt_high_timeframe {
            Timeframe::H4 | Timeframe::D1 => {}
            other => {
                return Err(Error::Config(format!(
                    "strategy_config.crt_high_timeframe must be H4 or D1, got {other}"
                )))
            }
        }
        if !(0.0..=100.0).contains(&self.risk_management.risk_per_trade_percent)
            || self.risk_management.risk_per_trade_percent <= 0.0
        {
            return Err(Error::Config(format!(
                "risk_management.risk_per_trade_percent must be in (0, 100], got {}",
                self.risk_management.risk_per_trade_percent
            )));
        }
        match self.general.log_level.to_uppercase().as_str() {
            "DEBUG" | "INFO" | "WARNING" | "ERROR" => {}
            other => {
                return Err(Error::Config(format!(
                    "general.log_level must be DEBUG/INFO/WARNING/ERROR, got '{other}'"
                )))
            }
        }

        parse_hhmm(&self.trading_hours.start_time)?;
        parse_hhmm(&self.trading_hours.end_time)?;
        parse_zone(&self.trading_hours.timezone)?;
        parse_hhmm(&self.position_monitoring.auto_close.time)?;
        parse_zone(&self.position_monitoring.auto_close.timezone)?;
        parse_zone(&self.news.calendar_timezone)?;
        parse_zone(&self.strategy_schedule.timezone)?;
        for session in &self.strategy_schedule.sessions {
            parse_hhmm(&session.start_time)?;
            parse_hhmm(&session.end_time)?;
        }

        Ok(())
    }

    /// Tracing filter directive for the configured log level.
    pub fn log_directive(&self) -> &'static str {
        match self.general.log_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }
}

/// Parse "HH:MM" into a NaiveTime, rejecting anything else.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| Error::Config(format!("invalid time '{s}', expected HH:MM")))
}

/// Parse an IANA zone name.
pub fn parse_zone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| Error::Config(format!("invalid timezone '{s}'")))
}
