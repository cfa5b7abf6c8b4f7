use std::path::PathBuf;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::model::Ms;

/// Config load failures. Malformed numbers silently fall back to defaults;
/// the timezone and shop-hours strings fail fast instead, since a typo there
/// corrupts every rental window.
#[derive(Debug)]
pub enum ConfigError {
    BadTimezone(String),
    BadTime(&'static str, String),
    ShopHoursInverted,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::BadTimezone(s) => write!(f, "unknown timezone: {s}"),
            ConfigError::BadTime(which, s) => write!(f, "bad {which} time (want HH:MM): {s}"),
            ConfigError::ShopHoursInverted => write!(f, "shop close time must be after open time"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime configuration, read once at startup from `FREEWHEEL_*` env vars.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    /// Operating timezone. All calendar resolution happens here, never in
    /// UTC or the caller's locale.
    pub timezone: Tz,
    /// Shop-hours window rented by full-day bookings.
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    /// How long an unpaid hold blocks its units.
    pub hold_minutes: i64,
    /// Tick of the background task that expires unpaid holds.
    pub sweep_seconds: u64,
    /// Client-side deadline on payment gateway calls.
    pub gateway_timeout_ms: u64,
    /// TTL for cached CMS copy.
    pub content_ttl_seconds: u64,
    /// Longest bookable window, in days.
    pub max_rental_days: i64,
    /// WAL appends that trigger background compaction.
    pub compact_threshold: u64,
    pub wal_path: PathBuf,
    pub metrics_port: Option<u16>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Amsterdam,
            open_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid open time"),
            close_time: NaiveTime::from_hms_opt(17, 0, 0).expect("valid close time"),
            hold_minutes: 15,
            sweep_seconds: 60,
            gateway_timeout_ms: 5_000,
            content_ttl_seconds: 300,
            max_rental_days: 14,
            compact_threshold: 1_000,
            wal_path: PathBuf::from("freewheel.wal"),
            metrics_port: None,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_num<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_timezone(s: &str) -> Result<Tz, ConfigError> {
    s.parse::<Tz>()
        .map_err(|_| ConfigError::BadTimezone(s.to_string()))
}

pub(crate) fn parse_time(which: &'static str, s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| ConfigError::BadTime(which, s.to_string()))
}

impl ShopConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timezone = parse_timezone(&env_or("FREEWHEEL_TZ", "Europe/Amsterdam"))?;
        let open_time = parse_time("open", &env_or("FREEWHEEL_OPEN", "09:00"))?;
        let close_time = parse_time("close", &env_or("FREEWHEEL_CLOSE", "17:00"))?;
        if close_time <= open_time {
            return Err(ConfigError::ShopHoursInverted);
        }

        Ok(Self {
            timezone,
            open_time,
            close_time,
            hold_minutes: env_num("FREEWHEEL_HOLD_MINUTES", defaults.hold_minutes),
            sweep_seconds: env_num("FREEWHEEL_SWEEP_SECONDS", defaults.sweep_seconds),
            gateway_timeout_ms: env_num("FREEWHEEL_GATEWAY_TIMEOUT_MS", defaults.gateway_timeout_ms),
            content_ttl_seconds: env_num("FREEWHEEL_CONTENT_TTL_SECONDS", defaults.content_ttl_seconds),
            max_rental_days: env_num("FREEWHEEL_MAX_RENTAL_DAYS", defaults.max_rental_days),
            compact_threshold: env_num("FREEWHEEL_COMPACT_THRESHOLD", defaults.compact_threshold),
            wal_path: PathBuf::from(env_or("FREEWHEEL_WAL", "freewheel.wal")),
            metrics_port: std::env::var("FREEWHEEL_METRICS_PORT")
               .ok()
               .and_then(|s| s.parse().ok()),
        })
    }

    pub fn hold_window_ms(&self) -> Ms {
        self.hold_minutes * 60_000
    }

    pub fn max_rental_ms(&self) -> Ms {
        self.max_rental_days * 86_400_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let cfg = ShopConfig::default();
        assert!(cfg.open_time < cfg.close_time);
        assert_eq!(cfg.hold_window_ms(), 15 * 60_000);
        assert_eq!(cfg.max_rental_ms(), 14 * 86_400_000);
    }

    #[test]
    fn timezone_parsing() {
        assert_eq!(
            parse_timezone("Europe/Amsterdam").unwrap(),
            chrono_tz::Europe::Amsterdam
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn shop_time_parsing() {
        assert_eq!(
            parse_time("open", "09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(parse_time("open", "9am").is_err());
        assert!(parse_time("open", "25:00").is_err());
    }
}
