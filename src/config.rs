//! Application configuration loaded from environment variables.
//!
//! Exchange credentials **must** be provided via environment variables:
//! - `BITTREX_API_KEY`: API key used to sign private requests
//! - `BITTREX_SECRET`: API secret used to sign private requests
//!
//! Everything else has a default and can be overridden:
//! `BITTREX_API_URL`, `TRADEBOT_DB_PATH`, `TRADEBOT_LISTEN_ADDR`,
//! `TRADEBOT_REFRESH`, `TRADEBOT_BASE_CURRENCY`, `TRADEBOT_QUOTE_CURRENCY`
//! and `TRADEBOT_BACKPRESSURE`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::TradeBotError;
use crate::socket::{BackpressurePolicy, PumpConfig};

/// Default public REST endpoint.
const DEFAULT_API_URL: &str = "https://bittrex.com/api/v1.1";

const DEFAULT_DB_PATH: &str = "tradebot.json";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_REFRESH: Duration = Duration::from_secs(5);
const DEFAULT_BASE_CURRENCY: &str = "BTC";
const DEFAULT_QUOTE_CURRENCY: &str = "USDT";

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub server: ServerConfig,
    pub watch: WatchConfig,
    pub store_path: PathBuf,
}

/// Exchange connection and credential values.
#[derive(Debug)]
pub struct ExchangeConfig {
    pub api_url: String,
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
}

/// Websocket server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub pump: PumpConfig,
}

/// Settings shared by every watch session and the balance refresher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub refresh_interval: Duration,
    /// Currency the watched coin is priced in, e.g. `BTC` for `BTC-LTC`.
    pub base_currency: String,
    pub quote_currency: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH,
            base_currency: DEFAULT_BASE_CURRENCY.to_string(),
            quote_currency: DEFAULT_QUOTE_CURRENCY.to_string(),
        }
    }
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`TradeBotError::Config`] if a credential is missing or any
/// override cannot be parsed.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let api_key = required_var("BITTREX_API_KEY")?;
    let api_secret = Zeroizing::new(required_var("BITTREX_SECRET")?);
    let api_url = non_empty_var("BITTREX_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let listen_addr = non_empty_var("TRADEBOT_LISTEN_ADDR")
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let listen_addr: SocketAddr = listen_addr.parse().map_err(|e| {
        TradeBotError::Config(format!("invalid TRADEBOT_LISTEN_ADDR {listen_addr:?}: {e}"))
    })?;

    let refresh_interval = match non_empty_var("TRADEBOT_REFRESH") {
        Some(raw) => parse_duration(&raw)?,
        None => DEFAULT_REFRESH,
    };

    let backpressure = match non_empty_var("TRADEBOT_BACKPRESSURE") {
        Some(raw) => raw.parse()?,
        None => BackpressurePolicy::default(),
    };

    let store_path =
        PathBuf::from(non_empty_var("TRADEBOT_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()));

    Ok(AppConfig {
        exchange: ExchangeConfig {
            api_url,
            api_key,
            api_secret,
        },
        server: ServerConfig {
            listen_addr,
            pump: PumpConfig {
                backpressure,
                ..PumpConfig::default()
            },
        },
        watch: WatchConfig {
            refresh_interval,
            base_currency: non_empty_var("TRADEBOT_BASE_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_BASE_CURRENCY.to_string()),
            quote_currency: non_empty_var("TRADEBOT_QUOTE_CURRENCY")
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_QUOTE_CURRENCY.to_string()),
        },
        store_path,
    })
}

/// Parses a duration such as `500ms`, `5s`, `2m` or `1h`.
///
/// A bare number is read as seconds. Zero durations are rejected since
/// they would turn the refresh loops into busy loops.
pub fn parse_duration(raw: &str) -> crate::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| TradeBotError::Config(format!("invalid duration {raw:?}")))?;

    let seconds_per_unit = match unit {
        "ms" => None,
        "" | "s" => Some(1),
        "m" => Some(60),
        "h" => Some(60 * 60),
        other => {
            return Err(TradeBotError::Config(format!(
                "invalid duration unit {other:?} in {raw:?}"
            )));
        }
    };
    let duration = match seconds_per_unit {
        None => Duration::from_millis(value),
        Some(scale) => value
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| TradeBotError::Config(format!("duration {raw:?} is too large")))?,
    };

    if duration.is_zero() {
        return Err(TradeBotError::Config(format!(
            "duration {raw:?} must be greater than zero"
        )));
    }

    Ok(duration)
}

/// Returns the value of a required environment variable.
fn required_var(name: &str) -> crate::Result<String> {
    non_empty_var(name)
        .ok_or_else(|| TradeBotError::Config(format!("{name} environment variable missing")))
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 9] = [
        "BITTREX_API_KEY",
        "BITTREX_SECRET",
        "BITTREX_API_URL",
        "TRADEBOT_DB_PATH",
        "TRADEBOT_LISTEN_ADDR",
        "TRADEBOT_REFRESH",
        "TRADEBOT_BASE_CURRENCY",
        "TRADEBOT_QUOTE_CURRENCY",
        "TRADEBOT_BACKPRESSURE",
    ];

    /// Serializes tests that touch the process environment.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Helper that clears every config var, applies `vars`, runs `f`, then
    /// restores the originals.
    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<(&str, Option<String>)> = ALL_VARS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        for k in ALL_VARS {
            // SAFETY: env access is serialized through ENV_LOCK.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in vars {
            // SAFETY: env access is serialized through ENV_LOCK.
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, original) in originals {
            // SAFETY: restoring original values under the same lock.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    const CREDS: [(&str, &str); 2] = [("BITTREX_API_KEY", "key"), ("BITTREX_SECRET", "secret")];

    #[test]
    fn defaults_with_credentials_only() {
        with_env(&CREDS, || {
            let config = fetch_config().unwrap();
            assert_eq!(config.exchange.api_url, DEFAULT_API_URL);
            assert_eq!(config.exchange.api_key, "key");
            assert_eq!(config.exchange.api_secret.as_str(), "secret");
            assert_eq!(config.store_path, PathBuf::from(DEFAULT_DB_PATH));
            assert_eq!(config.server.listen_addr.port(), 8080);
            assert_eq!(config.watch.refresh_interval, DEFAULT_REFRESH);
            assert_eq!(config.watch.base_currency, "BTC");
            assert_eq!(config.watch.quote_currency, "USDT");
            assert_eq!(config.server.pump.backpressure, BackpressurePolicy::Block);
        });
    }

    #[test]
    fn rejects_missing_key() {
        with_env(&[("BITTREX_SECRET", "secret")], || {
            let err = fetch_config().unwrap_err();
            assert!(err.to_string().contains("BITTREX_API_KEY"));
        });
    }

    #[test]
    fn rejects_missing_secret() {
        with_env(&[("BITTREX_API_KEY", "key")], || {
            let err = fetch_config().unwrap_err();
            assert!(err.to_string().contains("BITTREX_SECRET"));
        });
    }

    #[test]
    fn empty_values_treated_as_absent() {
        with_env(&[("BITTREX_API_KEY", ""), ("BITTREX_SECRET", "secret")], || {
            assert!(fetch_config().is_err());
        });
    }

    #[test]
    fn overrides_are_applied() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("TRADEBOT_LISTEN_ADDR", "0.0.0.0:9000"),
            ("TRADEBOT_REFRESH", "250ms"),
            ("TRADEBOT_BASE_CURRENCY", "eth"),
            ("TRADEBOT_BACKPRESSURE", "disconnect"),
            ("TRADEBOT_DB_PATH", "/tmp/state.json"),
        ]);
        with_env(&vars, || {
            let config = fetch_config().unwrap();
            assert_eq!(config.server.listen_addr.port(), 9000);
            assert_eq!(config.watch.refresh_interval, Duration::from_millis(250));
            assert_eq!(config.watch.base_currency, "ETH");
            assert_eq!(
                config.server.pump.backpressure,
                BackpressurePolicy::Disconnect
            );
            assert_eq!(config.store_path, PathBuf::from("/tmp/state.json"));
        });
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let mut vars = CREDS.to_vec();
        vars.push(("TRADEBOT_LISTEN_ADDR", "not-an-addr"));
        with_env(&vars, || {
            let err = fetch_config().unwrap_err();
            assert!(err.to_string().contains("TRADEBOT_LISTEN_ADDR"));
        });
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("750ms").unwrap(), Duration::from_millis(750));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn rejects_overflowing_durations() {
        let err = parse_duration("400000000000000000m").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(parse_duration("18446744073709551615h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }
}
