use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use std::{env, str::FromStr};
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::{MatchPolicy, SchedulerConfig, DEFAULT_POLL_INTERVAL_S, DEFAULT_SINK_TIMEOUT_S};
use crate::store::DEFAULT_LOW_STOCK_DAYS;
use crate::LOG_CONFIG_PATH;

pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

pub const VAR_STORE_PATH: &str = "MED_STORE_PATH";
pub const VAR_POLL_INTERVAL_S: &str = "POLL_INTERVAL_S";
pub const VAR_CATCH_UP: &str = "ALERT_CATCH_UP";
pub const VAR_SINK_TIMEOUT_S: &str = "SINK_TIMEOUT_S";
pub const VAR_WEBHOOK_URL: &str = "ALERT_WEBHOOK_URL";
pub const VAR_WEBHOOK_TOKEN: &str = "ALERT_WEBHOOK_TOKEN";
pub const VAR_LOW_STOCK_DAYS: &str = "LOW_STOCK_DAYS";

pub const DEFAULT_STORE_PATH: &str = "med_data.json";

/// Fails on the first variable that is set but does not parse.
pub fn check_environment_vars() -> Result<(), ConfigError> {
    seconds_var(VAR_POLL_INTERVAL_S, DEFAULT_POLL_INTERVAL_S)?;
    seconds_var(VAR_SINK_TIMEOUT_S, DEFAULT_SINK_TIMEOUT_S)?;
    parsed_var::<u32>(VAR_LOW_STOCK_DAYS, DEFAULT_LOW_STOCK_DAYS)?;
    parsed_var::<bool>(VAR_CATCH_UP, false)?;
    Ok(())
}

fn parsed_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse::<T>()
            .map_err(|_| ConfigError { var, value }),
        _ => Ok(default),
    }
}

/// A whole number of seconds. Zero is rejected.
fn seconds_var(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match parsed_var(var, default)? {
        0 => Err(ConfigError { var, value: "0".into() }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn optional_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

pub fn scheduler_config() -> Result<SchedulerConfig, ConfigError> {
    let match_policy = if parsed_var(VAR_CATCH_UP, false)? {
        MatchPolicy::CatchUp
    } else {
        MatchPolicy::Exact
    };
    Ok(SchedulerConfig {
        poll_interval: seconds_var(VAR_POLL_INTERVAL_S, DEFAULT_POLL_INTERVAL_S)?,
        match_policy,
        sink_timeout: seconds_var(VAR_SINK_TIMEOUT_S, DEFAULT_SINK_TIMEOUT_S)?,
    })
}

pub fn store_path() -> String {
    optional_var(VAR_STORE_PATH).unwrap_or(String::from(DEFAULT_STORE_PATH))
}

pub fn low_stock_days() -> Result<u32, ConfigError> {
    parsed_var(VAR_LOW_STOCK_DAYS, DEFAULT_LOW_STOCK_DAYS)
}

/// (url, bearer token) when the webhook sink is configured.
pub fn webhook_target() -> Option<(String, Option<String>)> {
    optional_var(VAR_WEBHOOK_URL).map(|url| (url, optional_var(VAR_WEBHOOK_TOKEN)))
}

/// Load `log4rs.yaml`, or log to the console at info level without it.
pub fn init_logging() {
    if let Err(e) = log4rs::init_file(LOG_CONFIG_PATH, Default::default()) {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));
        match config.map(log4rs::init_config) {
            Ok(Ok(_)) => log::warn!("Could not load {}: {}. Logging to console", LOG_CONFIG_PATH, e),
            Ok(Err(e)) => eprintln!("Logger already initialized: {e}"),
            Err(e) => eprintln!("Invalid fallback logging config: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names so they can run in parallel.

    #[test]
    fn parsed_var_falls_back_to_default() {
        env::remove_var("TEST_UTIL_UNSET");
        assert_eq!(parsed_var::<u64>("TEST_UTIL_UNSET", 60).unwrap(), 60);
        env::set_var("TEST_UTIL_BLANK", "  ");
        assert_eq!(parsed_var::<u64>("TEST_UTIL_BLANK", 60).unwrap(), 60);
    }

    #[test]
    fn parsed_var_reports_bad_values() {
        env::set_var("TEST_UTIL_BAD", "soon");
        let err = parsed_var::<u64>("TEST_UTIL_BAD", 60).unwrap_err();
        assert_eq!(err.var, "TEST_UTIL_BAD");
        assert_eq!(err.value, "soon");

        env::set_var("TEST_UTIL_GOOD", " 5 ");
        assert_eq!(parsed_var::<u64>("TEST_UTIL_GOOD", 60).unwrap(), 5);
    }

    #[test]
    fn zero_seconds_is_rejected() {
        env::set_var("TEST_UTIL_ZERO_TIMEOUT", "0");
        let err = seconds_var("TEST_UTIL_ZERO_TIMEOUT", 10).unwrap_err();
        assert_eq!(err.var, "TEST_UTIL_ZERO_TIMEOUT");
        assert_eq!(err.value, "0");

        env::remove_var("TEST_UTIL_UNSET_TIMEOUT");
        assert_eq!(seconds_var("TEST_UTIL_UNSET_TIMEOUT", 10).unwrap(), Duration::from_secs(10));
        env::set_var("TEST_UTIL_SHORT_TIMEOUT", "2");
        assert_eq!(seconds_var("TEST_UTIL_SHORT_TIMEOUT", 10).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn optional_var_ignores_empty_values() {
        env::set_var("TEST_UTIL_EMPTY_URL", "");
        assert_eq!(optional_var("TEST_UTIL_EMPTY_URL"), None);
        env::set_var("TEST_UTIL_URL", "http://localhost/hook");
        assert_eq!(optional_var("TEST_UTIL_URL").as_deref(), Some("http://localhost/hook"));
    }
}
