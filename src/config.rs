//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default DNC opt-out keywords.
pub const DEFAULT_DNC_KEYWORDS: &[&str] = &["stop", "remove", "no more", "unsubscribe"];

/// Default drip follow-up body.
pub const DEFAULT_DRIP_TEMPLATE: &str = "Hey just following up—any thoughts on our last message?";

/// Upper bound for the silence threshold and the drip delay (10 years).
pub const MAX_WINDOW: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Engagement engine configuration.
#[derive(Debug, Clone)]
pub struct EngagementConfig {
    /// A lead whose last reply is at least this old is due for a drip.
    pub silence_threshold: Duration,
    /// Delay between a drip pass and the follow-up actually firing.
    pub drip_delay: Duration,
    /// Case-insensitive substrings that flag an inbound reply as opt-out.
    pub dnc_keywords: Vec<String>,
    /// Body used for every drip follow-up.
    pub drip_template: String,
    /// Optional cron expression for driving drip passes periodically.
    pub drip_cron: Option<String>,
    /// HTTP port for the API surface.
    pub http_port: u16,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_secs(3 * 24 * 60 * 60), // 3 days
            drip_delay: Duration::from_secs(60),                      // 1 minute
            dnc_keywords: DEFAULT_DNC_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            drip_template: DEFAULT_DRIP_TEMPLATE.to_string(),
            drip_cron: None,
            http_port: 5000,
        }
    }
}

impl EngagementConfig {
    /// Build configuration from `LEADFLOW_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let silence_threshold = match lookup("LEADFLOW_SILENCE_THRESHOLD_SECS") {
            Some(v) => Duration::from_secs(parse_value("LEADFLOW_SILENCE_THRESHOLD_SECS", &v)?),
            None => defaults.silence_threshold,
        };

        let drip_delay = match lookup("LEADFLOW_DRIP_DELAY_SECS") {
            Some(v) => Duration::from_secs(parse_value("LEADFLOW_DRIP_DELAY_SECS", &v)?),
            None => defaults.drip_delay,
        };

        let dnc_keywords = match lookup("LEADFLOW_DNC_KEYWORDS") {
            Some(v) => {
                let keywords: Vec<String> = v
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if keywords.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "LEADFLOW_DNC_KEYWORDS".to_string(),
                        message: "at least one keyword is required".to_string(),
                    });
                }
                keywords
            }
            None => defaults.dnc_keywords,
        };

        let drip_template = lookup("LEADFLOW_DRIP_TEMPLATE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.drip_template);

        let drip_cron = lookup("LEADFLOW_DRIP_CRON").filter(|s| !s.trim().is_empty());
        if let Some(ref expr) = drip_cron {
            cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidCron {
                expr: expr.clone(),
                reason: e.to_string(),
            })?;
        }

        let http_port = match lookup("LEADFLOW_HTTP_PORT") {
            Some(v) => parse_value("LEADFLOW_HTTP_PORT", &v)?,
            None => defaults.http_port,
        };

        let config = Self {
            silence_threshold,
            drip_delay,
            dnc_keywords,
            drip_template,
            drip_cron,
            http_port,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the timing windows are usable: the drip delay must be
    /// non-zero and neither window may exceed [`MAX_WINDOW`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drip_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "LEADFLOW_DRIP_DELAY_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        for (key, window) in [
            ("LEADFLOW_SILENCE_THRESHOLD_SECS", self.silence_threshold),
            ("LEADFLOW_DRIP_DELAY_SECS", self.drip_delay),
        ] {
            if window > MAX_WINDOW {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be at most {} seconds", MAX_WINDOW.as_secs()),
                });
            }
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
