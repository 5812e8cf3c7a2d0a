use crate::error::ConfigError;
use chrono_tz::Tz;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_PROXY_PROBABILITY: f64 = 0.5;

/// Runtime settings for both pipelines, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub cron_check_url: Option<String>,
    pub proxy_urls: Vec<String>,
    pub proxy_probability: f64,
    pub region_ids: Vec<i64>,
    pub external_api: Option<String>,
    pub cps_credentials: Option<CpsCredentials>,
    pub http_timeout: Duration,
    pub batch_size: usize,
    pub max_concurrency: Option<usize>,
    pub default_timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct CpsCredentials {
    pub username: String,
    pub password: String,
}

impl Config {
    /// Load settings from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let supabase_url = get("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_service_key = get("SUPABASE_SERVICE_ROLE_KEY")
            .ok_or(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?;

        let proxy_urls = get("PROXY_URLS")
            .map(|v| split_list(&v).map(str::to_string).collect())
            .unwrap_or_default();

        let proxy_probability = match get("PROXY_PROBABILITY") {
            Some(v) => {
                let p: f64 = v.parse().map_err(|_| ConfigError::Invalid {
                    key: "PROXY_PROBABILITY",
                    message: format!("'{v}' is not a number"),
                })?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::Invalid {
                        key: "PROXY_PROBABILITY",
                        message: format!("{p} is outside 0.0..=1.0"),
                    });
                }
                p
            }
            None => DEFAULT_PROXY_PROBABILITY,
        };

        let region_ids = match get("REGION_IDS") {
            Some(v) => split_list(&v)
                .map(|id| {
                    id.parse::<i64>().map_err(|_| ConfigError::Invalid {
                        key: "REGION_IDS",
                        message: format!("'{id}' is not an integer"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let cps_credentials = match (get("CPS_USERNAME"), get("CPS_PASSWORD")) {
            (Some(username), Some(password)) => Some(CpsCredentials { username, password }),
            _ => None,
        };

        let http_timeout = Duration::from_secs(parse_or(
            get("HTTP_TIMEOUT_SECONDS"),
            "HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);

        let batch_size = parse_or(get("UPSERT_BATCH_SIZE"), "UPSERT_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "UPSERT_BATCH_SIZE",
                message: "must be at least 1".to_string(),
            });
        }

        let max_concurrency = match get("MAX_CONCURRENCY") {
            Some(v) => Some(parse_or(Some(v), "MAX_CONCURRENCY", 0usize)?).filter(|n| *n > 0),
            None => None,
        };

        let default_timezone = match get("DEFAULT_TIMEZONE") {
            Some(v) => v.parse::<Tz>().map_err(|_| ConfigError::Invalid {
                key: "DEFAULT_TIMEZONE",
                message: format!("unknown timezone '{v}'"),
            })?,
            None => chrono_tz::America::Vancouver,
        };

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_service_key,
            cron_check_url: get("CRON_CHECK_URL"),
            proxy_urls,
            proxy_probability,
            region_ids,
            external_api: get("EXTERNAL_API"),
            cps_credentials,
            http_timeout,
            batch_size,
            max_concurrency,
            default_timezone,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key,
            message: format!("'{v}' is not a valid number"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("SUPABASE_URL", "https://db.example.com/"),
        ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.supabase_url, "https://db.example.com");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.proxy_probability, 0.5);
        assert!(config.proxy_urls.is_empty());
        assert!(config.max_concurrency.is_none());
        assert!(config.cps_credentials.is_none());
        assert_eq!(config.default_timezone, chrono_tz::America::Vancouver);
    }

    #[test]
    fn test_missing_required_key() {
        let err = Config::from_lookup(lookup(&[("SUPABASE_URL", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")));
    }

    #[test]
    fn test_lists_and_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PROXY_URLS", "http://a:1, http://b:2,,"),
            ("REGION_IDS", "1,3"),
            ("MAX_CONCURRENCY", "10"),
            ("UPSERT_BATCH_SIZE", "25"),
            ("DEFAULT_TIMEZONE", "America/Toronto"),
            ("CPS_USERNAME", "user"),
            ("CPS_PASSWORD", "pass"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.proxy_urls, vec!["http://a:1", "http://b:2"]);
        assert_eq!(config.region_ids, vec![1, 3]);
        assert_eq!(config.max_concurrency, Some(10));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.default_timezone, chrono_tz::America::Toronto);
        assert_eq!(config.cps_credentials.unwrap().username, "user");
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PROXY_PROBABILITY", "1.5"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("UPSERT_BATCH_SIZE", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("REGION_IDS", "1,north"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
