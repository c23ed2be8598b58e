use anyhow::Context;
use chrono::FixedOffset;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::DEFAULT_CHUNK_SIZE;
use crate::scrapers::UserAgentPool;

pub struct Config {
    /// No URL means an in-memory store
    pub database_url: Option<String>,
    pub chunk_size: usize,
    pub user_agents: UserAgentPool,
    pub browser_enabled: bool,
    pub browser_settle: Duration,
    pub http_timeout: Duration,
    pub site_offset: FixedOffset,
}

impl Config {
    /// Read settings from the environment (and `.env`, if present)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let offset_minutes: i32 = var_or("SITE_UTC_OFFSET_MINUTES", 60)?;
        let site_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("SITE_UTC_OFFSET_MINUTES out of range: {offset_minutes}"))?;

        let user_agents = match env::var("USER_AGENTS") {
            Ok(list) => UserAgentPool::new(list.split('|').map(str::trim)),
            Err(_) => UserAgentPool::default(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            chunk_size: var_or("INGEST_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            user_agents,
            browser_enabled: var_or("BROWSER_ENABLED", true)?,
            browser_settle: Duration::from_millis(var_or("BROWSER_SETTLE_MS", 4000)?),
            http_timeout: Duration::from_secs(var_or("HTTP_TIMEOUT_SECS", 30)?),
            site_offset,
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_use_defaults() {
        let timeout: u64 = var_or("MOBILE_SCOUT_TEST_UNSET_VARIABLE", 30).unwrap();
        assert_eq!(timeout, 30);
    }

    #[test]
    fn bad_values_are_reported() {
        env::set_var("MOBILE_SCOUT_TEST_BAD_CHUNK", "lots");
        let err = var_or::<usize>("MOBILE_SCOUT_TEST_BAD_CHUNK", 1).unwrap_err();
        assert!(err.to_string().contains("MOBILE_SCOUT_TEST_BAD_CHUNK"));
    }
}
