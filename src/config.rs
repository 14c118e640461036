use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

pub const DEFAULT_API_URL: &str = "https://api.smash.gg/gql/alpha";
/// smash.gg's internal id for Smash Ultimate.
pub const ULTIMATE_VIDEOGAME_ID: u64 = 1386;

const APP_DIR: &str = "smash_meta";
const DB_FILE: &str = "matches.sqlite";
const DEFAULT_TOKEN_FILE: &str = "token.txt";
const DEFAULT_CHARACTER_FILE: &str = "character_to_id.csv";

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_calls: usize,
    pub period: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_calls: 60,
            period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Attempts after the first failure; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub token: Option<String>,
    pub token_file: PathBuf,
    pub videogame_id: u64,
    pub character_file: PathBuf,
    pub db_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub start_date: NaiveDate,
    pub tournaments_per_page: u32,
    pub sets_per_page: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            videogame_id: ULTIMATE_VIDEOGAME_ID,
            character_file: PathBuf::from(DEFAULT_CHARACTER_FILE),
            db_path: None,
            out_dir: PathBuf::from("."),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            start_date: default_start_date(),
            tournaments_per_page: 30,
            sets_per_page: 25,
        }
    }
}

impl Settings {
    /// Reads `.env.local`/`.env` (if present) and the process environment on top of the defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let defaults = Self::default();
        Self {
            api_url: env_string("SMASHGG_API_URL").unwrap_or(defaults.api_url),
            token: env_string("SMASHGG_TOKEN"),
            token_file: env_string("SMASHGG_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_file),
            videogame_id: env_parse("SMASHGG_VIDEOGAME_ID").unwrap_or(defaults.videogame_id),
            character_file: env_string("SMASH_META_CHARACTER_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.character_file),
            db_path: env_string("SMASH_META_DB").map(PathBuf::from),
            out_dir: env_string("SMASH_META_OUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.out_dir),
            rate_limit: RateLimitSettings {
                max_calls: env_parse::<usize>("SMASHGG_RATE_LIMIT_CALLS")
                    .unwrap_or(defaults.rate_limit.max_calls)
                    .max(1),
                period: Duration::from_secs(
                    env_parse::<u64>("SMASHGG_RATE_LIMIT_PERIOD_SECS")
                        .unwrap_or(defaults.rate_limit.period.as_secs())
                        .max(1),
                ),
            },
            retry: RetrySettings {
                max_retries: env_parse::<u32>("SMASHGG_MAX_RETRIES")
                    .unwrap_or(defaults.retry.max_retries)
                    .min(100),
                base_delay: Duration::from_millis(
                    env_parse::<u64>("SMASHGG_RETRY_BASE_MS")
                        .unwrap_or(defaults.retry.base_delay.as_millis() as u64)
                        .clamp(50, 120_000),
                ),
            },
            start_date: env_string("SMASH_META_START_DATE")
                .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())
                .unwrap_or(defaults.start_date),
            tournaments_per_page: env_parse::<u32>("SMASHGG_TOURNAMENTS_PER_PAGE")
                .unwrap_or(defaults.tournaments_per_page)
                .clamp(1, 100),
            sets_per_page: env_parse::<u32>("SMASHGG_SETS_PER_PAGE")
                .unwrap_or(defaults.sets_per_page)
                .clamp(1, 100),
        }
    }

    /// Token from the environment, else the first line of the token file.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.token.as_deref() {
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
        read_token(&self.token_file)
    }

    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        self.db_path
            .clone()
            .or_else(default_db_path)
            .context("unable to resolve sqlite path (set SMASH_META_DB or --db)")
    }

    pub fn out_path(&self, file_name: &str) -> PathBuf {
        self.out_dir.join(file_name)
    }
}

pub fn read_token(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read token file {}", path.display()))?;
    let token = raw.lines().next().unwrap_or_default().trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("token file {} is empty", path.display()));
    }
    Ok(token)
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(APP_DIR));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(APP_DIR))
}

pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(DB_FILE))
}

fn default_start_date() -> NaiveDate {
    // Ultimate released in December 2018; nothing earlier is worth paging through.
    NaiveDate::from_ymd_opt(2018, 12, 1).unwrap_or_default()
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|val| val.parse::<T>().ok())
}
