use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_TIMEOUT_SECS: u64 = 180;
const USER_AGENT: &str = "smash_meta/0.1";

static CLIENT: OnceCell<Client> = OnceCell::new();
static DOWNLOAD_CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared client for API calls.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

/// Client with a long timeout for pulling whole dataset archives.
pub fn download_client() -> Result<&'static Client> {
    DOWNLOAD_CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .context("failed to build download client")
    })
}
