use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;

use crate::core::state::HttpSettings;

pub const APP_USER_AGENT: &str = "Xenolauncher-Modules/0.1.0";

/// Shared client for registry listings, raw fetches and dependency downloads.
pub fn build_http_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json, */*"),
    );

    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(30));
    if settings.timeout_secs > 0 {
        builder = builder.read_timeout(Duration::from_secs(settings.timeout_secs));
    }
    builder.build()
}
