//! Shared state injected into every relay handler.

use std::time::Duration;

use crate::core::config::Config;
use crate::utils::url::construct_api_url;

pub const GENERATE_ANSWER_ENDPOINT: &str = "generate-answer";

#[derive(Debug, Clone)]
pub struct RelayState {
    pub client: reqwest::Client,
    /// Full URL of the upstream `generate-answer` route.
    pub generate_url: String,
    /// Bound on waiting for upstream headers and for each body chunk.
    pub idle_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl RelayState {
    pub fn new(client: reqwest::Client, upstream_url: &str, idle_timeout: Duration) -> Self {
        Self {
            client,
            generate_url: construct_api_url(upstream_url, GENERATE_ANSWER_ENDPOINT),
            idle_timeout,
            cors_origins: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let mut state = Self::new(client, &config.upstream_url, config.idle_timeout());
        state.cors_origins = config.cors_origins.clone();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_route_is_joined_onto_base() {
        let config = Config {
            upstream_url: "http://llm.internal:8000/".into(),
            cors_origins: vec!["http://localhost:4200".into()],
            ..Default::default()
        };
        let state = RelayState::from_config(&config).expect("state");
        assert_eq!(state.generate_url, "http://llm.internal:8000/generate-answer");
        assert_eq!(state.idle_timeout, Duration::from_secs(60));
        assert_eq!(state.cors_origins, vec!["http://localhost:4200"]);
    }
}
