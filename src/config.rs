//! Client and session configuration
//!
//! [`ClientConfig`] says where the backend lives. It is read from the
//! environment, after loading a `.env` file when one exists. [`SessionConfig`]
//! is the per-session configuration served by the backend; its `Default` is
//! the fallback used when it cannot be fetched.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::constants::session::{
    FALLBACK_ANSWER_TIME_SECONDS, FALLBACK_TRANSCRIPTION_INTERVAL_SECONDS,
};

/// Backend address used when `QWIZ_API_BASE` is not set
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Errors reading the client configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A variable holds something that is not a URL
    #[error("{key} is not a valid url: {source}")]
    InvalidUrl {
        /// Name of the variable
        key: &'static str,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },
}

/// Where the backend lives and how much to log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base of the HTTP API (`QWIZ_API_BASE`)
    pub api_base: Url,
    /// Base of the socket endpoints (`QWIZ_WS_BASE`, defaults to the API base)
    pub ws_base: Url,
    /// Log filter directive (`RUST_LOG`)
    pub rust_log: String,
}

impl ClientConfig {
    /// Reads the configuration from the process environment
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` when a base address does not parse
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` when a base address does not parse
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let parse = |key: &'static str, value: &str| {
            Url::parse(value).map_err(|source| Error::InvalidUrl { key, source })
        };

        let api_base = parse(
            "QWIZ_API_BASE",
            &lookup("QWIZ_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_owned()),
        )?;
        let ws_base = match lookup("QWIZ_WS_BASE") {
            Some(value) => parse("QWIZ_WS_BASE", &value)?,
            None => api_base.clone(),
        };
        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned());

        Ok(Self {
            api_base,
            ws_base,
            rust_log,
        })
    }
}

/// How generated questions reach the students
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseMode {
    /// The lecturer picks one of the suggestions
    #[default]
    Active,
    /// The backend releases the first suggestion by itself
    Passive,
}

/// Per-session configuration served by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Seconds a round accepts answers
    #[serde(default = "fallback_answer_time")]
    pub answer_time_seconds: u64,
    /// Seconds between transcript flushes
    #[serde(default = "fallback_transcription_interval")]
    pub transcription_interval_seconds: u64,
    /// Release mode of generated questions
    #[serde(default)]
    pub question_release_mode: ReleaseMode,
    /// Name of the lecturer
    #[serde(default)]
    pub lecturer_name: String,
    /// Name of the course
    #[serde(default)]
    pub course_name: String,
}

fn fallback_answer_time() -> u64 {
    FALLBACK_ANSWER_TIME_SECONDS
}

fn fallback_transcription_interval() -> u64 {
    FALLBACK_TRANSCRIPTION_INTERVAL_SECONDS
}

impl Default for SessionConfig {
    /// The fallback used when the configuration cannot be fetched
    fn default() -> Self {
        Self {
            answer_time_seconds: FALLBACK_ANSWER_TIME_SECONDS,
            transcription_interval_seconds: FALLBACK_TRANSCRIPTION_INTERVAL_SECONDS,
            question_release_mode: ReleaseMode::Active,
            lecturer_name: String::new(),
            course_name: String::new(),
        }
    }
}

impl SessionConfig {
    /// Round duration in milliseconds
    pub fn round_ms(&self) -> u64 {
        self.answer_time_seconds * 1_000
    }

    /// Interval between transcript flushes
    pub fn transcription_interval(&self) -> Duration {
        Duration::from_secs(self.transcription_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.api_base.as_str(), "http://localhost:8080/");
        assert_eq!(config.ws_base, config.api_base);
        assert_eq!(config.rust_log, "info");
    }

    #[test]
    fn test_separate_socket_base() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("QWIZ_API_BASE", "https://api.qwiz.example"),
            ("QWIZ_WS_BASE", "wss://live.qwiz.example"),
            ("RUST_LOG", "qwiz=debug"),
        ]))
        .unwrap();

        assert_eq!(config.api_base.host_str(), Some("api.qwiz.example"));
        assert_eq!(config.ws_base.scheme(), "wss");
        assert_eq!(config.rust_log, "qwiz=debug");
    }

    #[test]
    fn test_invalid_url() {
        let error = ClientConfig::from_lookup(lookup(&[("QWIZ_WS_BASE", "not a url")]))
            .unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidUrl {
                key: "QWIZ_WS_BASE",
                ..
            }
        ));
    }

    #[test]
    fn test_session_config_fallback() {
        let config = SessionConfig::default();

        assert_eq!(config.round_ms(), 30_000);
        assert_eq!(config.transcription_interval(), Duration::from_secs(300));
        assert_eq!(config.question_release_mode, ReleaseMode::Active);
    }

    #[test]
    fn test_session_config_wire_shape() {
        let config: SessionConfig = serde_json::from_value(serde_json::json!({
            "sessionId": "ABC123",
            "transcriptionIntervalSeconds": 420,
            "answerTimeSeconds": 45,
            "questionReleaseMode": "passive",
            "lecturerName": "Dr. Rivera",
            "courseName": "Cloud 101",
        }))
        .unwrap();

        assert_eq!(config.round_ms(), 45_000);
        assert_eq!(config.transcription_interval_seconds, 420);
        assert_eq!(config.question_release_mode, ReleaseMode::Passive);
        assert_eq!(config.course_name, "Cloud 101");
    }

    #[test]
    fn test_session_config_missing_fields_fall_back() {
        let config: SessionConfig =
            serde_json::from_value(serde_json::json!({"lecturerName": "Kim"})).unwrap();

        assert_eq!(config.answer_time_seconds, 30);
        assert_eq!(config.transcription_interval_seconds, 300);
    }
}
