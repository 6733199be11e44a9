//! HTTP client for the Qwiz backend
//!
//! The backend owns session creation, question generation, persistence and
//! authoritative scoring. This module only speaks its JSON interface:
//! requests are validated with `garde` before they leave the client, and
//! failures are mapped onto [`Error`].

use garde::Validate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
    config::{ReleaseMode, SessionConfig},
    constants::session::{
        ACCEPTED_ANSWER_TIMES, ACCEPTED_TRANSCRIPTION_MINUTES, MAX_NAME_LENGTH,
        MAX_SELECTED_QUESTION_INDEX,
    },
    leaderboard::LeaderboardRow,
};

/// Errors talking to the backend
#[derive(Error, Debug)]
pub enum Error {
    /// The request could not be sent or the response could not be read
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with an unexpected status
    #[error("backend answered with status {0}")]
    Status(u16),
    /// The backend does not know the session
    #[error("session not found")]
    SessionNotFound,
    /// The request did not pass validation and was not sent
    #[error("invalid request: {0}")]
    Invalid(#[from] garde::Report),
    /// The base address cannot carry a path
    #[error("{0} cannot be used as a base address")]
    Base(String),
}

type ValidationResult = garde::Result;

fn validate_name(val: &str) -> ValidationResult {
    let length = val.trim().chars().count();
    if (1..=MAX_NAME_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "length is outside of the bounds [1,{MAX_NAME_LENGTH}]"
        )))
    }
}

fn validate_answer_time(val: u64) -> ValidationResult {
    if ACCEPTED_ANSWER_TIMES.contains(&val) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{val} is not one of {ACCEPTED_ANSWER_TIMES:?}"
        )))
    }
}

fn validate_transcription_minutes(val: f64) -> ValidationResult {
    if ACCEPTED_TRANSCRIPTION_MINUTES
        .iter()
        .any(|accepted| (accepted - val).abs() < f64::EPSILON)
    {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{val} is not one of {ACCEPTED_TRANSCRIPTION_MINUTES:?}"
        )))
    }
}

/// Request creating a new session
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct StartSession {
    /// Name shown to the students
    #[garde(custom(|v: &String, _: &()| validate_name(v)))]
    pub lecturer_name: String,
    /// Course the session belongs to
    #[garde(custom(|v: &String, _: &()| validate_name(v)))]
    pub course_name: String,
    /// Seconds each round accepts answers
    #[garde(custom(|v: &u64, _: &()| validate_answer_time(*v)))]
    pub answer_time_seconds: u64,
    /// Minutes between transcript flushes
    #[garde(custom(|v: &f64, _: &()| validate_transcription_minutes(*v)))]
    pub transcription_interval_minutes: f64,
    /// How generated questions reach students
    #[garde(skip)]
    pub question_release_mode: ReleaseMode,
}

impl StartSession {
    /// Creates a request with the backend's default timings
    pub fn new(lecturer_name: impl Into<String>, course_name: impl Into<String>) -> Self {
        Self {
            lecturer_name: lecturer_name.into(),
            course_name: course_name.into(),
            answer_time_seconds: 30,
            transcription_interval_minutes: 5.0,
            question_release_mode: ReleaseMode::Active,
        }
    }
}

/// Answer to [`StartSession`]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    /// Code of the new session
    pub session_id: String,
    /// Echo of the lecturer name
    pub lecturer_name: String,
    /// Echo of the course name
    pub course_name: String,
    /// Seconds each round accepts answers
    pub answer_time: Option<u64>,
    /// Seconds between transcript flushes
    pub transcription_interval: Option<u64>,
}

/// Request picking one of the suggested questions of a transcript chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct QuestionSelection {
    /// Session the chunk belongs to
    #[garde(length(min = 1))]
    pub session_id: String,
    /// Position of the picked suggestion
    #[garde(range(max = MAX_SELECTED_QUESTION_INDEX))]
    pub selected_question_index: usize,
    /// Transcript chunk the suggestions were generated from
    #[garde(length(min = 1))]
    pub chunk_id: String,
}

/// Answer to [`QuestionSelection`]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionAck {
    /// Status reported by the backend
    pub status: String,
    /// Human readable message
    pub message: Option<String>,
    /// Index that was released
    pub selected_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StudentScore {
    student_id: String,
    student_name: Option<String>,
    score: u64,
}

impl StudentScore {
    fn into_row(self) -> LeaderboardRow {
        let name = self
            .student_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_student_name(&self.student_id));
        LeaderboardRow::new(name, self.score)
    }
}

#[derive(Debug, Deserialize)]
struct Standings {
    students: Vec<StudentScore>,
}

#[derive(Debug, Deserialize)]
struct LeaderboardBody {
    leaderboard: Standings,
}

/// Name shown for a student that did not give one
///
/// # Arguments
///
/// * `student_id` - Identifier assigned by the backend
///
/// # Returns
///
/// `Student` followed by the last four characters of the identifier
pub fn default_student_name(student_id: &str) -> String {
    let chars = student_id.chars().collect::<Vec<_>>();
    let tail = chars[chars.len().saturating_sub(4)..]
        .iter()
        .collect::<String>();
    format!("Student {tail}")
}

/// Client for the backend's HTTP interface
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base: Url,
}

impl BackendClient {
    /// Creates a client for the backend at `base`
    ///
    /// # Errors
    ///
    /// `Error::Base` when `base` cannot carry a path (e.g. `mailto:`)
    pub fn new(base: Url) -> Result<Self, Error> {
        if base.cannot_be_a_base() {
            return Err(Error::Base(base.into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// The address requests are sent to
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionNotFound);
        }
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Checks that the backend is up
    ///
    /// # Errors
    ///
    /// `Error::Http` or `Error::Status` when the backend does not answer
    /// successfully
    pub async fn health(&self) -> Result<(), Error> {
        let response = self.http.get(self.url(&[])).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Status(response.status().as_u16()))
        }
    }

    /// Creates a new session
    ///
    /// # Errors
    ///
    /// `Error::Invalid` when the request fails validation (nothing is sent),
    /// otherwise any transport or status error
    pub async fn start_session(&self, request: &StartSession) -> Result<SessionStarted, Error> {
        request.validate()?;

        let response = self
            .http
            .post(self.url(&["start-session"]))
            .json(request)
            .send()
            .await?;
        let started: SessionStarted = Self::read(response).await?;

        info!(code = %started.session_id, "session started");
        Ok(started)
    }

    /// Fetches the configuration of a session
    ///
    /// # Errors
    ///
    /// `Error::SessionNotFound` on 404, otherwise any transport or status
    /// error
    pub async fn session_config(&self, code: &str) -> Result<SessionConfig, Error> {
        let response = self
            .http
            .get(self.url(&["sessions", code, "config"]))
            .send()
            .await?;
        Self::read(response).await
    }

    /// Fetches the configuration of a session, falling back to the defaults
    ///
    /// Never fails: any error is logged and replaced by
    /// [`SessionConfig::default`].
    pub async fn session_config_or_default(&self, code: &str) -> SessionConfig {
        match self.session_config(code).await {
            Ok(config) => config,
            Err(error) => {
                warn!(%code, %error, "session config unavailable, using defaults");
                SessionConfig::default()
            }
        }
    }

    /// Fetches the backend's leaderboard of a session
    ///
    /// # Errors
    ///
    /// `Error::SessionNotFound` on 404, otherwise any transport or status
    /// error
    pub async fn leaderboard(&self, code: &str) -> Result<Vec<LeaderboardRow>, Error> {
        let response = self
            .http
            .get(self.url(&["sessions", code, "leaderboard"]))
            .send()
            .await?;
        let body: LeaderboardBody = Self::read(response).await?;

        Ok(body
            .leaderboard
            .students
            .into_iter()
            .map(StudentScore::into_row)
            .collect())
    }

    /// Releases one of the suggested questions of a transcript chunk
    ///
    /// # Errors
    ///
    /// `Error::Invalid` when the index is out of range (nothing is sent),
    /// otherwise any transport or status error
    pub async fn select_question(
        &self,
        selection: &QuestionSelection,
    ) -> Result<SelectionAck, Error> {
        selection.validate()?;

        let response = self
            .http
            .post(self.url(&["select-question"]))
            .json(selection)
            .send()
            .await?;
        Self::read(response).await
    }

    /// Ends a session on the backend
    ///
    /// # Returns
    ///
    /// The final results as reported by the backend
    ///
    /// # Errors
    ///
    /// `Error::SessionNotFound` on 404, otherwise any transport or status
    /// error
    pub async fn end_session(&self, code: &str) -> Result<serde_json::Value, Error> {
        let response = self
            .http
            .post(self.url(&["sessions", code, "end"]))
            .send()
            .await?;
        let mut body: serde_json::Value = Self::read(response).await?;

        info!(%code, "session ended on the backend");
        Ok(body
            .get_mut("results")
            .map(serde_json::Value::take)
            .unwrap_or(body))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;

    /// Serves a single canned response and returns the raw request
    async fn serve_once(status: &'static str, body: String) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];

            loop {
                let read = stream.read(&mut buffer).await.unwrap();
                request.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || read == 0 {
                        break;
                    }
                } else if read == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (Url::parse(&format!("http://{address}")).unwrap(), task)
    }

    #[test]
    fn test_start_session_validation() {
        assert!(StartSession::new("Dr. Rivera", "Cloud 101").validate().is_ok());

        let mut request = StartSession::new("Dr. Rivera", "Cloud 101");
        request.answer_time_seconds = 25;
        assert!(request.validate().is_err());

        let mut request = StartSession::new("   ", "Cloud 101");
        assert!(request.validate().is_err());

        request.lecturer_name = "Kim".to_owned();
        request.transcription_interval_minutes = 0.33;
        assert!(request.validate().is_ok());

        request.transcription_interval_minutes = 6.0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_selection_index_bounds() {
        let mut selection = QuestionSelection {
            session_id: "ABC123".to_owned(),
            selected_question_index: 2,
            chunk_id: "chunk-1".to_owned(),
        };
        assert!(selection.validate().is_ok());

        selection.selected_question_index = 3;
        assert!(selection.validate().is_err());
    }

    #[test]
    fn test_default_student_name() {
        assert_eq!(default_student_name("stu_9f3a1b7c"), "Student 1b7c");
        assert_eq!(default_student_name("ab"), "Student ab");
    }

    #[test]
    fn test_rejects_opaque_base() {
        let base = Url::parse("mailto:lecturer@example.com").unwrap();
        assert!(matches!(BackendClient::new(base), Err(Error::Base(_))));
    }

    #[test]
    fn test_url_keeps_base_path_and_escapes_code() {
        let client =
            BackendClient::new(Url::parse("https://qwiz.example/api/?debug=1").unwrap()).unwrap();

        assert_eq!(
            client.url(&["sessions", "AB/12", "config"]).as_str(),
            "https://qwiz.example/api/sessions/AB%2F12/config"
        );
    }

    #[tokio::test]
    async fn test_session_config() {
        let (base, server) = serve_once(
            "200 OK",
            serde_json::json!({
                "sessionId": "ABC123",
                "transcriptionIntervalSeconds": 300,
                "answerTimeSeconds": 60,
                "questionReleaseMode": "active",
                "lecturerName": "Dr. Rivera",
                "courseName": "Cloud 101",
            })
            .to_string(),
        )
        .await;
        let client = BackendClient::new(base).unwrap();

        let config = client.session_config("ABC123").await.unwrap();
        assert_eq!(config.round_ms(), 60_000);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /sessions/ABC123/config "));
    }

    #[tokio::test]
    async fn test_session_not_found() {
        let (base, _server) =
            serve_once("404 Not Found", r#"{"detail":"Session not found"}"#.to_owned()).await;
        let client = BackendClient::new(base).unwrap();

        assert!(matches!(
            client.session_config("NOPE").await,
            Err(Error::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_session_config_falls_back() {
        let (base, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"detail":"Error retrieving session configuration"}"#.to_owned(),
        )
        .await;
        let client = BackendClient::new(base).unwrap();

        assert_eq!(
            client.session_config_or_default("ABC123").await,
            SessionConfig::default()
        );
    }

    #[tokio::test]
    async fn test_leaderboard_rows() {
        let (base, _server) = serve_once(
            "200 OK",
            serde_json::json!({
                "leaderboard": {
                    "session_id": "ABC123",
                    "students": [
                        {"student_id": "s-1", "student_name": "Ava", "score": 1000,
                         "correct_answers": 1, "total_answers": 1},
                        {"student_id": "stu_0042", "score": 600,
                         "correct_answers": 1, "total_answers": 2},
                    ],
                    "timestamp": "2026-01-01T00:00:00",
                }
            })
            .to_string(),
        )
        .await;
        let client = BackendClient::new(base).unwrap();

        assert_eq!(
            client.leaderboard("ABC123").await.unwrap(),
            vec![
                LeaderboardRow::new("Ava", 1000),
                LeaderboardRow::new("Student 0042", 600),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_session_posts_json() {
        let (base, server) = serve_once(
            "201 Created",
            serde_json::json!({
                "sessionId": "K7Q2ZD",
                "lecturerName": "Dr. Rivera",
                "courseName": "Cloud 101",
                "answerTime": 30,
                "transcriptionInterval": 300,
            })
            .to_string(),
        )
        .await;
        let client = BackendClient::new(base).unwrap();

        let started = client
            .start_session(&StartSession::new("Dr. Rivera", "Cloud 101"))
            .await
            .unwrap();
        assert_eq!(started.session_id, "K7Q2ZD");
        assert_eq!(started.answer_time, Some(30));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /start-session "));
        assert!(request.contains(r#""question_release_mode":"active""#));
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_sent() {
        // Nothing listens here; validation fails before any connection.
        let client = BackendClient::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        let selection = QuestionSelection {
            session_id: "ABC123".to_owned(),
            selected_question_index: 5,
            chunk_id: "chunk-1".to_owned(),
        };

        assert!(matches!(
            client.select_question(&selection).await,
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_end_session_unwraps_results() {
        let (base, server) = serve_once(
            "200 OK",
            serde_json::json!({"results": {"session_id": "ABC123", "total_questions": 3}})
                .to_string(),
        )
        .await;
        let client = BackendClient::new(base).unwrap();

        let results = client.end_session("ABC123").await.unwrap();
        assert_eq!(results["total_questions"], 3);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /sessions/ABC123/end "));
    }
}
