//! Client for the IHC attribution scoring service.
//!
//! The service takes a flat list of journey touch events and returns a
//! fractional credit ("ihc") per (conversion, session) pair. The `Scorer`
//! trait is the seam between the orchestrator and the transport, so tests
//! can drive the pipeline with an in-process fake instead of the network.
//!
//! Request contract:
//! `POST {base}/compute_ihc?conv_type_id={id}` with an `x-api-key` header
//! and body `{"customer_journeys": [...]}` plus an optional
//! `"redistribution_parameter"` object passed through untouched.

use crate::journey::ApiTouch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;

/// Default service endpoint.
pub const DEFAULT_API_URL: &str = "https://api.ihc-attribution.com/v1";

/// Default attempts per request (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Directional constraint for credit redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    EarlierSessionsOnly,
    AnySession,
    LaterSessionsOnly,
}

/// Redistribution policy for one journey role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributionRule {
    pub direction: Direction,
    pub receive_threshold: f64,
    pub redistribution_channel_labels: Vec<String>,
}

/// Optional service-side policy reallocating credit toward specified
/// channels. Forwarded to the service verbatim; never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributionParameter {
    pub initializer: RedistributionRule,
    pub holder: RedistributionRule,
    pub closer: RedistributionRule,
}

/// One scored (conversion, session) pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreRecord {
    pub conversion_id: String,
    pub session_id: String,
    pub ihc: f64,
}

/// Service response for one batch.
#[derive(Debug, Deserialize)]
pub struct ScoreResponse {
    #[serde(rename = "statusCode")]
    pub status_code: i64,
    /// Pairs the service rejected. A batch with partial failures still
    /// carries usable records in `value`.
    #[serde(rename = "partialFailureErrors", default)]
    pub partial_failure_errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub value: Vec<ScoreRecord>,
}

#[derive(Serialize)]
struct ComputeRequest<'a> {
    customer_journeys: &'a [ApiTouch],
    #[serde(skip_serializing_if = "Option::is_none")]
    redistribution_parameter: Option<&'a RedistributionParameter>,
}

/// Errors from the scoring client.
#[derive(Debug)]
pub enum ScoringError {
    /// No credential configured. Raised before any network attempt.
    MissingApiKey,
    /// Non-success HTTP status from the service.
    Api { status: u16, message: String },
    /// Transport failure or unparseable response body.
    Network(String),
}

impl ScoringError {
    /// Transport failures and server-side errors are worth another
    /// attempt; client-side rejections (4xx) are not.
    fn is_retryable(&self) -> bool {
        match self {
            ScoringError::Network(_) => true,
            ScoringError::Api { status, .. } => *status >= 500,
            ScoringError::MissingApiKey => false,
        }
    }
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringError::MissingApiKey => {
                write!(f, "scoring API key not configured (set IHC_API_KEY)")
            }
            ScoringError::Api { status, message } => {
                write!(f, "scoring service returned HTTP {status}: {message}")
            }
            ScoringError::Network(msg) => write!(f, "scoring request failed: {msg}"),
        }
    }
}

impl std::error::Error for ScoringError {}

/// Computes attribution scores for a formatted batch of journeys.
pub trait Scorer {
    fn compute(
        &self,
        touches: &[ApiTouch],
        conv_type_id: &str,
        redistribution: Option<&RedistributionParameter>,
    ) -> Result<ScoreResponse, ScoringError>;
}

/// HTTP client for the scoring service, with bounded per-request retry.
pub struct IhcClient {
    api_key: String,
    base_url: String,
    http: reqwest::blocking::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl IhcClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, ScoringError> {
        if api_key.trim().is_empty() {
            return Err(ScoringError::MissingApiKey);
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ScoringError::Network(e.to_string()))?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            max_attempts: max_attempts.max(1),
            retry_delay,
        })
    }

    fn send_once(
        &self,
        url: &str,
        request: &ComputeRequest<'_>,
    ) -> Result<ScoreResponse, ScoringError> {
        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .map_err(|e| ScoringError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ScoringError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<ScoreResponse>()
            .map_err(|e| ScoringError::Network(format!("invalid response body: {e}")))
    }
}

impl Scorer for IhcClient {
    fn compute(
        &self,
        touches: &[ApiTouch],
        conv_type_id: &str,
        redistribution: Option<&RedistributionParameter>,
    ) -> Result<ScoreResponse, ScoringError> {
        let url = format!("{}/compute_ihc?conv_type_id={conv_type_id}", self.base_url);
        let request = ComputeRequest {
            customer_journeys: touches,
            redistribution_parameter: redistribution,
        };

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.send_once(&url, &request) {
                Ok(response) => break response,
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "scoring request failed, retrying: {e}"
                    );
                    thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        };

        // Partial failures are non-fatal but must never go unnoticed.
        if !response.partial_failure_errors.is_empty() {
            tracing::warn!(
                rejected = response.partial_failure_errors.len(),
                scored = response.value.len(),
                "scoring service rejected some journey records"
            );
            for failure in &response.partial_failure_errors {
                tracing::warn!("partial failure: {failure}");
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_a_config_error() {
        let err = IhcClient::new("", DEFAULT_API_URL, 3, Duration::from_millis(1))
            .err()
            .expect("construction must fail");
        assert!(matches!(err, ScoringError::MissingApiKey));
        assert!(err.to_string().contains("IHC_API_KEY"));
    }

    #[test]
    fn response_parses_service_shape() {
        let body = r#"{
            "statusCode": 200,
            "partialFailureErrors": [{"conversion_id": "C9", "error": "unknown session"}],
            "value": [
                {"conversion_id": "C1", "session_id": "S1", "ihc": 0.3},
                {"conversion_id": "C1", "session_id": "S2", "ihc": 0.7}
            ]
        }"#;
        let response: ScoreResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.partial_failure_errors.len(), 1);
        assert_eq!(response.value.len(), 2);
        assert_eq!(response.value[1].session_id, "S2");
        assert!((response.value[1].ihc - 0.7).abs() < 1e-9);
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let response: ScoreResponse =
            serde_json::from_str(r#"{"statusCode": 200}"#).expect("parse");
        assert!(response.partial_failure_errors.is_empty());
        assert!(response.value.is_empty());
    }

    #[test]
    fn request_omits_absent_redistribution_parameter() {
        let request = ComputeRequest {
            customer_journeys: &[],
            redistribution_parameter: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        let obj = value.as_object().expect("object");
        assert!(obj.contains_key("customer_journeys"));
        assert!(!obj.contains_key("redistribution_parameter"));
    }

    #[test]
    fn redistribution_directions_use_service_spelling() {
        let rule = RedistributionRule {
            direction: Direction::EarlierSessionsOnly,
            receive_threshold: 0.1,
            redistribution_channel_labels: vec!["Email".into()],
        };
        let value = serde_json::to_value(&rule).expect("serialize");
        assert_eq!(value["direction"], "earlier_sessions_only");

        let parsed: Direction =
            serde_json::from_str(r#""later_sessions_only""#).expect("parse");
        assert_eq!(parsed, Direction::LaterSessionsOnly);
        let parsed: Direction = serde_json::from_str(r#""any_session""#).expect("parse");
        assert_eq!(parsed, Direction::AnySession);
    }

    #[test]
    fn retryable_classification() {
        assert!(ScoringError::Network("timeout".into()).is_retryable());
        assert!(ScoringError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ScoringError::Api {
            status: 401,
            message: String::new()
        }
        .is_retryable());
        assert!(!ScoringError::MissingApiKey.is_retryable());
    }
}
