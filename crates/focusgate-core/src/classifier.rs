//! Remote classification client and the fail-open policy.
//!
//! The remote service is asked about a target with
//! `POST {base_url}{endpoint}`; its verdict is resolved into a [`Decision`]
//! by [`resolve_remote`], the only place where remote failures are mapped.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::decision::{Decision, PauseMode};
use crate::error::ClassifierError;
use crate::storage::ClassifierConfig;
use crate::target::Target;

/// Request body for the attempt endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRequest {
    pub device_id: String,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Wall-clock epoch millis, as a string.
    pub ts: String,
}

impl AttemptRequest {
    pub fn new(device_id: &str, target: &Target, now_millis: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            event_id: Uuid::new_v4().to_string(),
            app: target.app_id.clone(),
            url: target.url.clone(),
            title: Some(target.canonical().to_string()),
            ts: now_millis.to_string(),
        }
    }
}

/// Response body. Only `decision` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResponse {
    pub decision: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub sse: Option<String>,
}

/// What the remote service said, before the fail-open policy applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteVerdict {
    Allow,
    Block,
    /// Any other decision string, e.g. "pending".
    Unknown(String),
}

impl RemoteVerdict {
    pub fn parse(decision: &str) -> Self {
        match decision.trim().to_lowercase().as_str() {
            "allow" => RemoteVerdict::Allow,
            "block" => RemoteVerdict::Block,
            _ => RemoteVerdict::Unknown(decision.to_string()),
        }
    }
}

impl From<&AttemptResponse> for RemoteVerdict {
    fn from(response: &AttemptResponse) -> Self {
        RemoteVerdict::parse(&response.decision)
    }
}

/// A service that classifies targets.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn classify(&self, target: &Target, now_millis: i64) -> Result<RemoteVerdict, ClassifierError>;
}

/// Map a classification outcome to a decision.
///
/// Failures never block: a hard pause reports as such, anything else is
/// "remote failed". Only a successful `block` verdict produces a Block, and
/// unrecognized verdicts allow.
pub fn resolve_remote(result: Result<RemoteVerdict, ClassifierError>, pause: PauseMode) -> Decision {
    match result {
        Ok(RemoteVerdict::Block) => Decision::block("remote block"),
        Ok(RemoteVerdict::Allow) => Decision::allow("remote allow"),
        Ok(RemoteVerdict::Unknown(other)) => {
            tracing::debug!(decision = %other, "unrecognized remote decision");
            Decision::allow("remote unknown -> allow")
        }
        Err(e) if pause == PauseMode::Hard => {
            tracing::warn!(error = %e, "remote classification failed during hard pause");
            Decision::allow("paused hard override")
        }
        Err(e) => {
            tracing::warn!(error = %e, "remote classification failed; failing open");
            Decision::allow("remote failed")
        }
    }
}

/// HTTP client for the attempt endpoint.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: Client,
    endpoint: Option<url::Url>,
    device_id: String,
    timeout: Duration,
}

impl HttpClassifier {
    /// Build a client from configuration. A disabled classifier is valid and
    /// answers every request with [`ClassifierError::Disabled`].
    ///
    /// # Errors
    /// Returns an error if the endpoint URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ClassifierConfig, device_id: impl Into<String>) -> Result<Self, ClassifierError> {
        let endpoint = if config.enabled {
            Some(url::Url::parse(&config.base_url)?.join(&config.endpoint)?)
        } else {
            None
        };
        let timeout = config.timeout();
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            device_id: device_id.into(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoint(&self) -> Option<&url::Url> {
        self.endpoint.as_ref()
    }

    fn map_transport(&self, err: reqwest::Error) -> ClassifierError {
        if err.is_timeout() {
            ClassifierError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ClassifierError::Network(err)
        }
    }
}

#[async_trait]
impl RemoteClassifier for HttpClassifier {
    async fn classify(&self, target: &Target, now_millis: i64) -> Result<RemoteVerdict, ClassifierError> {
        let endpoint = self.endpoint.as_ref().ok_or(ClassifierError::Disabled)?;
        let body = AttemptRequest::new(&self.device_id, target, now_millis);

        tracing::debug!(key = %target, event_id = %body.event_id, "classifying remotely");

        let resp = self
            .client
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_transport(e))?;
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: AttemptResponse =
            serde_json::from_str(&text).map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        Ok(RemoteVerdict::from(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parsing_is_case_insensitive() {
        assert_eq!(RemoteVerdict::parse("BLOCK"), RemoteVerdict::Block);
        assert_eq!(RemoteVerdict::parse(" allow "), RemoteVerdict::Allow);
        assert_eq!(
            RemoteVerdict::parse("pending"),
            RemoteVerdict::Unknown("pending".into())
        );
    }

    #[test]
    fn unknown_verdict_allows() {
        let d = resolve_remote(Ok(RemoteVerdict::Unknown("maybe".into())), PauseMode::Off);
        assert!(d.is_allow());
    }

    #[test]
    fn failure_is_fail_open_and_hard_pause_is_distinguishable() {
        let off = resolve_remote(Err(ClassifierError::Disabled), PauseMode::Off);
        let hard = resolve_remote(Err(ClassifierError::Timeout { timeout_ms: 10 }), PauseMode::Hard);
        assert_eq!(off, Decision::allow("remote failed"));
        assert_eq!(hard, Decision::allow("paused hard override"));
    }

    #[test]
    fn only_success_can_block() {
        assert!(resolve_remote(Ok(RemoteVerdict::Block), PauseMode::Hard).is_block());
        assert!(resolve_remote(
            Err(ClassifierError::Malformed("x".into())),
            PauseMode::Off
        )
        .is_allow());
    }

    #[test]
    fn request_carries_target_fields() {
        let target = Target::new(Some("com.android.chrome".into()), Some("https://news.site".into()));
        let req = AttemptRequest::new("focusgate-1", &target, 1_700_000_000_000);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["device_id"], "focusgate-1");
        assert_eq!(json["app"], "com.android.chrome");
        assert_eq!(json["url"], "https://news.site");
        assert_eq!(json["title"], "https://news.site");
        assert_eq!(json["ts"], "1700000000000");
        assert!(Uuid::parse_str(&req.event_id).is_ok());
    }

    #[test]
    fn absent_fields_are_omitted() {
        let req = AttemptRequest::new("d", &Target::app("com.game"), 0);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("url").is_none());
    }

    #[test]
    fn response_tolerates_missing_extras() {
        let resp: AttemptResponse = serde_json::from_str(r#"{"decision":"block"}"#).unwrap();
        assert_eq!(RemoteVerdict::from(&resp), RemoteVerdict::Block);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = ClassifierConfig {
            base_url: "http://localhost:9000".into(),
            ..ClassifierConfig::default()
        };
        let classifier = HttpClassifier::new(&config, "d").unwrap();
        assert_eq!(
            classifier.endpoint().map(|u| u.as_str()),
            Some("http://localhost:9000/api/device/attempt")
        );
    }

    #[tokio::test]
    async fn disabled_classifier_reports_disabled() {
        let config = ClassifierConfig {
            enabled: false,
            ..ClassifierConfig::default()
        };
        let classifier = HttpClassifier::new(&config, "d").unwrap();
        let err = classifier.classify(&Target::app("com.game"), 0).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Disabled));
    }
}
