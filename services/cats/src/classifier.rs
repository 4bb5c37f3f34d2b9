//! NSFW classification: the HTTP client for the external service and the
//! gate that applies the enabled/failure policy on top of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::cat::Verdict;
use crate::config::{FailurePolicy, NsfwConfig};

/// Errors talking to the classification service
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Failed to build classification client: {0}")]
    Client(String),

    #[error("Classification service unavailable: {0}")]
    Unavailable(String),

    #[error("Classification service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),
}

/// Request body sent to the classification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    #[serde(rename = "id")]
    pub subject_id: String,
    pub image: String,
}

/// Response body returned by the classification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResponse {
    #[serde(rename = "issfw", alias = "safe")]
    pub safe: bool,
}

/// Anything able to classify an image as safe or unsafe
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NsfwClassifier: Send + Sync {
    async fn classify(&self, subject_id: &str, image: &str) -> Result<Verdict, ClassificationError>;
}

/// HTTP client for the external NSFW classification service
#[derive(Clone)]
pub struct HttpNsfwClassifier {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpNsfwClassifier {
    /// Create a client posting to `endpoint` with the given request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClassificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassificationError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NsfwClassifier for HttpNsfwClassifier {
    async fn classify(&self, subject_id: &str, image: &str) -> Result<Verdict, ClassificationError> {
        let request = ClassificationRequest {
            subject_id: subject_id.to_string(),
            image: image.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassificationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ClassificationResponse = response
            .json()
            .await
            .map_err(|e| ClassificationError::InvalidResponse(e.to_string()))?;

        Ok(Verdict { safe: body.safe })
    }
}

/// Applies the administrative switch and failure policy around a classifier.
///
/// Never fails: a disabled gate reports safe without any network call, and a
/// classifier error resolves according to the configured [`FailurePolicy`].
#[derive(Clone)]
pub struct ClassificationGate {
    classifier: Option<Arc<dyn NsfwClassifier>>,
    failure_policy: FailurePolicy,
}

impl ClassificationGate {
    /// A gate that always reports safe
    pub fn disabled() -> Self {
        Self {
            classifier: None,
            failure_policy: FailurePolicy::FailOpen,
        }
    }

    /// A gate consulting `classifier` and resolving failures with `failure_policy`
    pub fn enabled(classifier: Arc<dyn NsfwClassifier>, failure_policy: FailurePolicy) -> Self {
        Self {
            classifier: Some(classifier),
            failure_policy,
        }
    }

    /// Build the gate described by configuration
    pub fn from_config(config: &NsfwConfig) -> Result<Self, ClassificationError> {
        match (config.enabled, config.url.as_deref()) {
            (true, Some(url)) => {
                let client = HttpNsfwClassifier::new(url, config.request_timeout())?;
                info!(endpoint = %url, policy = ?config.failure_policy, "NSFW classification enabled");
                Ok(Self::enabled(Arc::new(client), config.failure_policy))
            }
            (true, None) => Err(ClassificationError::Client(
                "nsfw.url is required when classification is enabled".to_string(),
            )),
            (false, _) => {
                info!("NSFW classification disabled");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.classifier.is_some()
    }

    /// Classify a persisted cat's image
    #[instrument(skip(self, image), fields(cat_id = %cat_id))]
    pub async fn classify(&self, cat_id: Uuid, image: &str) -> Verdict {
        let Some(classifier) = &self.classifier else {
            return Verdict::SAFE;
        };

        let started = Instant::now();
        let result = classifier.classify(&cat_id.to_string(), image).await;
        metrics::histogram!("cats.classification.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(verdict) => {
                if verdict.safe {
                    debug!("Classified safe");
                } else {
                    info!("Classified not safe for work");
                }
                verdict
            }
            Err(e) => {
                metrics::counter!("cats.classification.failures").increment(1);
                let verdict = match self.failure_policy {
                    FailurePolicy::FailOpen => Verdict::SAFE,
                    FailurePolicy::FailClosed => Verdict::UNSAFE,
                };
                warn!(
                    error = %e,
                    policy = ?self.failure_policy,
                    safe = verdict.safe,
                    "Classification failed, applying failure policy"
                );
                verdict
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_classifier(status: StatusCode, body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/api/nsfw",
            post(move |Json(request): Json<ClassificationRequest>| {
                let body = body.clone();
                async move {
                    assert!(!request.subject_id.is_empty());
                    (status, Json(body))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{addr}/api/nsfw")
    }

    fn client(endpoint: String) -> HttpNsfwClassifier {
        HttpNsfwClassifier::new(endpoint, Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_http_classifier_unsafe() {
        let endpoint = spawn_classifier(StatusCode::OK, json!({"issfw": false})).await;
        let verdict = client(endpoint).classify("abc", "img").await.unwrap();
        assert_eq!(verdict, Verdict::UNSAFE);
    }

    #[tokio::test]
    async fn test_http_classifier_accepts_safe_alias() {
        let endpoint = spawn_classifier(StatusCode::OK, json!({"safe": true})).await;
        let verdict = client(endpoint).classify("abc", "img").await.unwrap();
        assert_eq!(verdict, Verdict::SAFE);
    }

    #[tokio::test]
    async fn test_http_classifier_error_status() {
        let endpoint =
            spawn_classifier(StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "boom"})).await;
        let err = client(endpoint).classify("abc", "img").await.unwrap_err();
        assert!(matches!(err, ClassificationError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_http_classifier_unreachable() {
        // Bind and drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}/api/nsfw"))
            .classify("abc", "img")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassificationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_gate_is_safe() {
        let gate = ClassificationGate::disabled();
        assert!(!gate.is_enabled());
        assert_eq!(gate.classify(Uuid::new_v4(), "img").await, Verdict::SAFE);
    }

    #[tokio::test]
    async fn test_gate_passes_verdict_through() {
        let mut classifier = MockNsfwClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_, _| Ok(Verdict::UNSAFE));

        let gate = ClassificationGate::enabled(Arc::new(classifier), FailurePolicy::FailOpen);
        assert_eq!(gate.classify(Uuid::new_v4(), "img").await, Verdict::UNSAFE);
    }

    #[tokio::test]
    async fn test_gate_fails_open() {
        let mut classifier = MockNsfwClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Err(ClassificationError::Unavailable("down".to_string())));

        let gate = ClassificationGate::enabled(Arc::new(classifier), FailurePolicy::FailOpen);
        assert_eq!(gate.classify(Uuid::new_v4(), "img").await, Verdict::SAFE);
    }

    #[tokio::test]
    async fn test_gate_fails_closed() {
        let mut classifier = MockNsfwClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Err(ClassificationError::Unavailable("down".to_string())));

        let gate = ClassificationGate::enabled(Arc::new(classifier), FailurePolicy::FailClosed);
        assert_eq!(gate.classify(Uuid::new_v4(), "img").await, Verdict::UNSAFE);
    }

    #[tokio::test]
    async fn test_gate_sends_cat_id_as_subject() {
        let cat_id = Uuid::new_v4();
        let expected = cat_id.to_string();
        let mut classifier = MockNsfwClassifier::new();
        classifier
            .expect_classify()
            .withf(move |subject, image| subject.to_string() == expected && image.to_string() == "img")
            .returning(|_, _| Ok(Verdict::SAFE));

        let gate = ClassificationGate::enabled(Arc::new(classifier), FailurePolicy::FailOpen);
        assert_eq!(gate.classify(cat_id, "img").await, Verdict::SAFE);
    }
}
