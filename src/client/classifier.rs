//! HTTP client for a remote text-classification server.
//!
//! Speaks the `POST /predict` contract of text-embeddings-inference style
//! servers: a batch of inputs in, one list of `{label, score}` per input out.
//! - Network errors, timeouts, 429 and 5xx responses are retried with backoff
//! - Other 4xx responses fail immediately

use crate::models::{CallscoreError, ClassifierConfig, Result, MAX_RETRIES};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Prediction request payload.
#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

/// One class score from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Server response: one list per input, or a bare list for a single input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Batch(Vec<Vec<LabelScore>>),
    Single(Vec<LabelScore>),
}

/// Classifier server error body.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
}

/// Response from a prediction request.
#[derive(Debug, Clone)]
pub struct PredictResult {
    /// Class scores per input, in input order
    pub scores: Vec<Vec<LabelScore>>,
    /// Request duration including retries
    pub duration: Duration,
}

/// Classifier API client.
pub struct ClassifierClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    max_retries: u32,
    /// First retry delay; doubles per attempt
    backoff_base: Duration,
}

impl ClassifierClient {
    /// Create a client from the `[classifier]` config section.
    pub fn new(config: &ClassifierConfig, api_key: Option<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CallscoreError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout,
            max_retries: config.max_retries.clamp(1, MAX_RETRIES),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build headers for a request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| {
                    CallscoreError::InvalidInput("API key is not a valid header value".into())
                })?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Ok(model) = HeaderValue::from_str(&self.model) {
            headers.insert("x-model-id", model);
        }
        Ok(headers)
    }

    /// Classify a batch of texts.
    pub async fn predict(&self, inputs: &[String]) -> Result<PredictResult> {
        let start = Instant::now();
        let url = format!("{}/predict", self.base_url);
        let request = PredictRequest {
            inputs,
            truncate: true,
        };
        let headers = self.headers()?;
        let mut last_error: Option<CallscoreError> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.backoff_base, attempt);
                debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying classifier request"
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        CallscoreError::Timeout(self.timeout)
                    } else {
                        CallscoreError::Network(e)
                    });
                    continue;
                }
            };

            let status = response.status();

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&body)
                    .map(|e| e.error)
                    .unwrap_or(body);
                let error = CallscoreError::scorer(
                    "classifier",
                    format!("HTTP {}: {}", status.as_u16(), message),
                );

                // Client errors won't improve on retry
                if status.is_client_error() && status.as_u16() != 429 {
                    return Err(error);
                }
                last_error = Some(error);
                continue;
            }

            let body: PredictResponse = response
                .json()
                .await
                .map_err(|e| {
                    CallscoreError::scorer("classifier", format!("invalid response: {e}"))
                })?;

            let scores = match body {
                PredictResponse::Batch(scores) => scores,
                PredictResponse::Single(scores) if inputs.len() == 1 => vec![scores],
                PredictResponse::Single(_) => {
                    return Err(CallscoreError::scorer(
                        "classifier",
                        format!("expected {} score lists, got one", inputs.len()),
                    ))
                }
            };

            debug!(
                inputs = inputs.len(),
                attempt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Classifier batch complete"
            );

            return Ok(PredictResult {
                scores,
                duration: start.elapsed(),
            });
        }

        // All retries exhausted
        let last = last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string());
        Err(CallscoreError::scorer(
            "classifier",
            format!("request failed after {} attempts: {last}", self.max_retries),
        ))
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 server replaying canned responses, one per connection.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub struct Canned {
        pub status: u16,
        pub body: String,
    }

    /// Serve `responses` in order; returns base URL and a request counter.
    pub async fn serve(responses: Vec<Canned>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for canned in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut stream).await;
                counter.fetch_add(1, Ordering::SeqCst);

                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{}",
                    canned.status,
                    canned.body.len(),
                    canned.body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::{serve, Canned};
    use super::*;
    use std::sync::atomic::Ordering;

    fn client(base_url: String, max_retries: u32) -> ClassifierClient {
        let config = ClassifierConfig {
            base_url,
            max_retries,
            timeout_secs: 5,
            ..Default::default()
        };
        ClassifierClient::new(&config, Some("secret".into()))
            .unwrap()
            .with_backoff_base(Duration::from_millis(1))
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 64), base * u32::MAX);
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn retry_count_is_clamped() {
        let config = ClassifierConfig {
            max_retries: 1000,
            ..Default::default()
        };
        let client = ClassifierClient::new(&config, None).unwrap();
        assert_eq!(client.max_retries, MAX_RETRIES);
    }

    #[tokio::test]
    async fn parses_batch_response() {
        let (url, hits) = serve(vec![Canned {
            status: 200,
            body: r#"[[{"label":"positive","score":0.9},{"label":"neutral","score":0.1}],
                      [{"label":"negative","score":0.7}]]"#
                .into(),
        }])
        .await;

        let result = client(url, 3).predict(&texts(2)).await.unwrap();
        assert_eq!(result.scores.len(), 2);
        assert_eq!(result.scores[1][0].label, "negative");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let (url, hits) = serve(vec![
            Canned {
                status: 503,
                body: r#"{"error":"model loading"}"#.into(),
            },
            Canned {
                status: 200,
                body: r#"[{"label":"neutral","score":0.8}]"#.into(),
            },
        ])
        .await;

        let result = client(url, 3).predict(&texts(1)).await.unwrap();
        assert_eq!(result.scores, vec![vec![LabelScore { label: "neutral".into(), score: 0.8 }]]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve(vec![
            Canned {
                status: 413,
                body: r#"{"error":"batch too large"}"#.into(),
            },
            Canned {
                status: 200,
                body: "[]".into(),
            },
        ])
        .await;

        let err = client(url, 3).predict(&texts(1)).await.unwrap_err();
        assert!(matches!(err, CallscoreError::ScorerFailure { .. }));
        assert!(err.to_string().contains("batch too large"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_are_scorer_failures() {
        let (url, hits) = serve(vec![
            Canned {
                status: 500,
                body: "boom".into(),
            },
            Canned {
                status: 500,
                body: "boom".into(),
            },
        ])
        .await;

        let err = client(url, 2).predict(&texts(1)).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_list_for_many_inputs_is_rejected() {
        let (url, _) = serve(vec![Canned {
            status: 200,
            body: r#"[{"label":"neutral","score":0.8}]"#.into(),
        }])
        .await;

        let err = client(url, 1).predict(&texts(3)).await.unwrap_err();
        assert!(matches!(err, CallscoreError::ScorerFailure { .. }));
    }
}
