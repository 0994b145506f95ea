//! Evaluation backends.
//!
//! A backend is the opaque capability behind a judge: hand it a rubric and
//! the content under evaluation, get back a [`Verdict`] or an error. The
//! engine never looks inside the call; timeout and retry live in the
//! invoker, not here.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::BackendError;
use crate::types::{Judge, Verdict};

/// Instruction appended to every rubric so the model answers in a
/// machine-readable shape.
const VERDICT_FORMAT_INSTRUCTION: &str = "Respond with a single JSON object: \
{\"label\": \"<categorical verdict>\", \"score\": <0.0-1.0>, \"rationale\": \"<short justification>\"}";

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// One evaluation call against an external backend.
#[async_trait]
pub trait EvaluationBackend: Send + Sync + std::fmt::Debug {
    /// Evaluate `content` under the judge's rubric.
    async fn call(&self, judge: &Judge, content: &Value) -> Result<Verdict, BackendError>;
}

// ---------------------------------------------------------------------------
// Verdict extraction
// ---------------------------------------------------------------------------

static OBJECT_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{").expect("verdict regex is valid"));

/// Extract the balanced `{...}` starting at `start`, honoring string
/// literals and escapes, so nested objects are captured whole.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a verdict out of a model reply.
///
/// Tries the whole reply as JSON first, then falls back to the first
/// balanced JSON object embedded in prose. A verdict must carry at least
/// a label or a score to be usable by any policy.
pub fn parse_verdict(reply: &str) -> Result<Verdict, BackendError> {
    let trimmed = reply.trim();

    let candidate: Option<Value> = serde_json::from_str(trimmed).ok().or_else(|| {
        OBJECT_START_RE.find_iter(reply).find_map(|m| {
            balanced_object(reply, m.start()).and_then(|s| serde_json::from_str(s).ok())
        })
    });

    let Some(obj) = candidate else {
        return Err(BackendError::InvalidResponse {
            message: "no JSON object in reply".to_string(),
        });
    };

    let label = obj
        .get("label")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let score = obj.get("score").and_then(|v| v.as_f64());
    let rationale = obj
        .get("rationale")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if label.is_none() && score.is_none() {
        return Err(BackendError::InvalidResponse {
            message: "reply JSON carries neither label nor score".to_string(),
        });
    }

    Ok(Verdict {
        label,
        score,
        rationale,
    })
}

// ---------------------------------------------------------------------------
// HTTP backend (OpenAI-style chat completions)
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible chat-completions endpoint per judge.
///
/// The judge's `endpoint` and `model` fields are passed through verbatim;
/// the rubric becomes the system message and the content the user message.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpBackend {
    /// Build a backend. `api_key`, when set, is sent as a bearer token.
    ///
    /// No request timeout is configured on the client: the invoker owns
    /// the deadline.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl EvaluationBackend for HttpBackend {
    async fn call(&self, judge: &Judge, content: &Value) -> Result<Verdict, BackendError> {
        let user_content = match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "model": judge.model,
            "messages": [
                {"role": "system", "content": format!("{}\n\n{}", judge.rubric, VERDICT_FORMAT_INSTRUCTION)},
                {"role": "user", "content": user_content},
            ],
        });

        let mut request = self.client.post(&judge.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response.json().await?;
        let reply = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "missing choices[0].message.content".to_string(),
            })?;

        parse_verdict(reply)
    }
}

// ---------------------------------------------------------------------------
// Static backend
// ---------------------------------------------------------------------------

/// Deterministic backend answering from a fixed table of verdicts, keyed
/// by judge id. Unknown judges get a transport error. Used by tests and
/// local demos; an optional per-call delay simulates slow judges.
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    verdicts: HashMap<String, Verdict>,
    delays: HashMap<String, Duration>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload the verdict for a judge id.
    pub fn with_verdict(mut self, judge_id: impl Into<String>, verdict: Verdict) -> Self {
        self.verdicts.insert(judge_id.into(), verdict);
        self
    }

    /// Preload a labeled verdict for a judge id.
    pub fn with_label(self, judge_id: impl Into<String>, label: &str) -> Self {
        self.with_verdict(
            judge_id,
            Verdict {
                label: Some(label.to_string()),
                score: None,
                rationale: String::new(),
            },
        )
    }

    /// Preload a scored verdict for a judge id.
    pub fn with_score(self, judge_id: impl Into<String>, score: f64) -> Self {
        self.with_verdict(
            judge_id,
            Verdict {
                label: None,
                score: Some(score),
                rationale: String::new(),
            },
        )
    }

    /// Delay the response for a judge id.
    pub fn with_delay(mut self, judge_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(judge_id.into(), delay);
        self
    }
}

#[async_trait]
impl EvaluationBackend for StaticBackend {
    async fn call(&self, judge: &Judge, _content: &Value) -> Result<Verdict, BackendError> {
        if let Some(delay) = self.delays.get(&judge.id) {
            tokio::time::sleep(*delay).await;
        }
        self.verdicts
            .get(&judge.id)
            .cloned()
            .ok_or_else(|| BackendError::Transport {
                message: format!("no canned verdict for judge {}", judge.id),
            })
    }
}
