//! Outbound tool execution over the owner's `ExecutionBackend`.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::aggregator::ToolOwner;
use crate::models::ExecutionBackend;

/// Upper bound for error text echoed back to callers.
pub const MAX_ERROR_TEXT: usize = 500;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("cannot build upstream request: {0}")]
    InvalidRequest(String),
}

/// Execute `tool` on its owner and return the decoded response body.
pub async fn execute(
    client: &Client,
    owner: &ToolOwner,
    tool: &str,
    arguments: &Value,
    timeout: Duration,
) -> Result<Value, ForwardError> {
    let request = match &owner.backend {
        ExecutionBackend::StaticForward { base_url } => {
            let base = base_url.as_deref().unwrap_or(&owner.url);
            client
                .post(call_endpoint(base))
                .json(&json!({ "tool": tool, "arguments": arguments }))
        }
        ExecutionBackend::Webhook { url, method, headers } => {
            let mut req = client
                .request(parse_method(method)?, url)
                .json(&json!({ "tool": tool, "params": arguments }));
            for (name, value) in headers {
                req = req.header(name.as_str(), value.as_str());
            }
            req
        }
        ExecutionBackend::Http { url_template, method } => {
            let method = parse_method(method)?;
            let (url, body) = expand_template(url_template, arguments, &method)?;
            let req = client.request(method, url);
            match body {
                Some(body) => req.json(&body),
                None => req,
            }
        }
    };

    let request = match owner.auth_key.as_deref() {
        Some(key) => request.bearer_auth(key),
        None => request,
    };

    send(request, timeout).await
}

async fn send(request: RequestBuilder, timeout: Duration) -> Result<Value, ForwardError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| classify(e, timeout))?;

    if !status.is_success() {
        return Err(ForwardError::Upstream {
            status: status.as_u16(),
            message: truncate_str(&error_message(&text, status), MAX_ERROR_TEXT),
        });
    }

    Ok(decode_body(&text))
}

fn classify(err: reqwest::Error, timeout: Duration) -> ForwardError {
    let err = err.without_url();
    if err.is_timeout() {
        ForwardError::Timeout(timeout)
    } else if err.is_builder() {
        ForwardError::InvalidRequest(err.to_string())
    } else {
        ForwardError::Unreachable(err.to_string())
    }
}

/// JSON when possible; anything else is wrapped as `{"response": text}`.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "response": text }))
}

/// Best-available error text from a failed response: a JSON `error`/`detail`/
/// `message` field, the raw body, or the status reason.
fn error_message(text: &str, status: reqwest::StatusCode) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        for key in ["error", "detail", "message"] {
            match body.get(key) {
                Some(Value::String(s)) => return s.clone(),
                Some(Value::Object(obj)) => {
                    if let Some(Value::String(s)) = obj.get("message") {
                        return s.clone();
                    }
                }
                _ => {}
            }
        }
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("upstream error").to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<base>/call`, tolerating a registered SSE URL and an explicit `/call`.
pub fn call_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = base.strip_suffix("/sse").unwrap_or(base);
    if base.ends_with("/call") {
        base.to_string()
    } else {
        format!("{base}/call")
    }
}

fn parse_method(raw: &str) -> Result<Method, ForwardError> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ForwardError::InvalidRequest(format!("invalid HTTP method '{raw}'")))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Fill `{name}` placeholders from `arguments`. Leftover scalars become query
/// parameters; leftover objects/arrays travel as a JSON body for methods that
/// carry one.
fn expand_template(
    template: &str,
    arguments: &Value,
    method: &Method,
) -> Result<(url::Url, Option<Value>), ForwardError> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ForwardError::InvalidRequest(
                "arguments must be an object for http backends".to_string(),
            ));
        }
    };

    let mut filled = String::with_capacity(template.len());
    let mut used: Vec<&str> = Vec::new();
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let key = key.as_str();
        let value = args
            .get(key)
            .and_then(scalar_text)
            .ok_or_else(|| ForwardError::InvalidRequest(format!("missing argument '{key}' for url template")))?;
        filled.push_str(&template[last..whole.start()]);
        filled.push_str(&encode_segment(&value));
        used.push(key);
        last = whole.end();
    }
    filled.push_str(&template[last..]);

    let mut url = url::Url::parse(&filled)
        .map_err(|e| ForwardError::InvalidRequest(format!("invalid url '{filled}': {e}")))?;

    let mut body = Map::new();
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in args.iter().filter(|(k, _)| !used.contains(&k.as_str())) {
            match scalar_text(value) {
                Some(text) => {
                    query.append_pair(key, &text);
                }
                None if !value.is_null() => {
                    body.insert(key.clone(), value.clone());
                }
                None => {}
            }
        }
    }
    // An empty query_pairs_mut() pass still leaves a dangling '?'.
    if url.query() == Some("") {
        url.set_query(None);
    }

    let carries_body = !matches!(*method, Method::GET | Method::HEAD);
    let body = (carries_body && !body.is_empty()).then_some(Value::Object(body));
    Ok((url, body))
}

/// Truncate on a char boundary, marking the cut with `...`.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = s
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..boundary])
    }
}
