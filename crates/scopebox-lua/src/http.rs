//! HTTP requests behind `Network` grants.
//!
//! Only `http` and `https` URLs are accepted. Redirects are never
//! followed (the client is built with `redirect::Policy::none()`), so a
//! granted host cannot bounce the request to an ungranted one.
//!
//! Timeouts are reported as [`HttpError::TimedOut`]; every other transport
//! failure comes back as [`HttpError::Transport`] with a short kind
//! (`"connection_refused"`, `"dns"`, `"network"`, ...).

use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// A validated request target.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) url: Url,
    /// Lowercase host component.
    pub(crate) host: String,
}

/// Parses `raw` and extracts its host.
///
/// # Errors
///
/// Returns a message for non-http(s) schemes, unparsable URLs, or URLs
/// without a host.
pub(crate) fn parse_target(raw: &str) -> Result<Target, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{}': {e}", truncate_for_error(raw, 100)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!(
            "invalid URL scheme: URL must start with http:// or https://, got: {}",
            truncate_for_error(raw, 100)
        ));
    }
    let host = url
        .host_str()
        .ok_or_else(|| format!("URL has no host: {}", truncate_for_error(raw, 100)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    Ok(Target { url, host })
}

/// Builds the shared client used by every call of an engine.
pub(crate) fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Request parameters.
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub(crate) method: reqwest::Method,
    pub(crate) target: Target,
    pub(crate) body: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeout: Duration,
    pub(crate) max_body_bytes: usize,
}

/// A received response.
#[derive(Debug, Clone)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
    pub(crate) truncated: bool,
}

#[derive(Debug, Error)]
pub(crate) enum HttpError {
    #[error("request to {host} timed out after {}s", .after.as_secs())]
    TimedOut { host: String, after: Duration },

    #[error("{kind}: {message}")]
    Transport { kind: &'static str, message: String },
}

/// Sends the request and reads at most `max_body_bytes` of the body.
pub(crate) async fn send(client: &reqwest::Client, req: HttpRequest) -> Result<HttpResponse, HttpError> {
    let host = req.target.host.clone();
    let timeout = req.timeout;
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            tracing::warn!(host = %host, timeout_secs = timeout.as_secs(), "http request timed out");
            HttpError::TimedOut {
                host: host.clone(),
                after: timeout,
            }
        } else {
            let (kind, message) = classify_reqwest_error(&e);
            HttpError::Transport { kind, message }
        }
    };

    let has_content_type = req
        .headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));

    let mut builder = client
        .request(req.method.clone(), req.target.url.clone())
        .timeout(timeout);
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = req.body {
        if !has_content_type {
            builder = builder.header("Content-Type", "text/plain; charset=utf-8");
        }
        builder = builder.body(body);
    }

    tracing::debug!(method = %req.method, host = %req.target.host, "http request");
    let mut resp = builder.send().await.map_err(&classify)?;

    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let mut body = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = resp.chunk().await.map_err(&classify)? {
        let room = req.max_body_bytes.saturating_sub(body.len());
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
        truncated,
    })
}

/// Short classification of a non-timeout reqwest error.
fn classify_reqwest_error(error: &reqwest::Error) -> (&'static str, String) {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if error.is_connect() {
        if lower.contains("dns") || lower.contains("resolve") {
            ("dns", message)
        } else if lower.contains("refused") {
            ("connection_refused", message)
        } else {
            ("network", message)
        }
    } else if error.is_body() || error.is_decode() {
        ("body", message)
    } else if error.is_request() {
        ("request", message)
    } else {
        ("network", message)
    }
}

fn truncate_for_error(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_extracts_lowercase_host() {
        let target = parse_target("https://API.Example.com:8443/v1?q=1").expect("valid URL");
        assert_eq!(target.host, "api.example.com");
        assert_eq!(target.url.port(), Some(8443));
    }

    #[test]
    fn parse_target_rejects_other_schemes() {
        assert!(parse_target("file:///etc/passwd").is_err());
        assert!(parse_target("ftp://example.com/").is_err());
    }

    #[test]
    fn parse_target_rejects_garbage() {
        assert!(parse_target("not a url").is_err());
    }

    #[test]
    fn parse_target_strips_ipv6_brackets() {
        let target = parse_target("http://[::1]:8080/").expect("valid IPv6 URL");
        assert_eq!(target.host, "::1");
    }

    #[test]
    fn userinfo_does_not_fool_host_extraction() {
        let target = parse_target("http://allowed.test@evil.test/").expect("valid URL");
        assert_eq!(target.host, "evil.test");
    }

    #[test]
    fn truncate_for_error_handles_multibyte() {
        assert_eq!(truncate_for_error("héllo", 2), "hé");
        assert_eq!(truncate_for_error("hi", 10), "hi");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connection_refused_is_transport_error() {
        let client = build_client().expect("build client");
        let req = HttpRequest {
            method: reqwest::Method::GET,
            target: parse_target("http://127.0.0.1:1/").expect("valid URL"),
            body: None,
            headers: Vec::new(),
            timeout: Duration::from_secs(2),
            max_body_bytes: 1024,
        };
        match send(&client, req).await {
            Err(HttpError::Transport { .. }) | Err(HttpError::TimedOut { .. }) => {}
            Ok(resp) => panic!("unexpected response {}", resp.status),
        }
    }
}
