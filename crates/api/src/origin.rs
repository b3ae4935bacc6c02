use axum::http::{HeaderMap, HeaderValue, header};
use regex::Regex;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const PREFLIGHT_METHODS: &[&str] = &["GET", "POST", "OPTIONS"];
const ALLOWED_HEADERS: &str = "Content-Type";

/// Cross-origin policy for browser callers: an allow-list of exact origins plus regex rules
/// for ephemeral preview hosts. Allowed origins are echoed back verbatim, never as `*`,
/// because credentials are permitted.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginPolicy {
    /// `patterns` must already be anchored (`^...$`).
    pub fn new<S: AsRef<str>>(exact: &[S], patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            exact: exact.iter().map(|s| s.as_ref().to_string()).collect(),
            patterns,
        })
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        self.exact.iter().any(|o| o == origin) || self.patterns.iter().any(|p| p.is_match(origin))
    }

    /// Whether a preflight asking for `method` (its `Access-Control-Request-Method`) may proceed.
    pub fn allows_method(&self, method: &str) -> bool {
        PREFLIGHT_METHODS.contains(&method.trim())
    }

    /// Sets the CORS response headers for `origin` when it is allowed. A denied or absent
    /// origin gets no `Access-Control-Allow-*` headers at all; the browser then blocks the
    /// response on its side.
    pub fn apply_headers(&self, headers: &mut HeaderMap, origin: Option<&HeaderValue>) {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));

        let Some(origin) = origin else {
            return;
        };
        let Ok(origin_str) = origin.to_str() else {
            return;
        };
        if !self.is_allowed(origin_str) {
            return;
        }

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}
