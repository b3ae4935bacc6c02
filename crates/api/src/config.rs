use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_FRONTEND_URL: &str = "https://aisimplifier.netlify.app";
const DEFAULT_EXTRA_ORIGINS: &str = "http://localhost:5001,http://localhost:3000";
const DEFAULT_SIMPLIFIER_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SIMPLIFIER_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub frontend_url: String,
    /// Exact origins, `frontend_url` first.
    pub allowed_origins: Vec<String>,
    /// Regex sources, already anchored to the full origin.
    pub origin_patterns: Vec<String>,
    pub simplifier_provider: SimplifierProvider,
    pub simplifier_api_url: String,
    pub simplifier_api_key: Option<ApiKey>,
    pub simplifier_model: String,
    pub simplifier_temperature: f64,
    pub history_db_url: Option<String>,
    pub history_connect_timeout_ms: u64,
    pub history_default_limit: usize,
    /// Take caller identity from the first `X-Forwarded-For` hop instead of the peer address.
    pub trust_forwarded_for: bool,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifierProvider {
    External,
    Mock,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServiceConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("LEGALESE_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let port = parse_u16(kv.get("PORT"), 5001, "PORT")?;
        let bind_addr = parse_socket_addr(
            kv.get("BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            "BIND_ADDR",
        )?;

        let frontend_url = normalize_origin(
            optional_nonempty(kv, "FRONTEND_URL")
                .as_deref()
                .unwrap_or(DEFAULT_FRONTEND_URL),
        );

        let mut allowed_origins = vec![frontend_url.clone()];
        let extra_origins = kv
            .get("CORS_ALLOWED_ORIGINS")
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_EXTRA_ORIGINS);
        for origin in split_list(extra_origins) {
            let origin = normalize_origin(origin);
            if !allowed_origins.contains(&origin) {
                allowed_origins.push(origin);
            }
        }

        let mut origin_patterns = Vec::new();
        if parse_bool(kv.get("CORS_ALLOW_PREVIEWS")).unwrap_or(true)
            && let Some(pattern) = preview_origin_pattern(&frontend_url)
        {
            origin_patterns.push(pattern);
        }
        for raw in split_list(kv.get("CORS_ORIGIN_PATTERNS").map(|s| s.as_str()).unwrap_or("")) {
            let anchored = format!("^(?:{})$", raw);
            if regex::Regex::new(&anchored).is_err() {
                return Err(StartupError {
                    code: "ERR_INVALID_CONFIG",
                    message: format!("CORS_ORIGIN_PATTERNS entry is not a valid regex: {}", raw),
                });
            }
            origin_patterns.push(anchored);
        }

        let simplifier_provider = parse_provider(kv.get("SIMPLIFIER_PROVIDER"))?;
        let simplifier_api_url = optional_nonempty(kv, "SIMPLIFIER_API_URL")
            .unwrap_or_else(|| DEFAULT_SIMPLIFIER_API_URL.to_string());
        let simplifier_api_key = optional_nonempty(kv, "SIMPLIFIER_API_KEY").map(ApiKey::new);
        let simplifier_model = optional_nonempty(kv, "SIMPLIFIER_MODEL")
            .unwrap_or_else(|| DEFAULT_SIMPLIFIER_MODEL.to_string());
        let simplifier_temperature = parse_f64(
            kv.get("SIMPLIFIER_TEMPERATURE"),
            0.2,
            "SIMPLIFIER_TEMPERATURE",
        )?;
        if !simplifier_temperature.is_finite() || !(0.0..=2.0).contains(&simplifier_temperature) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SIMPLIFIER_TEMPERATURE must be between 0 and 2".to_string(),
            });
        }

        let history_db_url = optional_nonempty(kv, "HISTORY_DB_URL")
            .or_else(|| optional_nonempty(kv, "DATABASE_URL"));
        let history_connect_timeout_ms = parse_u64(
            kv.get("HISTORY_CONNECT_TIMEOUT_MS"),
            5000,
            "HISTORY_CONNECT_TIMEOUT_MS",
        )?;
        if history_connect_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "HISTORY_CONNECT_TIMEOUT_MS must be >= 1".to_string(),
            });
        }
        let history_default_limit = parse_usize(
            kv.get("HISTORY_DEFAULT_LIMIT"),
            10,
            "HISTORY_DEFAULT_LIMIT",
        )?;
        if !(1..=crate::http::MAX_HISTORY_LIMIT).contains(&history_default_limit) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!(
                    "HISTORY_DEFAULT_LIMIT must be between 1 and {}",
                    crate::http::MAX_HISTORY_LIMIT
                ),
            });
        }

        let trust_forwarded_for = parse_bool(kv.get("TRUST_FORWARDED_FOR")).unwrap_or(false);

        let max_upload_bytes = parse_usize(
            kv.get("MAX_UPLOAD_BYTES"),
            10 * 1024 * 1024,
            "MAX_UPLOAD_BYTES",
        )?;

        Ok(Self {
            bind_addr,
            frontend_url,
            allowed_origins,
            origin_patterns,
            simplifier_provider,
            simplifier_api_url,
            simplifier_api_key,
            simplifier_model,
            simplifier_temperature,
            history_db_url,
            history_connect_timeout_ms,
            history_default_limit,
            trust_forwarded_for,
            max_upload_bytes,
        })
    }
}

/// Deploy previews are served from `https://<label>--<site host>`.
fn preview_origin_pattern(frontend_url: &str) -> Option<String> {
    let host = frontend_url.strip_prefix("https://")?;
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some(format!(
        "^https://[A-Za-z0-9-]+--{}$",
        regex::escape(host)
    ))
}

fn normalize_origin(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u16(value: Option<&String>, default: u16, key: &'static str) -> Result<u16, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u16>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a port number", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_f64(value: Option<&String>, default: f64, key: &'static str) -> Result<f64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<f64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a number", key),
        }),
    }
}

fn parse_provider(value: Option<&String>) -> Result<SimplifierProvider, StartupError> {
    let provider = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("external");

    match provider {
        "external" => Ok(SimplifierProvider::External),
        "mock" => Ok(SimplifierProvider::Mock),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "SIMPLIFIER_PROVIDER must be external or mock".to_string(),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
