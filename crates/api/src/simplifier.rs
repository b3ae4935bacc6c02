use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ApiKey, ServiceConfig, SimplifierProvider};

const SYSTEM_PROMPT: &str = "You rewrite legal documents in plain language for a non-lawyer. \
Keep every obligation, right, deadline, amount and party from the original. Use short sentences \
and everyday words, explain unavoidable legal terms in brackets, and do not add advice or facts \
that are not in the document. Answer with the rewritten text only.";

/// External text-completion capability: document text in, plain-language rendering out.
#[async_trait]
pub trait Simplifier: Send + Sync {
    async fn complete(&self, text: &str) -> Result<String, SimplifierError>;
}

#[derive(Debug)]
pub enum SimplifierError {
    MissingApiKey,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
    EmptyChoices,
}

impl std::fmt::Display for SimplifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimplifierError::MissingApiKey => write!(f, "SIMPLIFIER_API_KEY is not set"),
            SimplifierError::Http(err) => write!(f, "completion HTTP error: {}", err),
            SimplifierError::BadStatus(status) => {
                write!(f, "completion API returned status {}", status)
            }
            SimplifierError::InvalidResponse => {
                write!(f, "completion API returned an invalid JSON response")
            }
            SimplifierError::EmptyChoices => write!(f, "completion API returned no choices"),
        }
    }
}

impl std::error::Error for SimplifierError {}

impl From<reqwest::Error> for SimplifierError {
    fn from(value: reqwest::Error) -> Self {
        SimplifierError::Http(value)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionClientConfig {
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub temperature: f64,
}

/// Chat-completions client. Single attempt per call, no client-side timeout.
#[derive(Clone)]
pub struct CompletionClient {
    base_url: String,
    api_key: ApiKey,
    model: String,
    temperature: f64,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl CompletionClient {
    pub fn new(config: CompletionClientConfig) -> Result<Self, SimplifierError> {
        let api_key = config.api_key.ok_or(SimplifierError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(SimplifierError::Http)?;

        Ok(Self {
            base_url: config.base_url,
            api_key,
            model: config.model,
            temperature: config.temperature,
            http,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Simplifier for CompletionClient {
    async fn complete(&self, text: &str) -> Result<String, SimplifierError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let resp = self
            .http
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SimplifierError::BadStatus(resp.status()));
        }

        let decoded = resp
            .json::<ChatResponse>()
            .await
            .map_err(|_| SimplifierError::InvalidResponse)?;

        decoded
            .choices
            .into_iter()
            .next()
            .ok_or(SimplifierError::EmptyChoices)?
            .message
            .content
            .ok_or(SimplifierError::InvalidResponse)
    }
}

/// Offline stand-in for local development: swaps common legalese for plain words.
#[derive(Debug, Clone, Default)]
pub struct MockSimplifier;

const MOCK_REPLACEMENTS: &[(&str, &str)] = &[
    ("hereinafter", "from now on"),
    ("heretofore", "until now"),
    ("notwithstanding", "despite"),
    ("pursuant to", "under"),
    ("in the event that", "if"),
    ("shall", "must"),
    ("whereas", "because"),
];

fn mock_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        MOCK_REPLACEMENTS
            .iter()
            .filter_map(|(from, to)| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(from));
                Regex::new(&pattern).ok().map(|re| (re, *to))
            })
            .collect()
    })
}

#[async_trait]
impl Simplifier for MockSimplifier {
    async fn complete(&self, text: &str) -> Result<String, SimplifierError> {
        let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
        for (rule, replacement) in mock_rules() {
            out = rule.replace_all(&out, *replacement).into_owned();
        }
        Ok(out)
    }
}

/// Builds the capability selected by `SIMPLIFIER_PROVIDER`.
pub fn from_config(config: &ServiceConfig) -> Result<Arc<dyn Simplifier>, SimplifierError> {
    match config.simplifier_provider {
        SimplifierProvider::Mock => Ok(Arc::new(MockSimplifier)),
        SimplifierProvider::External => {
            let client = CompletionClient::new(CompletionClientConfig {
                base_url: config.simplifier_api_url.clone(),
                api_key: config.simplifier_api_key.clone(),
                model: config.simplifier_model.clone(),
                temperature: config.simplifier_temperature,
            })?;
            Ok(Arc::new(client))
        }
    }
}
