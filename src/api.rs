//! Classifier client: LLM interaction with bounded retries and backoff.
//!
//! The module follows a small trait-based design:
//! - [`AskAsync`]: core trait for one async request to the model
//! - [`ChatCompletionsAsk`]: one call to an OpenAI-compatible chat-completions
//!   endpoint in JSON mode, decoded into a [`ClassifierReply`]
//! - [`RetryAsk`]: decorator that retries any `AskAsync` according to a
//!   [`RetryPolicy`], with backoff sleeps that give way to shutdown
//! - [`ClassifierClient`]: cleans the input text, builds the prompt and turns
//!   the outcome into an `Option`, never an error
//!
//! # Retry Strategy
//!
//! - 3 attempts by default, 60s timeout on each
//! - Fixed 15s wait between attempts, none after the last
//! - Optional exponential growth and random jitter (see [`RetryPolicy`])
//! - Transport errors, timeouts, non-2xx replies and malformed bodies all
//!   count as failed attempts

use crate::config::{ClassifierConfig, RetryPolicy};
use crate::errors::ClassifierError;
use crate::models::{ClassificationResult, RawClassification};
use crate::registry::CompanyRegistry;
use crate::shutdown::Shutdown;
use crate::utils::{looks_truncated, take_chars, truncate_for_log};
use crate::validator::validate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration as StdDuration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s.,-]").expect("static regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Trait for async LLM interaction.
///
/// Implementors send a prompt to a model and decode its reply. This
/// abstraction lets decorators such as [`RetryAsk`] wrap any backend.
pub trait AskAsync {
    /// The decoded reply of one successful call.
    type Response;

    /// Send `prompt` to the model once.
    async fn ask(&self, prompt: &str) -> Result<Self::Response, ClassifierError>;
}

/// The outcome of one successful classifier call.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierReply {
    /// The model named a company. Not yet validated.
    Company(RawClassification),
    /// The model answered `null`, or an object naming no company.
    NoCompany,
}

/// One request against an OpenAI-compatible chat-completions endpoint.
#[derive(Debug)]
pub struct ChatCompletionsAsk {
    http: reqwest::Client,
    config: ClassifierConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsAsk {
    /// Build the HTTP client; every request is bounded by `config.timeout_secs`.
    pub fn new(config: ClassifierConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { http, config })
    }
}

impl AskAsync for ChatCompletionsAsk {
    type Response = ClassifierReply;

    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn ask(&self, prompt: &str) -> Result<Self::Response, ClassifierError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut request = self.http.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let timeout_secs = self.config.timeout_secs;
        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::from_request(e, timeout_secs))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClassifierError::from_request(e, timeout_secs))?;

        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        let reply = parse_reply(&text);
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            ok = reply.is_ok(),
            "Classifier call finished"
        );
        reply
    }
}

/// Decode a chat-completions response body into a [`ClassifierReply`].
pub fn parse_reply(body: &str) -> Result<ClassifierReply, ClassifierError> {
    let envelope: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ClassifierError::Malformed(format!(
            "undecodable envelope ({e}): {}",
            truncate_for_log(body, 200)
        ))
    })?;
    let content = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ClassifierError::Malformed("response has no message content".to_string()))?;
    parse_content(&content)
}

/// Decode the model's message content.
pub fn parse_content(content: &str) -> Result<ClassifierReply, ClassifierError> {
    let content = content.trim();
    // The prompt asks for NULL, which is not valid JSON in upper case.
    if content.eq_ignore_ascii_case("null") {
        return Ok(ClassifierReply::NoCompany);
    }

    let value: Value = serde_json::from_str(content).map_err(|e| {
        ClassifierError::Malformed(format!(
            "content is not JSON{} ({e}): {}",
            if looks_truncated(&e) { ", looks truncated" } else { "" },
            truncate_for_log(content, 200)
        ))
    })?;

    match value {
        Value::Null => Ok(ClassifierReply::NoCompany),
        Value::Object(_) => {
            let raw: RawClassification = serde_json::from_value(value)
                .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
            if raw.is_empty_answer() {
                Ok(ClassifierReply::NoCompany)
            } else {
                Ok(ClassifierReply::Company(raw))
            }
        }
        other => Err(ClassifierError::Malformed(format!(
            "expected a JSON object, got {}",
            truncate_for_log(&other.to_string(), 80)
        ))),
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_for_log(body, 200))
}

/// Wrapper that adds retry logic to any [`AskAsync`] implementation.
///
/// The wait after failed attempt `n` is `policy.delay_after(n)` plus up to
/// `policy.jitter_ms` of random jitter. No wait follows the final attempt.
/// A shutdown during a wait returns [`ClassifierError::Interrupted`] at once.
pub struct RetryAsk<T> {
    /// The underlying client to wrap.
    inner: T,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying client to wrap
    /// * `policy` - Attempt count, backoff and jitter (3 attempts, 15s by default)
    /// * `shutdown` - Signal that cuts any backoff wait short
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ask = ChatCompletionsAsk::new(config.classifier.clone())?;
    /// let retry = RetryAsk::new(ask, config.classifier.retry.clone(), shutdown.clone());
    /// ```
    pub fn new(inner: T, policy: RetryPolicy, shutdown: Shutdown) -> Self {
        Self {
            inner,
            policy,
            shutdown,
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let delay = self.policy.delay_after(attempt);
        if self.policy.jitter_ms == 0 {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.policy.jitter_ms);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, prompt: &str) -> Result<Self::Response, ClassifierError> {
        let total_t0 = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let err = match self.inner.ask(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
            let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

            if attempt >= max_attempts {
                error!(
                    attempt,
                    max = max_attempts,
                    elapsed_ms_attempt,
                    elapsed_ms_total,
                    error = %err,
                    "Classifier exhausted retries"
                );
                return Err(err);
            }

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max = max_attempts,
                elapsed_ms_attempt,
                elapsed_ms_total,
                ?delay,
                error = %err,
                "Classifier attempt failed; backing off"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.triggered() => {
                    warn!(attempt, "Backoff interrupted by shutdown");
                    return Err(ClassifierError::Interrupted);
                }
            }
        }
    }
}

/// Processor-facing classification step.
///
/// Implementations must not fail: every problem is logged and reported as
/// "no classification available".
pub trait Classify {
    async fn classify_raw(
        &self,
        text: &str,
        whitelist: &CompanyRegistry,
    ) -> Option<RawClassification>;
}

/// Classifier client used by the pipeline.
#[derive(Debug)]
pub struct ClassifierClient<T> {
    asker: RetryAsk<T>,
    max_input_chars: usize,
}

impl<T> ClassifierClient<T>
where
    T: AskAsync<Response = ClassifierReply>,
{
    /// Wrap `inner` in a [`RetryAsk`] configured from `config`.
    ///
    /// # Arguments
    ///
    /// * `inner` - One-shot backend, normally [`ChatCompletionsAsk`]
    /// * `config` - Supplies the retry policy and the input length cap
    /// * `shutdown` - Passed to the retry wrapper
    ///
    /// # Returns
    ///
    /// A client whose [`Classify::classify_raw`] never fails: exhausted
    /// retries, "no company" replies and shutdowns all come back as `None`.
    pub fn new(inner: T, config: &ClassifierConfig, shutdown: Shutdown) -> Self {
        Self {
            asker: RetryAsk::new(inner, config.retry.clone(), shutdown),
            max_input_chars: config.max_input_chars,
        }
    }

    /// Ask the model about `text` and return its unvalidated answer.
    #[instrument(level = "info", skip_all, fields(chars = text.chars().count()))]
    pub async fn request(
        &self,
        text: &str,
        whitelist: &CompanyRegistry,
    ) -> Option<RawClassification> {
        let cleaned = clean_text(text, self.max_input_chars);
        let prompt = build_prompt(&cleaned, whitelist);

        match self.asker.ask(&prompt).await {
            Ok(ClassifierReply::Company(raw)) => Some(raw),
            Ok(ClassifierReply::NoCompany) => {
                info!("Classifier found no company");
                None
            }
            Err(e) => {
                error!(error = %e, "No classification available");
                None
            }
        }
    }

    /// Classify `text` and validate the answer against `whitelist`.
    pub async fn classify(
        &self,
        text: &str,
        whitelist: &CompanyRegistry,
    ) -> Option<ClassificationResult> {
        let raw = self.request(text, whitelist).await?;
        match validate(&raw, whitelist) {
            Ok(result) => Some(result),
            Err(reason) => {
                warn!(%reason, symbol = ?raw.symbol(), "Classification rejected");
                None
            }
        }
    }
}

impl<T> Classify for ClassifierClient<T>
where
    T: AskAsync<Response = ClassifierReply>,
{
    async fn classify_raw(
        &self,
        text: &str,
        whitelist: &CompanyRegistry,
    ) -> Option<RawClassification> {
        self.request(text, whitelist).await
    }
}

/// Cut `text` to `max_chars`, drop characters that tend to break JSON-mode
/// replies, and collapse whitespace.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let truncated = take_chars(text, max_chars);
    let stripped = DISALLOWED_CHARS.replace_all(truncated, "");
    WHITESPACE_RUN
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Build the classification prompt, listing the whitelist when there is one.
pub fn build_prompt(cleaned_text: &str, whitelist: &CompanyRegistry) -> String {
    let company_list = if whitelist.is_empty() {
        String::new()
    } else {
        format!("Valid NSCs: {}. ", whitelist.iter().join(", "))
    };

    format!(
        r#"{company_list}Analyze news article and create JSON response:
{{
  "company_name": "string",
  "headline": "string",
  "description": "string",
  "nsc": "uppercase NSC symbol",
  "confidence": 0.0-1.0,
  "news_date": "YYYY-MM-DD"
}} Return NULL if no company found. Text: {cleaned_text}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted replies; fails once the script runs out.
    struct ScriptedAsk {
        replies: Mutex<VecDeque<Result<ClassifierReply, ClassifierError>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedAsk {
        fn new(replies: Vec<Result<ClassifierReply, ClassifierError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AskAsync for &ScriptedAsk {
        type Response = ClassifierReply;

        async fn ask(&self, prompt: &str) -> Result<Self::Response, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClassifierError::Malformed("script exhausted".to_string())))
        }
    }

    fn company(ticker: &str) -> ClassifierReply {
        ClassifierReply::Company(RawClassification {
            company_name: Some("Acme Corp".to_string()),
            headline: Some("Acme wins order".to_string()),
            ticker: Some(ticker.to_string()),
            confidence: Some(0.8),
            news_date: Some("2025-05-06".to_string()),
            ..Default::default()
        })
    }

    fn config(max_attempts: usize, backoff_secs: u64) -> ClassifierConfig {
        ClassifierConfig {
            retry: RetryPolicy::fixed(max_attempts, StdDuration::from_secs(backoff_secs)),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_text_strips_and_collapses() {
        let cleaned = clean_text("Reliance\n\n  Q4: profit ↑ 12% — (beat)!  ", 1500);
        assert_eq!(cleaned, "Reliance Q4 profit 12 beat");
    }

    #[test]
    fn test_clean_text_truncates_before_stripping() {
        let text = "a".repeat(1490) + &"!".repeat(20) + "tail";
        let cleaned = clean_text(&text, 1500);
        assert_eq!(cleaned, "a".repeat(1490));
    }

    #[test]
    fn test_clean_text_keeps_punctuation_whitelist() {
        assert_eq!(clean_text("A.B,C-D_E", 100), "A.B,C-D_E");
    }

    #[test]
    fn test_build_prompt_lists_whitelist() {
        let whitelist = CompanyRegistry::from_tickers(["XYZ", "ABC"]);
        let prompt = build_prompt("Some text", &whitelist);
        assert!(prompt.starts_with("Valid NSCs: ABC, XYZ. Analyze news article"));
        assert!(prompt.ends_with("Return NULL if no company found. Text: Some text"));
    }

    #[test]
    fn test_build_prompt_without_whitelist() {
        let prompt = build_prompt("Some text", &CompanyRegistry::default());
        assert!(prompt.starts_with("Analyze news article"));
        assert!(!prompt.contains("Valid NSCs"));
    }

    #[test]
    fn test_parse_reply_company() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"company_name\": \"Tata\", \"headline\": \"H\", \"nsc\": \"TCS\", \"confidence\": 0.9}"}}]}"#;
        match parse_reply(body).unwrap() {
            ClassifierReply::Company(raw) => {
                assert_eq!(raw.symbol(), Some("TCS"));
                assert_eq!(raw.confidence, Some(0.9));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_parse_content_null_variants() {
        for content in ["null", "NULL", " Null ", r#"{"company_name": null, "nsc": null}"#] {
            assert_eq!(
                parse_content(content).unwrap(),
                ClassifierReply::NoCompany,
                "content: {content}"
            );
        }
    }

    #[test]
    fn test_parse_reply_malformed() {
        for body in [
            "<html>gateway timeout</html>",
            r#"{"choices": []}"#,
            r#"{"choices": [{"message": {"content": null}}]}"#,
            r#"{"choices": [{"message": {"content": "not json"}}]}"#,
            r#"{"choices": [{"message": {"content": "{\"nsc\": \"TC"}}]}"#,
            r#"{"choices": [{"message": {"content": "[1, 2]"}}]}"#,
        ] {
            assert!(
                matches!(parse_reply(body), Err(ClassifierError::Malformed(_))),
                "body: {body}"
            );
        }
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(
            api_error_message(r#"{"error": {"message": "Invalid API Key"}}"#),
            "Invalid API Key"
        );
        assert_eq!(api_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_max_attempts_with_backoff() {
        let script = ScriptedAsk::new(vec![]);
        let retry = RetryAsk::new(
            &script,
            RetryPolicy::fixed(3, StdDuration::from_secs(15)),
            Shutdown::new(),
        );

        let t0 = Instant::now();
        let result = retry.ask("prompt").await;

        assert!(result.is_err());
        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
        assert!(t0.elapsed() >= StdDuration::from_secs(30));
        assert!(t0.elapsed() < StdDuration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_failure() {
        let script = ScriptedAsk::new(vec![
            Err(ClassifierError::Timeout { timeout_secs: 60 }),
            Ok(company("ABC")),
        ]);
        let retry = RetryAsk::new(
            &script,
            RetryPolicy::fixed(3, StdDuration::from_secs(15)),
            Shutdown::new(),
        );

        assert_eq!(retry.ask("prompt").await.unwrap(), company("ABC"));
        assert_eq!(script.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let script = ScriptedAsk::new(vec![]);
        let shutdown = Shutdown::new();
        let retry = RetryAsk::new(
            &script,
            RetryPolicy::fixed(3, StdDuration::from_secs(15)),
            shutdown.clone(),
        );

        let t0 = Instant::now();
        let (result, _) = tokio::join!(retry.ask("prompt"), async {
            sleep(StdDuration::from_secs(5)).await;
            shutdown.trigger();
        });

        assert!(matches!(result, Err(ClassifierError::Interrupted)));
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert!(t0.elapsed() < StdDuration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_returns_none_after_exhaustion() {
        let script = ScriptedAsk::new(vec![]);
        let client = ClassifierClient::new(&script, &config(3, 15), Shutdown::new());
        let whitelist = CompanyRegistry::from_tickers(["ABC"]);

        assert!(client.classify("Acme wins order", &whitelist).await.is_none());
        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_company_is_not_retried() {
        let script = ScriptedAsk::new(vec![Ok(ClassifierReply::NoCompany)]);
        let client = ClassifierClient::new(&script, &config(3, 15), Shutdown::new());

        let raw = client
            .classify_raw("Markets close flat", &CompanyRegistry::default())
            .await;
        assert!(raw.is_none());
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classify_validates_reply() {
        let script = ScriptedAsk::new(vec![Ok(company("abc")), Ok(company("ZZZ"))]);
        let client = ClassifierClient::new(&script, &config(3, 0), Shutdown::new());
        let whitelist = CompanyRegistry::from_tickers(["ABC"]);

        let result = client
            .classify("Acme wins order!", &whitelist)
            .await
            .unwrap();
        assert_eq!(result.ticker, "ABC");
        assert_eq!(result.news_date, "2025-05-06");

        assert!(client.classify("Other news", &whitelist).await.is_none());

        let prompts = script.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Valid NSCs: ABC."));
        assert!(prompts[0].ends_with("Text: Acme wins order"));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_secs: 1,
            max_backoff_secs: 3,
            exponential: true,
            jitter_ms: 250,
        };
        let script = ScriptedAsk::new(vec![]);
        let retry = RetryAsk::new(&script, policy.clone(), Shutdown::new());

        for attempt in 1..=3 {
            let base = policy.delay_after(attempt);
            for _ in 0..50 {
                let delay = retry.backoff(attempt);
                assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
                assert!(delay <= base + StdDuration::from_millis(250));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_exponential_jitter_waits_within_bounds() {
        let script = ScriptedAsk::new(vec![]);
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_secs: 1,
            max_backoff_secs: 3,
            exponential: true,
            jitter_ms: 250,
        };
        let retry = RetryAsk::new(&script, policy, Shutdown::new());

        let t0 = Instant::now();
        assert!(retry.ask("prompt").await.is_err());
        let elapsed = t0.elapsed();

        // Waits of 1s, 2s and 3s (capped), each plus up to 250ms.
        assert_eq!(script.calls.load(Ordering::SeqCst), 4);
        assert!(elapsed >= StdDuration::from_secs(6), "{elapsed:?}");
        assert!(elapsed <= StdDuration::from_millis(6_750), "{elapsed:?}");
    }

    mod http {
        use super::*;
        use crate::config::DEFAULT_CLASSIFIER_MODEL;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};
        use tokio::task::JoinHandle;

        /// A request as seen by the server: lower-cased head and JSON body.
        struct Seen {
            head: String,
            body: Value,
        }

        /// Serve one canned reply per connection, in order, and hand back
        /// the requests received.
        async fn serve(replies: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Seen>>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = format!(
                "http://{}/openai/v1/chat/completions",
                listener.local_addr().unwrap()
            );

            let handle = tokio::spawn(async move {
                let mut seen = Vec::new();
                for (status, body) in replies {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    seen.push(read_request(&mut socket).await);
                    let reply = format!(
                        "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(reply.as_bytes()).await.unwrap();
                    let _ = socket.shutdown().await;
                }
                seen
            });
            (endpoint, handle)
        }

        async fn read_request(socket: &mut TcpStream) -> Seen {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request ended");
                buf.extend_from_slice(&chunk[..n]);

                let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let start = end + 4;
                while buf.len() < start + len {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "connection closed mid-body");
                    buf.extend_from_slice(&chunk[..n]);
                }
                return Seen {
                    head,
                    body: serde_json::from_slice(&buf[start..start + len]).unwrap(),
                };
            }
        }

        fn completion(content: &str) -> String {
            serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })
            .to_string()
        }

        fn http_config(endpoint: String) -> ClassifierConfig {
            ClassifierConfig {
                endpoint,
                api_key: Some("gsk-test-key".to_string()),
                retry: RetryPolicy::fixed(3, StdDuration::ZERO),
                ..Default::default()
            }
        }

        const TCS_REPLY: &str = r#"{"company_name": "Tata Consultancy Services", "headline": "TCS wins UK deal", "nsc": "TCS", "confidence": 0.9, "news_date": "2025-05-06"}"#;

        #[tokio::test]
        async fn test_rate_limited_then_success() {
            let (endpoint, server) = serve(vec![
                (
                    429,
                    r#"{"error": {"message": "Rate limit reached"}}"#.to_string(),
                ),
                (200, completion(TCS_REPLY)),
            ])
            .await;
            let config = http_config(endpoint);
            let client = ClassifierClient::new(
                ChatCompletionsAsk::new(config.clone()).unwrap(),
                &config,
                Shutdown::new(),
            );

            let whitelist = CompanyRegistry::from_tickers(["TCS"]);
            let result = client
                .classify("TCS wins a large deal from a UK insurer", &whitelist)
                .await
                .unwrap();
            assert_eq!(result.ticker, "TCS");
            assert_eq!(result.confidence, 0.9);

            let seen = server.await.unwrap();
            assert_eq!(seen.len(), 2);
            for request in &seen {
                assert!(request.head.starts_with("post /openai/v1/chat/completions "));
                assert!(request.head.contains("authorization: bearer gsk-test-key"));
                assert_eq!(request.body["model"], DEFAULT_CLASSIFIER_MODEL);
                assert!((request.body["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
                assert_eq!(request.body["response_format"]["type"], "json_object");
                assert_eq!(request.body["messages"][0]["role"], "user");
                let prompt = request.body["messages"][0]["content"].as_str().unwrap();
                assert!(prompt.starts_with("Valid NSCs: TCS."));
            }
        }

        #[tokio::test]
        async fn test_error_status_carries_api_message() {
            let (endpoint, server) = serve(vec![(
                401,
                r#"{"error": {"message": "Invalid API Key"}}"#.to_string(),
            )])
            .await;
            let ask = ChatCompletionsAsk::new(http_config(endpoint)).unwrap();

            match ask.ask("prompt").await {
                Err(ClassifierError::Status { status, message }) => {
                    assert_eq!(status, 401);
                    assert_eq!(message, "Invalid API Key");
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(server.await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_malformed_success_body_counts_as_failed_attempt() {
            let (endpoint, server) = serve(vec![
                (200, "<html>upstream hiccup</html>".to_string()),
                (200, completion("I think it is TCS")),
                (200, completion(TCS_REPLY)),
            ])
            .await;
            let config = http_config(endpoint);
            let client = ClassifierClient::new(
                ChatCompletionsAsk::new(config.clone()).unwrap(),
                &config,
                Shutdown::new(),
            );

            let raw = client
                .request("TCS wins a large deal", &CompanyRegistry::from_tickers(["TCS"]))
                .await
                .unwrap();
            assert_eq!(raw.symbol(), Some("TCS"));
            assert_eq!(server.await.unwrap().len(), 3);
        }
    }
}
