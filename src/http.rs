//! Rate-limit aware client for the Discord REST API.
//!
//! All outbound HTTP goes through [`DiscordHttpClient`] so auth headers,
//! bucket tracking and error mapping live in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{CreateMessage, Message, RateLimitInfo, User};

const BASE_URL: &str = "https://discord.com/api/v10";
const AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
const MAX_RETRIES: u32 = 5;
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Header seconds as a wait, capped at [`MAX_WAIT`].
fn wait_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT)
}

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

/// Per-route bucket tracking plus the global limit.
#[derive(Debug, Default)]
struct RateLimiter {
    route_buckets: HashMap<String, String>,
    buckets: HashMap<String, BucketState>,
    global_until: Option<Instant>,
}

impl RateLimiter {
    fn delay_for(&self, route: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until.filter(|until| *until > now) {
            return Some(until - now);
        }
        let bucket = self.route_buckets.get(route)?;
        let state = self.buckets.get(bucket)?;
        (state.remaining == 0 && state.resets_at > now).then(|| state.resets_at - now)
    }

    fn update(&mut self, route: &str, info: &RateLimitInfo, now: Instant) {
        let reset_after = info
            .reset_after
            .map(wait_from_secs)
            .unwrap_or(Duration::from_secs(1));

        if info.is_global {
            self.global_until = Some(now + reset_after);
        }
        if let Some(bucket) = &info.bucket {
            self.route_buckets.insert(route.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: now + reset_after,
                },
            );
        }
    }
}

pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after")
            .or_else(|| header("retry-after"))
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true")
            || header("x-ratelimit-scope") == Some("global"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A file uploaded with a message as `files[0]`.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

enum Body<'a> {
    Empty,
    Json(&'a serde_json::Value),
    Multipart {
        payload: &'a serde_json::Value,
        file: &'a FileUpload,
    },
}

impl Body<'_> {
    /// Multipart forms are consumed on send, so each attempt rebuilds one.
    fn apply(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, HttpError> {
        Ok(match self {
            Body::Empty => req,
            Body::Json(value) => req.json(value),
            Body::Multipart { payload, file } => {
                let json = Part::text(serde_json::to_string(payload)?)
                    .mime_str("application/json")?;
                let attachment = Part::bytes(file.data.clone())
                    .file_name(file.filename.clone())
                    .mime_str(mime_for(&file.filename))?;
                req.multipart(
                    Form::new()
                        .part("payload_json", json)
                        .part("files[0]", attachment),
                )
            }
        })
    }
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Cheap to clone; the connection pool and limiter are shared.
#[derive(Clone)]
pub struct DiscordHttpClient {
    token: String,
    client: reqwest::Client,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::new(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    /// Send a request to `{BASE_URL}/{path}` and return the body bytes.
    ///
    /// `route` is the bucket key, e.g. `POST /channels/{id}/messages`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        route: &str,
        body: Body<'_>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", BASE_URL, path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            let delay = self.limiter.lock().await.delay_for(route, Instant::now());
            if let Some(delay) = delay {
                let delay = delay.min(MAX_WAIT);
                debug!(route, delay_ms = delay.as_millis() as u64, "pre-emptive rate-limit wait");
                tokio::time::sleep(delay).await;
            }

            let req = self
                .client
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .header(USER_AGENT, AGENT);
            let resp = body.apply(req)?.send().await?;

            let status = resp.status();
            let info = parse_rate_limit_headers(resp.headers());
            self.limiter.lock().await.update(route, &info, Instant::now());

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = info.reset_after.unwrap_or(1.0);
                warn!(
                    route,
                    attempt,
                    retry_after_s = retry_after,
                    global = info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(wait_from_secs(retry_after)).await;
                continue;
            }

            let bytes = resp.bytes().await?;
            if status.is_success() {
                return Ok(bytes.to_vec());
            }
            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                route: route.to_string(),
            });
        }

        Err(HttpError::Api {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: "rate-limited after max retries".to_string(),
            route: route.to_string(),
        })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route: &str,
        body: Body<'_>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn create_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let body = serde_json::to_value(msg)?;
        self.request_json(
            Method::POST,
            &format!("channels/{channel_id}/messages"),
            &format!("POST /channels/{channel_id}/messages"),
            Body::Json(&body),
        )
        .await
    }

    /// Send a message with one uploaded file.
    ///
    /// `msg` should already reference the file as attachment `0` if an embed
    /// points at it.
    pub async fn create_message_with_file(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
        file: &FileUpload,
    ) -> Result<Message, HttpError> {
        let payload = serde_json::to_value(msg)?;
        self.request_json(
            Method::POST,
            &format!("channels/{channel_id}/messages"),
            &format!("POST /channels/{channel_id}/messages"),
            Body::Multipart {
                payload: &payload,
                file,
            },
        )
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, HttpError> {
        self.request_json(
            Method::GET,
            &format!("users/{user_id}"),
            "GET /users/{user_id}",
            Body::Empty,
        )
        .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .finish()
    }
}
