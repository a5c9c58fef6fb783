//! Network adapters.
//!
//! Every network implements [`Service`]: authenticate once, then post text
//! with optional images, optionally as a reply. The provided
//! [`Service::post`] applies the network's [`Limits`] (image count, image
//! size, status length) before calling the adapter's `do_post`, and splits
//! long statuses into threads when asked to wrap.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::PostError;
use crate::image::Image;
use crate::prompt::Prompt;
use crate::text::{char_len, longest_allowed, wrap};

pub mod bluesky;
pub mod mastodon;
mod oauth1;
pub mod twitter;

pub use bluesky::Bluesky;
pub use mastodon::Mastodon;
pub use twitter::Twitter;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("polybot/", env!("CARGO_PKG_VERSION"));

/// Marker used to join the parts of a wrapped status.
pub const ELLIPSIS: char = '\u{2026}';

/// Per-network posting constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum status length in characters.
    pub max_length: usize,
    /// Maximum status length when images are attached.
    pub max_length_image: usize,
    /// Characters reserved for the continuation marker when wrapping.
    pub ellipsis_length: usize,
    /// Maximum encoded image size in bytes.
    pub max_image_size: usize,
    pub max_image_pixels: Option<u64>,
    pub max_image_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_length: 500,
            max_length_image: 500,
            ellipsis_length: 1,
            max_image_size: 10_000_000,
            max_image_pixels: None,
            max_image_count: 4,
        }
    }
}

impl Limits {
    pub fn max_len(&self, has_images: bool) -> usize {
        if has_images {
            self.max_length_image
        } else {
            self.max_length
        }
    }
}

/// The text to post: a single status, or alternatives of varying length
/// from which each network picks the longest that fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Text(String),
    Choices(Vec<String>),
}

impl Status {
    /// The status to post within `max_len` characters.
    pub fn pick(&self, max_len: usize) -> &str {
        match self {
            Status::Text(t) => t,
            Status::Choices(c) => longest_allowed(c, max_len),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Text(t) => f.write_str(t),
            Status::Choices(c) => write!(f, "{c:?}"),
        }
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Status::Text(s.to_string())
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        Status::Text(s)
    }
}

impl From<Vec<String>> for Status {
    fn from(c: Vec<String>) -> Self {
        Status::Choices(c)
    }
}

/// AT Protocol reference to a specific version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Handle to a published post, usable as the target of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostRef {
    /// Bluesky replies name both the thread root and the direct parent.
    Bluesky { root: StrongRef, parent: StrongRef },
    /// Mastodon status ID or tweet ID.
    Id { id: String },
}

impl PostRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            PostRef::Id { id } => Some(id),
            PostRef::Bluesky { .. } => None,
        }
    }
}

#[async_trait]
pub trait Service: Send + Sync {
    /// Name used for the config table and in per-service results.
    fn name(&self) -> &'static str;
    fn limits(&self) -> &Limits;
    /// Whether posts are actually sent.
    fn live(&self) -> bool;

    async fn auth(&mut self) -> anyhow::Result<()>;

    /// Publish a single post. The returned ref is the reply target for the
    /// next post of the same thread; `None` means nothing was posted.
    async fn do_post(
        &mut self,
        text: &str,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<Option<PostRef>, PostError>;

    /// Post `status`, fitting it and its images to this network.
    async fn post(
        &mut self,
        status: &Status,
        wrap: bool,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<Option<PostRef>, PostError> {
        let limits = self.limits().clone();
        let images = images
            .iter()
            .take(limits.max_image_count)
            .map(|i| i.resize_to_target(limits.max_image_size, limits.max_image_pixels))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.live() {
            return Ok(None);
        }

        let text = status.pick(limits.max_len(!images.is_empty()));
        if wrap {
            self.do_wrapped(text, &images, in_reply_to).await
        } else {
            self.do_post(text, &images, in_reply_to).await
        }
    }

    /// Post `text` as a thread of posts that each fit the length limit.
    /// Returns the ref of the last post made. If the service stops posting
    /// partway, that is the last part that did go out.
    async fn do_wrapped(
        &mut self,
        text: &str,
        images: &[Image],
        in_reply_to: Option<&PostRef>,
    ) -> Result<Option<PostRef>, PostError> {
        let limits = self.limits().clone();
        let max_len = limits.max_len(!images.is_empty());
        let parts = if char_len(text) > max_len {
            wrap(text, max_len.saturating_sub(limits.ellipsis_length))
        } else {
            vec![text.to_string()]
        };

        let count = parts.len();
        let mut reply_to = in_reply_to.cloned();
        let mut last = None;
        for (i, mut line) in parts.into_iter().enumerate() {
            if i == 0 && count > 1 {
                line.push(ELLIPSIS);
            }
            if i > 0 {
                line.insert(0, ELLIPSIS);
            }
            let attach: &[Image] = if i == 0 { images } else { &[] };
            match self.do_post(&line, attach, reply_to.as_ref()).await? {
                Some(out) => {
                    reply_to = Some(out.clone());
                    last = Some(out);
                }
                None => break,
            }
        }
        Ok(last)
    }
}

/// The networks polybot knows how to post to, in setup/connect order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Bluesky,
    Mastodon,
    Twitter,
}

pub const ALL_SERVICES: [ServiceKind; 3] = [
    ServiceKind::Bluesky,
    ServiceKind::Mastodon,
    ServiceKind::Twitter,
];

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Bluesky => bluesky::NAME,
            ServiceKind::Mastodon => mastodon::NAME,
            ServiceKind::Twitter => twitter::NAME,
        }
    }

    pub fn is_configured(self, config: &Config) -> bool {
        match self {
            ServiceKind::Bluesky => config.bluesky.is_some(),
            ServiceKind::Mastodon => config.mastodon.is_some(),
            ServiceKind::Twitter => config.twitter.is_some(),
        }
    }

    /// Construct the adapter from its config table, if present.
    pub fn build(
        self,
        config: &Config,
        live: bool,
        http: &reqwest::Client,
    ) -> Option<Box<dyn Service>> {
        match self {
            ServiceKind::Bluesky => config
                .bluesky
                .clone()
                .map(|c| Box::new(Bluesky::new(c, live, http.clone())) as Box<dyn Service>),
            ServiceKind::Mastodon => config
                .mastodon
                .clone()
                .map(|c| Box::new(Mastodon::new(c, live, http.clone())) as Box<dyn Service>),
            ServiceKind::Twitter => config
                .twitter
                .clone()
                .map(|c| Box::new(Twitter::new(c, live, http.clone())) as Box<dyn Service>),
        }
    }

    /// Interactively configure this network, storing its table in `config`.
    /// Returns whether configuration succeeded.
    pub async fn setup(
        self,
        config: &mut Config,
        prompt: &mut dyn Prompt,
        http: &reqwest::Client,
    ) -> anyhow::Result<bool> {
        match self {
            ServiceKind::Bluesky => bluesky::setup(config, prompt),
            ServiceKind::Mastodon => mastodon::setup(config, prompt, http).await,
            ServiceKind::Twitter => twitter::setup(config, prompt, http).await,
        }
    }
}

/// HTTP client shared by all services.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
}

/// Turn non-success responses into [`PostError`]s.
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, PostError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PostError::RateLimited {
            reset: rate_limit_reset(resp.headers()),
        });
    }
    let message = resp.text().await.unwrap_or_default();
    Err(PostError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Rate-limit reset time from response headers. Bluesky and Twitter send
/// unix seconds; Mastodon sends an RFC 3339 timestamp.
pub(crate) fn rate_limit_reset(headers: &reqwest::header::HeaderMap) -> Option<DateTime<Utc>> {
    let value = ["ratelimit-reset", "x-rate-limit-reset", "x-ratelimit-reset"]
        .iter()
        .find_map(|h| headers.get(*h))?
        .to_str()
        .ok()?
        .trim();
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
