//! Posts a short, LLM-generated tech fact or news item every interval.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use polybot::text::truncate;
use polybot::{Bot, Context, PostOptions};

use crate::llm::LlmClient;

pub const NAME: &str = "technewsbot";
pub const MAX_POST_LEN: usize = 300;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub const GENERATION_RETRY: Duration = Duration::from_secs(300);
pub const ERROR_RETRY: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a tech news and facts bot. Generate interesting, \
engaging posts about technology, gaming, software, hardware, or tech history. \
Keep posts informative yet concise, under 300 characters. Include only verified, \
factual information. Format as a single post without hashtags or citations.";

const USER_PROMPT: &str = "Generate a single interesting tech fact or news update.";

pub struct TechNewsBot {
    llm: LlmClient,
    interval: Duration,
}

impl TechNewsBot {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Generate a post, or `None` if the model could not be reached.
    pub async fn generate_post(&self) -> Option<String> {
        match self.llm.complete(SYSTEM_PROMPT, USER_PROMPT).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Error generating post");
                None
            }
        }
    }

    /// One round of the main loop. Returns how long to wait before the next.
    pub async fn step(&mut self, ctx: &mut Context) -> Duration {
        let Some(post) = self.generate_post().await else {
            tracing::warn!("Failed to generate post, will retry in 5 minutes");
            return GENERATION_RETRY;
        };
        let post = truncate(&post, MAX_POST_LEN);

        if let Err(e) = ctx.post(post.as_str(), PostOptions::default()).await {
            tracing::error!(error = %e, "Error in main loop");
            return ERROR_RETRY;
        }
        tracing::info!("Posted: {post}");

        let count = ctx.state.get::<u64>("post_count").unwrap_or(0) + 1;
        if let Err(e) = ctx
            .state
            .set("post_count", count)
            .and_then(|_| ctx.state.set("last_post", &post))
        {
            tracing::error!(error = %e, "Error in main loop");
            return ERROR_RETRY;
        }
        self.interval
    }
}

#[async_trait]
impl Bot for TechNewsBot {
    fn name(&self) -> &str {
        NAME
    }

    async fn main(&mut self, ctx: &mut Context) -> Result<()> {
        tracing::info!(model = self.llm.model(), interval = ?self.interval, "Tech news bot running");
        loop {
            let wait = self.step(ctx).await;
            tokio::time::sleep(wait).await;
        }
    }
}
