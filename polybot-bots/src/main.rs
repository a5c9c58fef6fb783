//! technews: posts an LLM-generated tech fact to every configured network,
//! once per interval.
//!
//! Requires a Groq API key (`--groq-api-key` or `GROQ_API_KEY`).

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use polybot::BotArgs;

use polybot_bots::llm::{DEFAULT_MODEL, LlmClient};
use polybot_bots::technews::TechNewsBot;

#[derive(Parser)]
#[command(name = "technews", about = "Tech news and facts bot")]
struct Args {
    #[command(flatten)]
    bot: BotArgs,

    /// Groq API key (or set GROQ_API_KEY env var)
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: String,

    /// Model to generate posts with
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Seconds between posts
    #[arg(long, default_value_t = 3600)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let llm = LlmClient::new(args.groq_api_key).with_model(&args.model);
    let bot = TechNewsBot::new(llm).with_interval(Duration::from_secs(args.interval));
    polybot::run_with_args(bot, args.bot).await
}
