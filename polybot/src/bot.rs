//! Bot runner: command line, config, account setup, state and fan-out posting.
//!
//! A bot implements [`Bot`] and hands itself to [`run`]:
//!
//! ```rust,no_run
//! use polybot::{Bot, Context, PostOptions};
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl Bot for Hello {
//!     fn name(&self) -> &str {
//!         "hellobot"
//!     }
//!
//!     async fn main(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
//!         ctx.post("Hello, world!", PostOptions::default()).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     polybot::run(Hello).await
//! }
//! ```
//!
//! Run with `--setup` once to configure accounts, then with `--live` to post.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::Config;
use crate::error::StatusError;
use crate::image::Image;
use crate::prompt::{Prompt, Terminal};
use crate::service::{ALL_SERVICES, PostRef, Service, Status, http_client};
use crate::state::State;

/// Log verbosity, named the way operators are used to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

/// Command-line flags shared by every bot. Flatten into a bot's own parser
/// with `#[command(flatten)]`.
#[derive(Debug, Clone, clap::Args)]
pub struct BotArgs {
    /// Actually post updates. Without this flag, runs in dev mode.
    #[arg(long)]
    pub live: bool,

    /// Configure accounts
    #[arg(long)]
    pub setup: bool,

    /// Choose profile
    #[arg(long, default_value = "")]
    pub profile: String,

    /// Set logging level
    #[arg(long, value_enum, ignore_case = true, default_value = "INFO")]
    pub loglevel: LogLevel,

    /// Directory holding the config and state files
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,
}

impl Default for BotArgs {
    fn default() -> Self {
        Self {
            live: false,
            setup: false,
            profile: String::new(),
            loglevel: LogLevel::Info,
            config_dir: PathBuf::from("."),
        }
    }
}

impl BotArgs {
    fn file_stem(&self, name: &str) -> String {
        if self.profile.is_empty() {
            name.to_string()
        } else {
            format!("{name}-{}", self.profile)
        }
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.toml", self.file_stem(name)))
    }

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.state.json", self.file_stem(name)))
    }
}

#[derive(Parser)]
#[command(about = "A polybot bot")]
struct Cli {
    #[command(flatten)]
    bot: BotArgs,
}

/// Install the global tracing subscriber. A subscriber installed earlier
/// (by the bot or a test harness) is left in place.
pub fn init_logging(level: LogLevel) {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();
    for chatty in ["reqwest", "hyper", "hyper_util", "h2", "rustls"] {
        if let Ok(directive) = format!("{chatty}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let json_logs = std::env::var("POLYBOT_LOG_JSON").unwrap_or_default() == "1";
    let _ = if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
}

/// The logic of a bot.
#[async_trait]
pub trait Bot: Send {
    /// Name used for the config and state file names.
    fn name(&self) -> &str;

    /// Main loop. Runs until it returns or the process is interrupted;
    /// state is saved either way.
    async fn main(&mut self, ctx: &mut Context) -> Result<()>;
}

/// Options for [`Context::post`].
#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    /// Split long statuses into a thread instead of relying on the
    /// network to reject them.
    pub wrap: bool,
    pub images: Vec<Image>,
    /// Reply target per service name.
    pub in_reply_to: HashMap<String, PostRef>,
}

impl PostOptions {
    pub fn wrap(mut self) -> Self {
        self.wrap = true;
        self
    }

    pub fn image(mut self, image: Image) -> Self {
        self.images.push(image);
        self
    }

    /// Reply to the posts from an earlier [`Context::post`] call.
    pub fn in_reply_to(mut self, previous: &PostResults) -> Self {
        self.in_reply_to = previous
            .iter()
            .filter_map(|(name, r)| r.clone().map(|r| (name.clone(), r)))
            .collect();
        self
    }
}

/// Per-service outcome of a post. Services that failed are absent; `None`
/// means the service posted nothing (dev mode, or not connected).
pub type PostResults = HashMap<String, Option<PostRef>>;

/// Everything a running bot can reach.
pub struct Context {
    name: String,
    live: bool,
    pub config: Config,
    pub state: State,
    services: Vec<Box<dyn Service>>,
}

impl Context {
    pub fn new(
        name: impl Into<String>,
        live: bool,
        config: Config,
        services: Vec<Box<dyn Service>>,
    ) -> Self {
        Self {
            name: name.into(),
            live,
            config,
            state: State::default(),
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn live(&self) -> bool {
        self.live
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Post to every connected service. A failure on one service is logged
    /// and does not stop the others.
    pub async fn post(
        &mut self,
        status: impl Into<Status>,
        options: PostOptions,
    ) -> Result<PostResults, StatusError> {
        let status = status.into();
        if let Status::Choices(choices) = &status {
            if options.wrap {
                return Err(StatusError::WrapWithChoices);
            }
            if choices.is_empty() {
                return Err(StatusError::EmptyChoices);
            }
        }

        tracing::info!("> {status}");
        let mut out = PostResults::new();
        for service in &mut self.services {
            let name = service.name();
            let reply_to = options.in_reply_to.get(name);
            match service
                .post(&status, options.wrap, &options.images, reply_to)
                .await
            {
                Ok(posted) => {
                    out.insert(name.to_string(), posted);
                }
                Err(e) => tracing::error!(service = name, error = %e, "Error posting"),
            }
        }
        Ok(out)
    }
}

/// Run a bot with flags parsed from the process command line.
pub async fn run<B: Bot>(bot: B) -> Result<()> {
    run_with_args(bot, Cli::parse().bot).await
}

pub async fn run_with_args<B: Bot>(mut bot: B, args: BotArgs) -> Result<()> {
    init_logging(args.loglevel);
    tracing::info!("Polybot starting...");

    let name = bot.name().to_string();
    let config_path = args.config_path(&name);
    let state_path = args.state_path(&name);
    let mut config = Config::load(&config_path)?;
    let http = http_client().context("Failed to build HTTP client")?;

    if args.setup {
        return setup(&mut config, &config_path, &mut Terminal, &http).await;
    }

    if !args.live {
        tracing::warn!(
            "Running in test mode - not posting updates. Pass --live to run in live mode."
        );
    }

    let mut services = Vec::new();
    for kind in ALL_SERVICES {
        if let Some(mut service) = kind.build(&config, args.live, &http) {
            service
                .auth()
                .await
                .with_context(|| format!("Failed to authenticate with {}", kind.name()))?;
            services.push(service);
        }
    }

    if services.is_empty() {
        tracing::warn!("No services to post to. Use --setup to configure some!");
        if args.live {
            return Ok(());
        }
    }

    let mut ctx = Context::new(name, args.live, config, services);
    ctx.state = State::load(&state_path)?;
    tracing::info!("Running");

    let result = tokio::select! {
        r = bot.main(&mut ctx) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    let saved = ctx.state.save(&state_path);
    tracing::info!("Shut down");
    result?;
    saved
}

fn is_eof(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
}

/// Walk through every unconfigured service, asking whether to set it up.
/// The config file is rewritten after each successful service.
pub async fn setup(
    config: &mut Config,
    config_path: &Path,
    prompt: &mut dyn Prompt,
    http: &reqwest::Client,
) -> Result<()> {
    let rule = "-".repeat(80);
    prompt.say("Polybot setup");
    prompt.say(&"=".repeat(80));

    for kind in ALL_SERVICES {
        let name = kind.name();
        if kind.is_configured(config) {
            prompt.say(&format!("Service {name} is already configured"));
            prompt.say(&rule);
            continue;
        }

        let answer = match prompt.ask(&format!("Configure {name} (y/n)? ")) {
            Ok(a) => a,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if answer.to_lowercase().starts_with('y') {
            match kind.setup(config, prompt, http).await {
                Ok(true) => {
                    prompt.say(&format!("Configuring {name} succeeded, writing config"));
                    config.save(config_path)?;
                }
                Ok(false) => prompt.say(&format!("Configuring {name} failed.")),
                Err(e) if is_eof(&e) => return Ok(()),
                Err(e) => {
                    tracing::error!(service = name, error = %e, "Setup failed");
                    prompt.say(&format!("Configuring {name} failed."));
                }
            }
        } else {
            prompt.say("OK, skipping.");
        }
        prompt.say(&rule);
    }

    prompt.say(&format!(
        "Setup complete. To reconfigure, remove the service details from {}",
        config_path.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostError;
    use crate::prompt::Scripted;
    use crate::service::Limits;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Option<PostRef>)>>>;

    struct Fake {
        name: &'static str,
        limits: Limits,
        fail: bool,
        log: Log,
    }

    #[async_trait]
    impl Service for Fake {
        fn name(&self) -> &'static str {
            self.name
        }
        fn limits(&self) -> &Limits {
            &self.limits
        }
        fn live(&self) -> bool {
            true
        }
        async fn auth(&mut self) -> Result<()> {
            Ok(())
        }
        async fn do_post(
            &mut self,
            text: &str,
            _images: &[Image],
            in_reply_to: Option<&PostRef>,
        ) -> Result<Option<PostRef>, PostError> {
            if self.fail {
                return Err(PostError::Api {
                    status: 500,
                    message: "boom".into(),
                });
            }
            self.log
                .lock()
                .unwrap()
                .push((text.to_string(), in_reply_to.cloned()));
            Ok(Some(PostRef::Id {
                id: format!("{}-1", self.name),
            }))
        }
    }

    fn fake(name: &'static str, fail: bool, log: &Log) -> Box<dyn Service> {
        Box::new(Fake {
            name,
            limits: Limits::default(),
            fail,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn wrap_with_choices_is_rejected() {
        let mut ctx = Context::new("t", false, Config::default(), vec![]);
        let err = ctx
            .post(vec!["a".to_string()], PostOptions::default().wrap())
            .await
            .unwrap_err();
        assert_eq!(err, StatusError::WrapWithChoices);
    }

    #[tokio::test]
    async fn empty_choices_are_rejected() {
        let mut ctx = Context::new("t", false, Config::default(), vec![]);
        let err = ctx
            .post(Vec::<String>::new(), PostOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, StatusError::EmptyChoices);
    }

    #[tokio::test]
    async fn one_failing_service_does_not_block_others() {
        let log = Log::default();
        let mut ctx = Context::new(
            "t",
            true,
            Config::default(),
            vec![fake("broken", true, &log), fake("working", false, &log)],
        );
        let out = ctx.post("hello", PostOptions::default()).await.unwrap();
        assert!(!out.contains_key("broken"));
        assert_eq!(
            out["working"],
            Some(PostRef::Id {
                id: "working-1".into()
            })
        );
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replies_are_looked_up_per_service() {
        let log = Log::default();
        let mut ctx = Context::new(
            "t",
            true,
            Config::default(),
            vec![fake("a", false, &log), fake("b", false, &log)],
        );
        let first = ctx.post("first", PostOptions::default()).await.unwrap();
        ctx.post("second", PostOptions::default().in_reply_to(&first))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[2].1, Some(PostRef::Id { id: "a-1".into() }));
        assert_eq!(log[3].1, Some(PostRef::Id { id: "b-1".into() }));
    }

    #[test]
    fn file_names_follow_profile() {
        let mut args = BotArgs {
            config_dir: PathBuf::from("/etc/bots"),
            ..Default::default()
        };
        assert_eq!(args.config_path("news"), PathBuf::from("/etc/bots/news.toml"));
        args.profile = "staging".into();
        assert_eq!(
            args.state_path("news"),
            PathBuf::from("/etc/bots/news-staging.state.json")
        );
    }

    #[test]
    fn loglevel_parses_case_insensitively() {
        let cli = Cli::try_parse_from(["bot", "--loglevel", "debug", "--live"]).unwrap();
        assert_eq!(cli.bot.loglevel, LogLevel::Debug);
        assert!(cli.bot.live);
        let cli = Cli::try_parse_from(["bot", "--loglevel", "CRITICAL"]).unwrap();
        assert_eq!(LevelFilter::from(cli.bot.loglevel), LevelFilter::ERROR);
        assert!(Cli::try_parse_from(["bot", "--loglevel", "LOUD"]).is_err());
    }

    #[tokio::test]
    async fn setup_configures_selected_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        let mut config = Config::default();
        let mut prompt = Scripted::new(["y", "bot@example.com", "secret", "n", "no"]);
        let http = reqwest::Client::new();

        setup(&mut config, &path, &mut prompt, &http).await.unwrap();

        let saved = Config::load(&path).unwrap();
        assert_eq!(saved.bluesky.unwrap().email, "bot@example.com");
        assert!(saved.mastodon.is_none());
        assert!(
            prompt
                .transcript
                .iter()
                .any(|l| l == "Configuring bluesky succeeded, writing config")
        );
        assert_eq!(
            prompt.transcript.iter().filter(|l| *l == "OK, skipping.").count(),
            2
        );
        assert!(prompt.transcript.last().unwrap().starts_with("Setup complete."));
    }

    #[tokio::test]
    async fn setup_skips_configured_and_stops_on_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        let mut config: Config = toml::from_str("[bluesky]\nemail = \"a\"\npassword = \"b\"\n").unwrap();
        let mut prompt = Scripted::new(Vec::<String>::new());
        let http = reqwest::Client::new();

        setup(&mut config, &path, &mut prompt, &http).await.unwrap();

        assert!(
            prompt
                .transcript
                .contains(&"Service bluesky is already configured".to_string())
        );
        assert!(!prompt.transcript.iter().any(|l| l.starts_with("Setup complete.")));
        assert!(!path.exists());
    }

    #[derive(Default)]
    struct CountingBot {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Bot for CountingBot {
        fn name(&self) -> &str {
            "counter"
        }

        async fn main(&mut self, ctx: &mut Context) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let count: u32 = ctx.state.get("count").unwrap_or(0);
            ctx.state.set("count", count + 1)?;
            let out = ctx.post("tick", PostOptions::default()).await?;
            assert!(out.is_empty());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dev_mode_runs_main_and_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let args = BotArgs {
            config_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        run_with_args(CountingBot::default(), args.clone()).await.unwrap();
        run_with_args(CountingBot::default(), args.clone()).await.unwrap();

        let state = State::load(&args.state_path("counter")).unwrap();
        assert_eq!(state.get::<u32>("count"), Some(2));
    }

    #[tokio::test]
    async fn live_mode_without_services_does_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = BotArgs {
            live: true,
            config_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let bot = CountingBot::default();
        let runs = bot.runs.clone();
        run_with_args(bot, args.clone()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!args.state_path("counter").exists());
    }
}
