//! polybot: a framework for bots that post to several social networks.
//!
//! A bot implements [`Bot`]; the framework supplies:
//! - a command line (`--live`, `--setup`, `--profile`, `--loglevel`)
//! - per-bot TOML configuration with interactive account setup
//! - persistent JSON state
//! - adapters for Bluesky, Mastodon and Twitter/X that fit statuses and
//!   images to each network's limits, and thread long statuses

pub mod bot;
pub mod config;
pub mod error;
pub mod image;
pub mod prompt;
pub mod service;
pub mod state;
pub mod text;

pub use crate::bot::{Bot, BotArgs, Context, LogLevel, PostOptions, PostResults, run, run_with_args};
pub use crate::config::Config;
pub use crate::error::{ConfigError, ImageError, PostError, StatusError};
pub use crate::image::Image;
pub use crate::service::{ALL_SERVICES, PostRef, Service, ServiceKind, Status, StrongRef};
pub use crate::state::State;
