//! polybot-bots: bots that run on the polybot framework.

pub mod llm;
pub mod technews;
