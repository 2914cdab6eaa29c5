//! Bot plugins: the contract, the capability handle bots receive, the
//! lifecycle manager, and a built-in keyword responder.

pub mod context;
pub mod contract;
pub mod keyword;
pub mod manager;

pub use context::BotContext;
pub use contract::{Bot, BotDyn, BoxBot};
pub use keyword::{KEYWORD_BOT_ID, KeywordResponderBot};
pub use manager::BotManager;
