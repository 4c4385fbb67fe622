//! companies-bot: company lifecycle management for a chat community.
//!
//! Members request a company through a private survey, staff approve or
//! reject it with a reaction, and the bot provisions the company's role,
//! category and channels. Afterwards it keeps membership, staff tiers and
//! faction affiliation consistent between the platform and the registry.
//!
//! - `store`: SQLite registry of companies, members and pending requests
//! - `survey`: per-channel survey cursors
//! - `approval`: creation requests from survey to provisioning
//! - `membership`: joining, leaving and promoting members
//! - `faction`: bulk faction affiliation
//! - `bot`: event dispatch and chat commands
//! - `platform`: the chat service abstraction and an in-memory implementation

pub mod approval;
pub mod bot;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod faction;
pub mod membership;
pub mod model;
pub mod platform;
pub mod provision;
pub mod store;
pub mod survey;

pub use bot::Bot;
pub use error::{Error, ErrorKind, Result};
