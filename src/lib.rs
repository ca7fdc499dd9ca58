//! teraferry - a Telegram bot that relays TeraBox share links as files.

pub mod config;
pub mod health;
pub mod relay;
