//! Relay module - turns a share link into a delivered Telegram file.

pub mod callback;
pub mod database;
pub mod deliver;
pub mod error;
pub mod extract;
pub mod link;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod telegram;
pub mod transfer;

pub use database::Database;
pub use error::RelayError;
pub use extract::{FileMetadata, UnlockClient};
pub use pipeline::Relay;
pub use telegram::TelegramClient;
