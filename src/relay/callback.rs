//! Inline-button callback data and the keyboards that emit it.

use sha2::{Digest, Sha256};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

use crate::relay::database::UserSettings;

/// Parsed callback data. Callback payloads are capped at 64 bytes by the
/// platform, so file links travel as short hashes, never as URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Start the transfer for a pending extraction, keyed by link hash.
    Download(String),
    /// Cancel a running transfer, keyed by transfer id.
    CancelTransfer(String),
    ToggleVideo,
    ToggleAuto,
    Settings,
    Help,
    Stats,
    MainMenu,
}

pub fn parse(data: &str) -> Option<CallbackAction> {
    if let Some(hash) = data.strip_prefix("download_") {
        return Some(CallbackAction::Download(hash.to_string()));
    }
    if let Some(id) = data.strip_prefix("cancel_") {
        return Some(CallbackAction::CancelTransfer(id.to_string()));
    }
    match data {
        "toggle_video" => Some(CallbackAction::ToggleVideo),
        "toggle_auto" => Some(CallbackAction::ToggleAuto),
        "settings" => Some(CallbackAction::Settings),
        "help" => Some(CallbackAction::Help),
        "stats" => Some(CallbackAction::Stats),
        "main_menu" => Some(CallbackAction::MainMenu),
        _ => None,
    }
}

/// Short stable key for a link, safe to embed in callback data.
pub fn link_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

pub fn main_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("⚙️ Settings", "settings"),
            InlineKeyboardButton::callback("📊 Stats", "stats"),
        ],
        vec![InlineKeyboardButton::callback("ℹ️ Help", "help")],
    ])
}

pub fn settings_keyboard(settings: &UserSettings) -> InlineKeyboardMarkup {
    let on_off = |v: bool| if v { "On" } else { "Off" };
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            format!("🎬 Upload as video: {}", on_off(settings.upload_as_video)),
            "toggle_video",
        )],
        vec![InlineKeyboardButton::callback(
            format!("⚡ Auto-upload: {}", on_off(settings.auto_upload)),
            "toggle_auto",
        )],
        vec![InlineKeyboardButton::callback("⬅️ Back", "main_menu")],
    ])
}

pub fn download_keyboard(hash: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "⬇️ Download",
        format!("download_{hash}"),
    )]])
}

pub fn cancel_keyboard(transfer_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "❌ Cancel",
        format!("cancel_{transfer_id}"),
    )]])
}

/// Fallback keyboard offering the raw direct link when relaying failed.
pub fn direct_link_keyboard(url: &str) -> Option<InlineKeyboardMarkup> {
    let parsed: Url = url.parse().ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("🔗 Direct link", parsed),
    ]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_with_hash() {
        assert_eq!(
            parse("download_abc123"),
            Some(CallbackAction::Download("abc123".to_string()))
        );
    }

    #[test]
    fn test_parse_cancel_with_id() {
        assert_eq!(
            parse("cancel_7"),
            Some(CallbackAction::CancelTransfer("7".to_string()))
        );
    }

    #[test]
    fn test_parse_fixed_actions() {
        assert_eq!(parse("toggle_video"), Some(CallbackAction::ToggleVideo));
        assert_eq!(parse("toggle_auto"), Some(CallbackAction::ToggleAuto));
        assert_eq!(parse("settings"), Some(CallbackAction::Settings));
        assert_eq!(parse("help"), Some(CallbackAction::Help));
        assert_eq!(parse("stats"), Some(CallbackAction::Stats));
        assert_eq!(parse("main_menu"), Some(CallbackAction::MainMenu));
    }

    #[test]
    fn test_parse_unknown_is_none() {
        assert_eq!(parse("bogus"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("toggle_everything"), None);
    }

    #[test]
    fn test_link_hash_short_and_stable() {
        let a = link_hash("https://terabox.com/s/abc");
        let b = link_hash("https://terabox.com/s/abc");
        let c = link_hash("https://terabox.com/s/xyz");
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_survives_callback_round_trip() {
        let hash = link_hash("https://terabox.com/s/abc");
        let parsed = parse(&format!("download_{hash}"));
        assert_eq!(parsed, Some(CallbackAction::Download(hash)));
    }

    #[test]
    fn test_direct_link_keyboard_rejects_invalid_url() {
        assert!(direct_link_keyboard("https://d.example/file").is_some());
        assert!(direct_link_keyboard("not a url").is_none());
    }
}
