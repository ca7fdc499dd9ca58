//! Pure rendering of progress bars, sizes, and the bot's canned texts.

use std::time::Duration;

use crate::relay::database::{TransferTotals, UserSettings};
use crate::relay::extract::FileMetadata;
use crate::relay::transfer::TransferSnapshot;

const BAR_BLOCKS: usize = 10;

/// Ten-block bar with a two-decimal percentage: `███▒▒▒▒▒▒▒ 34.00%`.
pub fn render_bar(percent: f64) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * BAR_BLOCKS as f64) as usize;
    let filled = filled.min(BAR_BLOCKS);
    format!(
        "{}{} {:.2}%",
        "█".repeat(filled),
        "▒".repeat(BAR_BLOCKS - filled),
        clamped
    )
}

/// Human-readable size, base-1024, up to two decimals with trailing zeros
/// trimmed: "512B", "1 KB", "1.5 MB", "2.25 GB".
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let units = ["KB", "MB", "GB", "TB"];
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < units.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, units[unit])
}

pub fn format_speed(bps: f64) -> String {
    if bps <= 0.0 {
        return "0B/s".to_string();
    }
    format!("{}/s", format_size(bps as u64))
}

pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "unknown".to_string();
    };
    let secs = eta.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Full download status message for a progress edit.
pub fn download_progress(name: &str, snapshot: &TransferSnapshot) -> String {
    let body = match (snapshot.percent, snapshot.total_bytes) {
        (Some(percent), Some(total)) => format!(
            "{}\n{} of {}",
            render_bar(percent),
            format_size(snapshot.bytes_transferred),
            format_size(total)
        ),
        _ => format!("{} transferred", format_size(snapshot.bytes_transferred)),
    };

    format!(
        "⬇️ Downloading: {name}\n\n{body}\nSpeed: {}\nETA: {}",
        format_speed(snapshot.speed_bps),
        format_eta(snapshot.eta)
    )
}

/// Status shown while the staged payload is handed to Telegram. The upload
/// is a single call, so there is no bar to advance.
pub fn uploading_text(name: &str, bytes: u64) -> String {
    format!("⬆️ Uploading: {name}\n\n{}", format_size(bytes))
}

pub fn welcome_text() -> String {
    "👋 Welcome!\n\n\
     Send me a TeraBox share link and I'll fetch the file and send it back \
     to you right here.\n\n\
     Use the buttons below to get started."
        .to_string()
}

pub fn help_text() -> String {
    "ℹ️ How to use this bot\n\n\
     1. Copy a TeraBox share link\n\
     2. Paste it into this chat\n\
     3. Wait while I download and re-upload the file\n\n\
     Files up to 2 GB are supported. Larger uploads are split into parts.\n\
     Use /settings to control how files are delivered."
        .to_string()
}

pub fn extracting_text() -> String {
    "🔍 Extracting link...".to_string()
}

pub fn cancelled_text() -> String {
    "🚫 Transfer cancelled.".to_string()
}

pub fn completed_text(name: &str, bytes: u64) -> String {
    format!("✅ Done! Sent \"{name}\" ({}).", format_size(bytes))
}

/// Summary card shown after extraction, before a manual download.
pub fn file_summary(meta: &FileMetadata) -> String {
    let size = meta
        .reported_size
        .map_or_else(|| "unknown size".to_string(), format_size);
    format!("📄 {}\n📏 {size}\n\nReady to transfer.", meta.display_name)
}

pub fn settings_text(settings: &UserSettings) -> String {
    let on_off = |v: bool| if v { "On" } else { "Off" };
    format!(
        "⚙️ Settings\n\n\
         Upload videos as video: {}\n\
         Auto-upload on link: {}\n\n\
         Tap a button to toggle.",
        on_off(settings.upload_as_video),
        on_off(settings.auto_upload)
    )
}

pub fn stats_text(user: &TransferTotals, global: &TransferTotals) -> String {
    format!(
        "📊 Stats\n\n\
         Your transfers: {} completed, {} failed\n\
         Your data relayed: {}\n\n\
         All-time transfers: {} completed, {} failed\n\
         All-time data relayed: {}",
        user.completed,
        user.failed,
        format_size(user.bytes),
        global.completed,
        global.failed,
        format_size(global.bytes)
    )
}
