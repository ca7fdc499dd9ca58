//! Delivery planning and execution: one upload or several parts.

use teloxide::types::InputFile;

use crate::relay::database::UserSettings;
use crate::relay::storage::StagedBytes;
use crate::relay::telegram::TelegramClient;

/// Largest single upload the platform accepts from a bot.
pub const UPLOAD_CEILING: u64 = 50 * 1024 * 1024;

/// Part size for split deliveries, kept under the ceiling with headroom.
pub const PART_SIZE: u64 = 48 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Audio,
    Image,
    Document,
}

/// Classify by file extension, case-insensitive. Anything unrecognised is a
/// plain document.
pub fn classify(name: &str) -> FileKind {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "mkv" | "mov" | "webm" | "avi" => FileKind::Video,
        "mp3" | "m4a" | "flac" | "ogg" | "opus" | "wav" | "aac" => FileKind::Audio,
        "jpg" | "jpeg" | "png" | "webp" | "gif" => FileKind::Image,
        _ => FileKind::Document,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPlan {
    Single(FileKind),
    Split { parts: u64 },
}

/// Decide how a staged payload goes out. Oversize payloads are split into
/// documents; videos obey the user's upload_as_video preference.
pub fn plan(kind: FileKind, size: u64, settings: &UserSettings) -> DeliveryPlan {
    if size > UPLOAD_CEILING {
        return DeliveryPlan::Split {
            parts: size.div_ceil(PART_SIZE),
        };
    }
    let kind = match kind {
        FileKind::Video if !settings.upload_as_video => FileKind::Document,
        other => other,
    };
    DeliveryPlan::Single(kind)
}

/// Upload the staged bytes per the plan. Disk-staged single files stream
/// from their path; everything else goes up from memory.
pub async fn deliver(
    telegram: &TelegramClient,
    chat_id: i64,
    staged: &StagedBytes,
    name: &str,
    plan: DeliveryPlan,
) -> Result<(), String> {
    match plan {
        DeliveryPlan::Single(kind) => {
            let file = match staged {
                StagedBytes::Disk(path) => InputFile::file(path.clone()).file_name(name.to_string()),
                StagedBytes::Memory(_) => {
                    InputFile::memory(staged.read_all()?).file_name(name.to_string())
                }
            };
            let send = match kind {
                FileKind::Video => telegram.send_video(chat_id, file, Some(name)).await,
                FileKind::Audio => telegram.send_audio(chat_id, file, Some(name)).await,
                FileKind::Image => telegram.send_photo(chat_id, file, Some(name)).await,
                FileKind::Document => telegram.send_document(chat_id, file, Some(name)).await,
            };
            send.map(|_| ())
        }
        DeliveryPlan::Split { parts } => {
            for part in 0..parts {
                let bytes = staged.read_range(part * PART_SIZE, PART_SIZE)?;
                let part_name = format!("{name}.part{:02}", part + 1);
                let caption = format!("{name} (part {}/{parts})", part + 1);
                let file = InputFile::memory(bytes).file_name(part_name);
                telegram
                    .send_document(chat_id, file, Some(&caption))
                    .await?;
            }
            Ok(())
        }
    }
}
