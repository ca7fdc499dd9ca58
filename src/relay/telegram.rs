//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardMarkup, InputFile, MessageId};
use tracing::{info, warn};

/// Telegram API client. Thin wrapper over teloxide so the pipeline deals in
/// plain ids and strings.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    pub async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(keyboard)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to edit message: {e}");
                warn!("{}", msg);
                msg
            })
    }

    pub async fn edit_message_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .reply_markup(keyboard)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to edit message: {e}");
                warn!("{}", msg);
                msg
            })
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), String> {
        info!("🗑️ Deleting message {} in chat {}", message_id, chat_id);

        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to delete message: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Show "sending a file..." in the chat header while an upload runs.
    pub async fn send_upload_action(&self, chat_id: i64) -> Result<(), String> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::UploadDocument)
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to send chat action: {e}"))
    }

    pub async fn send_video(
        &self,
        chat_id: i64,
        file: InputFile,
        caption: Option<&str>,
    ) -> Result<i64, String> {
        info!("📹 Sending video to chat {}", chat_id);

        let mut request = self.bot.send_video(ChatId(chat_id), file);
        if let Some(cap) = caption {
            request = request.caption(cap);
        }
        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send video: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn send_audio(
        &self,
        chat_id: i64,
        file: InputFile,
        caption: Option<&str>,
    ) -> Result<i64, String> {
        info!("🎵 Sending audio to chat {}", chat_id);

        let mut request = self.bot.send_audio(ChatId(chat_id), file);
        if let Some(cap) = caption {
            request = request.caption(cap);
        }
        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send audio: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        file: InputFile,
        caption: Option<&str>,
    ) -> Result<i64, String> {
        info!("📷 Sending photo to chat {}", chat_id);

        let mut request = self.bot.send_photo(ChatId(chat_id), file);
        if let Some(cap) = caption {
            request = request.caption(cap);
        }
        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send photo: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        file: InputFile,
        caption: Option<&str>,
    ) -> Result<i64, String> {
        info!("📄 Sending document to chat {}", chat_id);

        let mut request = self.bot.send_document(ChatId(chat_id), file);
        if let Some(cap) = caption {
            request = request.caption(cap);
        }
        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send document: {e}");
            warn!("{}", msg);
            msg
        })
    }
}
