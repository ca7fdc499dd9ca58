//! The relay pipeline: validate, extract, stream, deliver, clean up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use teloxide::Bot;
use tracing::{info, warn};

use crate::config::{Config, StorageBackend};
use crate::relay::callback::{self, CallbackAction};
use crate::relay::database::Database;
use crate::relay::deliver;
use crate::relay::error::RelayError;
use crate::relay::extract::{FileMetadata, UnlockClient};
use crate::relay::link::is_supported_link;
use crate::relay::progress;
use crate::relay::storage::{DiskStaging, MemoryStaging, SqliteStaging, Staging};
use crate::relay::telegram::TelegramClient;
use crate::relay::transfer::{
    self, CancelFlag, ChunkSink, ChunkSource, HttpSource, ProgressReporter, TransferOutcome,
    TransferSnapshot,
};

/// Everything one chat message needs, shared across dispatcher branches.
pub struct Relay {
    config: Config,
    db: Arc<Database>,
    telegram: TelegramClient,
    unlock: UnlockClient,
    /// Client for direct-link streaming. No total timeout: a 2 GB transfer
    /// legitimately takes minutes. Idle reads still time out.
    stream_client: reqwest::Client,
    /// Extractions waiting for a manual download tap, keyed by link hash.
    pending: Mutex<HashMap<String, FileMetadata>>,
    /// Cancel flags of running transfers, keyed by transfer id.
    active: Mutex<HashMap<String, CancelFlag>>,
    next_transfer_id: AtomicU64,
}

impl Relay {
    pub fn new(config: Config, bot: Bot, db: Database) -> Self {
        let unlock = UnlockClient::new(
            config.unlock_api_base.clone(),
            Duration::from_secs(config.extract_timeout_secs),
        );
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            config,
            db: Arc::new(db),
            telegram: TelegramClient::new(bot),
            unlock,
            stream_client,
            pending: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_transfer_id: AtomicU64::new(1),
        }
    }

    /// Entry point for plain text messages.
    pub async fn handle_text(&self, chat_id: i64, user_id: i64, text: &str) {
        if !is_supported_link(text, &self.config.allowed_hosts) {
            self.report_failure(chat_id, &RelayError::InvalidLink).await;
            return;
        }

        if let Err(e) = self.process_link(chat_id, user_id, text.trim()).await {
            self.report_failure(chat_id, &e).await;
        }
    }

    async fn process_link(
        &self,
        chat_id: i64,
        user_id: i64,
        link: &str,
    ) -> Result<(), RelayError> {
        let status_id = self
            .telegram
            .send_message(chat_id, &progress::extracting_text())
            .await
            .ok();

        let result = self.unlock.extract(link).await;

        if let Some(msg_id) = status_id {
            let _ = self.telegram.delete_message(chat_id, msg_id).await;
        }

        let meta = result.map_err(RelayError::Extraction)?;

        // Reject on the reported size before touching the direct link.
        if transfer::exceeds_ceiling(meta.reported_size, self.config.max_transfer_bytes) {
            return Err(RelayError::TooLarge {
                size: meta.reported_size.unwrap_or(0),
                limit: self.config.max_transfer_bytes,
            });
        }

        let settings = self.db.get_settings(user_id).unwrap_or_default();
        if settings.auto_upload {
            return self.run_transfer(chat_id, user_id, meta).await;
        }

        let hash = callback::link_hash(&meta.direct_url);
        let summary = progress::file_summary(&meta);
        self.pending.lock().unwrap().insert(hash.clone(), meta);
        let _ = self
            .telegram
            .send_message_with_keyboard(chat_id, &summary, callback::download_keyboard(&hash))
            .await;
        Ok(())
    }

    /// Entry point for inline-button callbacks. message_id is the message
    /// carrying the tapped keyboard, used to edit menus in place.
    pub async fn handle_callback(
        &self,
        chat_id: i64,
        message_id: Option<i64>,
        user_id: i64,
        action: CallbackAction,
    ) {
        match action {
            CallbackAction::Download(hash) => {
                let meta = self.pending.lock().unwrap().remove(&hash);
                match meta {
                    Some(meta) => {
                        if let Some(msg_id) = message_id {
                            let _ = self.telegram.delete_message(chat_id, msg_id).await;
                        }
                        if let Err(e) = self.run_transfer(chat_id, user_id, meta).await {
                            self.report_failure(chat_id, &e).await;
                        }
                    }
                    None => {
                        let _ = self
                            .telegram
                            .send_message(chat_id, "⌛ That link has expired. Send it again.")
                            .await;
                    }
                }
            }
            CallbackAction::CancelTransfer(id) => {
                if let Some(flag) = self.active.lock().unwrap().get(&id) {
                    info!("🚫 Cancel requested for transfer {}", id);
                    flag.cancel();
                }
            }
            CallbackAction::ToggleVideo => {
                let settings = self.db.toggle_upload_as_video(user_id).unwrap_or_default();
                self.show_panel(
                    chat_id,
                    message_id,
                    &progress::settings_text(&settings),
                    callback::settings_keyboard(&settings),
                )
                .await;
            }
            CallbackAction::ToggleAuto => {
                let settings = self.db.toggle_auto_upload(user_id).unwrap_or_default();
                self.show_panel(
                    chat_id,
                    message_id,
                    &progress::settings_text(&settings),
                    callback::settings_keyboard(&settings),
                )
                .await;
            }
            CallbackAction::Settings => self.show_settings(chat_id, message_id, user_id).await,
            CallbackAction::Help => {
                self.show_panel(
                    chat_id,
                    message_id,
                    &progress::help_text(),
                    callback::main_menu_keyboard(),
                )
                .await;
            }
            CallbackAction::Stats => self.show_stats(chat_id, message_id, user_id).await,
            CallbackAction::MainMenu => {
                self.show_panel(
                    chat_id,
                    message_id,
                    &progress::welcome_text(),
                    callback::main_menu_keyboard(),
                )
                .await;
            }
        }
    }

    pub async fn show_welcome(&self, chat_id: i64) {
        self.show_panel(
            chat_id,
            None,
            &progress::welcome_text(),
            callback::main_menu_keyboard(),
        )
        .await;
    }

    pub async fn show_help(&self, chat_id: i64) {
        self.show_panel(
            chat_id,
            None,
            &progress::help_text(),
            callback::main_menu_keyboard(),
        )
        .await;
    }

    pub async fn show_settings(&self, chat_id: i64, message_id: Option<i64>, user_id: i64) {
        let settings = self.db.get_settings(user_id).unwrap_or_default();
        self.show_panel(
            chat_id,
            message_id,
            &progress::settings_text(&settings),
            callback::settings_keyboard(&settings),
        )
        .await;
    }

    pub async fn show_stats(&self, chat_id: i64, message_id: Option<i64>, user_id: i64) {
        let user = self.db.user_totals(user_id).unwrap_or_default();
        let global = self.db.totals().unwrap_or_default();
        self.show_panel(
            chat_id,
            message_id,
            &progress::stats_text(&user, &global),
            callback::main_menu_keyboard(),
        )
        .await;
    }

    /// Edit a menu in place when we know its message, otherwise send fresh.
    async fn show_panel(
        &self,
        chat_id: i64,
        message_id: Option<i64>,
        text: &str,
        keyboard: teloxide::types::InlineKeyboardMarkup,
    ) {
        let result = match message_id {
            Some(msg_id) => {
                self.telegram
                    .edit_message_with_keyboard(chat_id, msg_id, text, keyboard)
                    .await
            }
            None => self
                .telegram
                .send_message_with_keyboard(chat_id, text, keyboard)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Failed to show panel: {e}");
        }
    }

    async fn report_failure(&self, chat_id: i64, err: &RelayError) {
        warn!("Relay failed: {err}");
        let text = err.user_message();
        let keyboard = err.direct_url().and_then(callback::direct_link_keyboard);
        let result = match keyboard {
            Some(kb) => self
                .telegram
                .send_message_with_keyboard(chat_id, &text, kb)
                .await,
            None => self.telegram.send_message(chat_id, &text).await,
        };
        if let Err(e) = result {
            warn!("Failed to report failure: {e}");
        }
    }

    /// Run one full transfer, keeping its cancel flag registered for the
    /// duration and its outcome recorded whatever happens.
    pub async fn run_transfer(
        &self,
        chat_id: i64,
        user_id: i64,
        meta: FileMetadata,
    ) -> Result<(), RelayError> {
        let transfer_id = self
            .next_transfer_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let cancel = CancelFlag::new();
        self.active
            .lock()
            .unwrap()
            .insert(transfer_id.clone(), cancel.clone());

        let result = self
            .run_transfer_inner(chat_id, user_id, &meta, &transfer_id, &cancel)
            .await;

        self.active.lock().unwrap().remove(&transfer_id);

        if let Err(e) = &result {
            warn!("Transfer {} failed: {e}", transfer_id);
            if let Err(db_err) = self
                .db
                .record_transfer(user_id, &meta.display_name, 0, "failed")
            {
                warn!("Failed to record transfer: {db_err}");
            }
        }
        result
    }

    async fn run_transfer_inner(
        &self,
        chat_id: i64,
        user_id: i64,
        meta: &FileMetadata,
        transfer_id: &str,
        cancel: &CancelFlag,
    ) -> Result<(), RelayError> {
        info!("⬇️ Transfer {} starting: {}", transfer_id, meta.display_name);

        let mut source = open_within_ceiling(
            meta.reported_size,
            self.config.max_transfer_bytes,
            || async {
                HttpSource::open(&self.stream_client, &meta.direct_url)
                    .await
                    .map_err(|reason| RelayError::Download {
                        reason,
                        direct_url: meta.direct_url.clone(),
                    })
            },
        )
        .await?;

        // The origin's Content-Length overrides the extractor's parsed size.
        if transfer::exceeds_ceiling(source.total_bytes(), self.config.max_transfer_bytes) {
            return Err(RelayError::TooLarge {
                size: source.total_bytes().unwrap_or(0),
                limit: self.config.max_transfer_bytes,
            });
        }

        let status_id = self
            .telegram
            .send_message_with_keyboard(
                chat_id,
                &format!("⬇️ Downloading: {}", meta.display_name),
                callback::cancel_keyboard(transfer_id),
            )
            .await
            .ok();

        let mut staging = self.make_staging(transfer_id).map_err(|reason| {
            RelayError::Download {
                reason,
                direct_url: meta.direct_url.clone(),
            }
        })?;

        let mut reporter = EditReporter {
            telegram: &self.telegram,
            chat_id,
            message_id: status_id,
            name: meta.display_name.clone(),
            transfer_id: transfer_id.to_string(),
        };

        let sink: &mut dyn ChunkSink = &mut staging;
        let outcome = transfer::run(&mut source, sink, &mut reporter, cancel)
            .await
            .map_err(|reason| {
                staging.cleanup();
                RelayError::Download {
                    reason,
                    direct_url: meta.direct_url.clone(),
                }
            })?;

        let bytes = match outcome {
            TransferOutcome::Cancelled => {
                staging.cleanup();
                if let Some(msg_id) = status_id {
                    let _ = self
                        .telegram
                        .edit_message(chat_id, msg_id, &progress::cancelled_text())
                        .await;
                }
                if let Err(e) =
                    self.db
                        .record_transfer(user_id, &meta.display_name, 0, "cancelled")
                {
                    warn!("Failed to record transfer: {e}");
                }
                info!("🚫 Transfer {} cancelled", transfer_id);
                return Ok(());
            }
            TransferOutcome::Completed(bytes) => bytes,
        };

        let staged = match staging.finish() {
            Ok(staged) => staged,
            Err(reason) => {
                staging.cleanup();
                return Err(RelayError::Download {
                    reason,
                    direct_url: meta.direct_url.clone(),
                });
            }
        };

        if let Some(msg_id) = status_id {
            let _ = self
                .telegram
                .edit_message(
                    chat_id,
                    msg_id,
                    &progress::uploading_text(&meta.display_name, bytes),
                )
                .await;
        }
        let _ = self.telegram.send_upload_action(chat_id).await;

        let settings = self.db.get_settings(user_id).unwrap_or_default();
        let kind = deliver::classify(&meta.display_name);
        let plan = deliver::plan(kind, bytes, &settings);

        let delivery = deliver::deliver(
            &self.telegram,
            chat_id,
            &staged,
            &meta.display_name,
            plan,
        )
        .await;

        // The staged copy goes away on success and on failure alike.
        staging.cleanup();

        delivery.map_err(|reason| RelayError::Upload {
            reason,
            direct_url: meta.direct_url.clone(),
        })?;

        if let Err(e) = self
            .db
            .record_transfer(user_id, &meta.display_name, bytes, "completed")
        {
            warn!("Failed to record transfer: {e}");
        }

        if let Some(msg_id) = status_id {
            let _ = self
                .telegram
                .edit_message(
                    chat_id,
                    msg_id,
                    &progress::completed_text(&meta.display_name, bytes),
                )
                .await;
        }

        info!("✅ Transfer {} completed ({} bytes)", transfer_id, bytes);
        Ok(())
    }

    fn make_staging(&self, transfer_id: &str) -> Result<Box<dyn Staging>, String> {
        match self.config.storage {
            StorageBackend::Disk => {
                let staging =
                    DiskStaging::create(&self.config.data_dir.join("staging"), transfer_id)?;
                Ok(Box::new(staging))
            }
            StorageBackend::Memory => Ok(Box::new(MemoryStaging::new())),
            StorageBackend::Sqlite => Ok(Box::new(SqliteStaging::new(
                self.db.clone(),
                transfer_id,
            ))),
        }
    }
}

/// Apply the size guard and open the streaming source only when it passes.
/// A file whose known size exceeds the ceiling never issues the GET.
async fn open_within_ceiling<S, Fut>(
    reported_size: Option<u64>,
    limit: u64,
    open: impl FnOnce() -> Fut,
) -> Result<S, RelayError>
where
    Fut: std::future::Future<Output = Result<S, RelayError>>,
{
    if transfer::exceeds_ceiling(reported_size, limit) {
        return Err(RelayError::TooLarge {
            size: reported_size.unwrap_or(0),
            limit,
        });
    }
    open().await
}

/// Progress reporter that edits the transfer's status message. Edit failures
/// are logged and dropped so a flaky status message cannot kill a transfer.
struct EditReporter<'a> {
    telegram: &'a TelegramClient,
    chat_id: i64,
    message_id: Option<i64>,
    name: String,
    transfer_id: String,
}

#[async_trait]
impl ProgressReporter for EditReporter<'_> {
    async fn report(&mut self, snapshot: &TransferSnapshot) {
        let Some(msg_id) = self.message_id else {
            return;
        };
        let text = progress::download_progress(&self.name, snapshot);
        if let Err(e) = self
            .telegram
            .edit_message_with_keyboard(
                self.chat_id,
                msg_id,
                &text,
                callback::cancel_keyboard(&self.transfer_id),
            )
            .await
        {
            warn!("Progress edit failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_oversize_guard_skips_source_open() {
        let opened = AtomicBool::new(false);
        let result: Result<u32, RelayError> = open_within_ceiling(Some(11), 10, || async {
            opened.store(true, Ordering::Relaxed);
            Ok(7)
        })
        .await;

        assert!(matches!(
            result,
            Err(RelayError::TooLarge { size: 11, limit: 10 })
        ));
        assert!(!opened.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_within_ceiling_opens_source() {
        let result: Result<u32, RelayError> =
            open_within_ceiling(Some(10), 10, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unknown_size_opens_source() {
        let result: Result<u32, RelayError> =
            open_within_ceiling(None, 10, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
