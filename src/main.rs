use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::MaybeInaccessibleMessage;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use teraferry::config::Config;
use teraferry::health;
use teraferry::relay::callback;
use teraferry::relay::{Database, Relay};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Settings,
    Stats,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "teraferry.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    std::fs::create_dir_all(&config.data_dir).ok();

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("teraferry.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting teraferry...");
    info!("Loaded config from {config_path}");

    let db = match Database::open(&config.data_dir.join("teraferry.db")) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(port) = config.health_port {
        tokio::spawn(health::serve(port));
    }

    let bot = Bot::new(config.telegram_bot_token.clone());
    let relay = Arc::new(Relay::new(config, bot.clone(), db));

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, relay: Arc<Relay>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

    match cmd {
        Command::Start => relay.show_welcome(chat_id).await,
        Command::Help => relay.show_help(chat_id).await,
        Command::Settings => relay.show_settings(chat_id, None, user_id).await,
        Command::Stats => relay.show_stats(chat_id, None, user_id).await,
    }
    Ok(())
}

async fn handle_message(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    // Long transfers must not block the dispatcher.
    let relay = relay.clone();
    let chat_id = msg.chat.id.0;
    let user_id = user.id.0 as i64;
    let text = text.to_string();
    tokio::spawn(async move {
        relay.handle_text(chat_id, user_id, &text).await;
    });

    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, relay: Arc<Relay>) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone()).await.ok();

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(action) = callback::parse(data) else {
        warn!("Unknown callback data: {data}");
        return Ok(());
    };

    let (chat_id, message_id) = match q.message {
        Some(MaybeInaccessibleMessage::Regular(ref m)) => (m.chat.id.0, Some(m.id.0 as i64)),
        Some(MaybeInaccessibleMessage::Inaccessible(ref m)) => (m.chat.id.0, None),
        None => return Ok(()),
    };
    let user_id = q.from.id.0 as i64;

    let relay = relay.clone();
    tokio::spawn(async move {
        relay
            .handle_callback(chat_id, message_id, user_id, action)
            .await;
    });

    Ok(())
}
