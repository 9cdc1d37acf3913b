use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::User;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use chattgb::chatbot::commands::{Command, parse_command};
use chattgb::chatbot::images::prepare_image;
use chattgb::chatbot::tokens::CharEstimate;
use chattgb::chatbot::{
    CallbackPress, ChatbotConfig, ChatbotEngine, Database, HistoryManager, IncomingMessage, Media, OpenAiClient,
    Reply, ReplyTo, TelegramClient,
};
use chattgb::config::Config;
use chattgb::telegram_log::TelegramLogLayer;

const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again later.";

struct BotState {
    engine: ChatbotEngine<OpenAiClient>,
    telegram: TelegramClient,
    bot_user_id: UserId,
    bot_username: String,
}

fn exit_with(msg: String) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "chattgb.json".to_string());
    let config = Config::load(&config_path).unwrap_or_else(|e| exit_with(e.to_string()));

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        exit_with(format!("Failed to create {}: {e}", log_dir.display()));
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("chattgb.log"))
        .unwrap_or_else(|e| exit_with(format!("Failed to open log file: {e}")));
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
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
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting chattgb...");
    info!("Loaded config from {config_path}");
    info!(
        "Model {} via {}, history budget {} tokens, transcription with {}",
        config.model,
        config.openai_base_url,
        config.history_budget.ceiling(),
        config.transcription_model
    );

    let state = match BotState::new(config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {e}");
            exit_with(e);
        }
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

impl BotState {
    async fn new(config: Config, bot: &Bot) -> Result<Self, String> {
        let me = bot.get_me().await.map_err(|e| format!("Failed to get bot info: {e}"))?;
        let bot_username = me.username().to_string();
        info!("Bot user ID: {}, username: @{}", me.id, bot_username);

        let database = Database::open(&config.database_path())
            .map_err(|e| format!("Failed to open database: {e}"))?;
        let history = HistoryManager::new(config.history_budget, CharEstimate);
        let model = OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.model.clone(),
        )
        .map_err(|e| e.to_string())?
        .with_transcription_model(config.transcription_model.clone());

        let chatbot_config = ChatbotConfig {
            bot_username: bot_username.clone(),
            allowed_chat_ids: config.allowed_chat_ids.clone(),
            bot_admins: config.bot_admins.clone(),
            max_output_tokens: config.max_output_tokens,
            moderation: config.moderation,
        };
        info!(
            "Allowed chats: {:?}, admins: {:?}",
            chatbot_config.allowed_chat_ids, chatbot_config.bot_admins
        );

        Ok(Self {
            engine: ChatbotEngine::new(chatbot_config, Arc::new(database), history, model),
            telegram: TelegramClient::new(bot.clone()),
            bot_user_id: me.id,
            bot_username,
        })
    }

    fn is_allowed(&self, chat_id: i64) -> bool {
        self.engine.config().allowed_chat_ids.contains(&chat_id)
    }

    /// Whether the message will go to the model (used for the typing indicator).
    fn expects_answer(&self, msg: &IncomingMessage) -> bool {
        if !self.is_allowed(msg.chat_id) {
            return false;
        }
        match parse_command(&msg.text, &self.bot_username) {
            Some(Command::Chat(_)) => true,
            Some(_) => false,
            None => msg.is_private || msg.is_reply_to_bot(),
        }
    }
}

fn display_name(user: &User) -> String {
    user.username.clone().unwrap_or_else(|| user.first_name.clone())
}

/// File id of the image attached to the message: the largest photo size, a
/// static sticker or an image sent as a document.
fn image_file_id(msg: &Message) -> Option<String> {
    if let Some(photos) = msg.photo() {
        return photos
            .iter()
            .max_by_key(|p| p.width * p.height)
            .map(|p| p.file.id.0.clone());
    }
    if let Some(sticker) = msg.sticker()
        && sticker.is_static()
    {
        return Some(sticker.file.id.0.clone());
    }
    msg.document()
        .filter(|d| d.mime_type.as_ref().is_some_and(|m| m.essence_str().starts_with("image/")))
        .map(|d| d.file.id.0.clone())
}

async fn to_incoming(msg: &Message, user: &User, state: &BotState) -> IncomingMessage {
    let chat_id = msg.chat.id.0;
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    let reply_to = msg.reply_to_message().map(|reply| {
        let reply_user = reply.from.as_ref();
        ReplyTo {
            message_id: reply.id.0 as i64,
            user_id: reply_user.map(|u| u.id.0 as i64),
            username: reply_user.map(display_name),
            text: reply.text().or(reply.caption()).unwrap_or("").to_string(),
            from_bot_itself: reply_user.is_some_and(|u| u.id == state.bot_user_id),
        }
    });

    let mut incoming = IncomingMessage {
        message_id: msg.id.0 as i64,
        chat_id,
        user_id: user.id.0 as i64,
        username: display_name(user),
        is_private: msg.chat.is_private(),
        text,
        reply_to,
        images: Vec::new(),
        voice: None,
        document: None,
    };

    // Nothing is downloaded for chats the bot doesn't serve.
    if !state.is_allowed(chat_id) {
        return incoming;
    }

    if matches!(
        parse_command(&incoming.text, &state.bot_username),
        Some(Command::ImportHistory)
    ) {
        let document = msg
            .document()
            .or_else(|| msg.reply_to_message().and_then(|r| r.document()));
        if let Some(doc) = document {
            match state.telegram.download(&doc.file.id.0).await {
                Ok(bytes) => incoming.document = Some(bytes),
                Err(e) => warn!("Failed to download history document: {e}"),
            }
        }
        return incoming;
    }

    if let Some(file_id) = image_file_id(msg) {
        match state.telegram.download(&file_id).await {
            Ok(bytes) => match tokio::task::spawn_blocking(move || prepare_image(&bytes)).await {
                Ok(Ok(media)) => incoming.images.push(media),
                Ok(Err(e)) => warn!("Skipping image in message {}: {e}", incoming.message_id),
                Err(e) => warn!("Image task failed: {e}"),
            },
            Err(e) => warn!("Failed to download image: {e}"),
        }
    }

    if let Some(voice) = msg.voice() {
        match state.telegram.download(&voice.file.id.0).await {
            Ok(bytes) => {
                incoming.voice = Some(Media {
                    bytes,
                    content_type: voice
                        .mime_type
                        .as_ref()
                        .map(|m| m.essence_str().to_string())
                        .unwrap_or_else(|| "audio/ogg".to_string()),
                })
            }
            Err(e) => warn!("Failed to download voice message: {e}"),
        }
    }

    incoming
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let incoming = to_incoming(&msg, user, &state).await;
    if state.expects_answer(&incoming) {
        state.telegram.typing(incoming.chat_id).await;
    }

    let reply = match state.engine.handle_message(&incoming).await {
        Ok(Some(reply)) => reply,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(
                "Failed to handle message {} in chat {}: {e}",
                incoming.message_id, incoming.chat_id
            );
            Reply::Text(GENERIC_FAILURE.to_string())
        }
    };

    // Failures are already logged by the client.
    let _ = state
        .telegram
        .send_reply(incoming.chat_id, incoming.message_id, reply)
        .await;
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    let (Some(data), Some(menu_msg)) = (query.data.as_deref(), query.regular_message()) else {
        return Ok(());
    };

    let press = CallbackPress {
        chat_id: menu_msg.chat.id.0,
        from_user_id: query.from.id.0 as i64,
        requested_by: menu_msg
            .reply_to_message()
            .and_then(|m| m.from.as_ref())
            .map(|u| u.id.0 as i64),
        data: data.to_string(),
        current_text: menu_msg.text().unwrap_or("").to_string(),
    };

    match state.engine.handle_callback(&press) {
        Ok(Some(menu)) => {
            let _ = state
                .telegram
                .edit_menu(press.chat_id, menu_msg.id.0 as i64, &menu)
                .await;
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to handle settings press in chat {}: {e}", press.chat_id),
    }
    Ok(())
}
