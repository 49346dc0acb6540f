//! WeGram — bidirectional WeChat <-> Telegram bridge.
//!
//! `wegram start` runs the bridge; `wegram login` authorizes the Telegram
//! user session interactively. Each subsystem (bot poller, user session,
//! callback server or queue consumer) runs as its own long-lived task and
//! talks to the others over channels and shared handles.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use wegram::bot::BotClient;
use wegram::commands::CommandSurface;
use wegram::config::{Config, TgMode, WechatMode};
use wegram::correlator::Correlator;
use wegram::dispatch::{self, Dispatcher, StatusNotifier, WorkHandler, WorkerPool};
use wegram::gateway::{GatewayClient, GroupMemberCache};
use wegram::locales::Locale;
use wegram::provision::Provisioner;
use wegram::registry::{ContactRegistry, StickerIndex};
use wegram::revoke::Revoker;
use wegram::tg2wx::TgToWx;
use wegram::user_client::{self, SessionConfig, UserEvent};
use wegram::wechat::AddMsg;
use wegram::wx2tg::WxToTg;

/// Long-poll timeout for `getUpdates`.
const POLL_TIMEOUT_SECS: u32 = 30;

#[derive(Parser)]
#[command(name = "wegram", about = "WeChat <-> Telegram bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge (default).
    Start,
    /// Authorize the Telegram user session.
    Login,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Start) {
        Command::Start => start().await,
        Command::Login => login().await,
    }
}

async fn login() -> Result<()> {
    wegram::logging::init_cli();
    let config = Config::from_env()?;
    let session = session_config(&config, String::new());
    user_client::interactive_login(&session)
        .await
        .context("interactive login failed")?;
    Ok(())
}

fn session_config(config: &Config, bot_username: String) -> SessionConfig {
    SessionConfig {
        session_file: config.paths.session_file.clone(),
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        phone_number: config.phone_number.clone(),
        device_model: config.device_model.clone(),
        bot_username,
    }
}

async fn start() -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let _logging_guard = wegram::logging::init_production(&config.paths.logs_dir)?;
    info!("wegram starting");

    let locale = Locale::from_lang(&config.lang);

    // Clients.
    let gateway = GatewayClient::new(&config.base_url, &config.my_wxid);
    let bot = BotClient::new(&config.bot_token);
    let me = bot.get_me().await.context("bot token check failed")?;
    let bot_username = me
        .username
        .clone()
        .context("bot account has no username")?;
    info!(bot = %bot_username, "bot authorized");

    // Persistent state.
    let registry = ContactRegistry::open(&config.paths.contact_db)
        .await
        .context("failed to open contact registry")?;
    let stickers = Arc::new(StickerIndex::load(config.paths.sticker_json.clone()));
    let groups = Arc::new(GroupMemberCache::load(config.paths.group_json.clone()));
    let correlator = Arc::new(
        Correlator::open(config.paths.msgid_dir.clone())
            .context("failed to open correlator store")?,
    );

    // Shutdown signal shared by every subsystem.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // User session actor.
    let session_cfg = session_config(&config, bot_username);
    let session_client = user_client::connect(&session_cfg)
        .await
        .context("user session connect failed")?;
    let (user, mut user_events) =
        user_client::spawn(session_client, session_cfg, shutdown_rx.clone());
    let bot_dm_chat_id = user.user_id().await.context("cannot resolve session user")?;
    info!(user_id = bot_dm_chat_id, "user session ready");

    // Provisioning and translators.
    let provisioner = Provisioner::new(
        user.clone(),
        registry.clone(),
        &config.chat_folder,
        &config.official_folder,
    );
    let wx2tg = WxToTg::new(
        Arc::clone(&config),
        gateway.clone(),
        bot.clone(),
        registry.clone(),
        Arc::clone(&stickers),
        Arc::clone(&correlator),
        Arc::clone(&groups),
        Arc::clone(&provisioner),
    );
    let tg2wx = TgToWx::new(
        Arc::clone(&config),
        gateway.clone(),
        bot.clone(),
        registry.clone(),
        Arc::clone(&stickers),
        Arc::clone(&correlator),
        Some(user.clone()),
    );
    let revoker = Revoker::new(gateway.clone(), Arc::clone(&correlator), bot.clone(), locale);
    let commands = CommandSurface::new(
        Arc::clone(&config),
        gateway.clone(),
        bot.clone(),
        registry.clone(),
        Arc::clone(&groups),
        Arc::clone(&revoker),
        bot_dm_chat_id,
        shutdown_rx.clone(),
    );
    if let Err(e) = bot.set_my_commands(&commands.menu()).await {
        warn!(error = %e, "failed to register command menu");
    }

    // Inbound fan-out: per-contact serial workers.
    let inbound_translator = Arc::clone(&wx2tg);
    let inbound_handler: WorkHandler<AddMsg> = Arc::new(move |_key, msg| {
        let translator = Arc::clone(&inbound_translator);
        Box::pin(async move { translator.handle(msg).await })
    });
    let inbound_pool = WorkerPool::new(inbound_handler);
    tokio::spawn(Arc::clone(&inbound_pool).run_sweeper(shutdown_rx.clone()));

    let notifier_bot = bot.clone();
    let notifier: StatusNotifier = Arc::new(move |online| {
        let bot = notifier_bot.clone();
        Box::pin(async move {
            let key = if online { "online" } else { "offline" };
            if let Err(e) = bot
                .send_message(bot_dm_chat_id, locale.common(key), None)
                .await
            {
                warn!(error = %e, "failed to deliver status notice");
            }
        })
    });
    let dispatcher = Dispatcher::new(
        &config.my_wxid,
        config.dedup_capacity,
        Arc::clone(&inbound_pool),
        notifier,
    );

    // Outbound fan-out: per-Telegram-chat serial workers keep sends, edits
    // and deletes in the same chat ordered.
    let outbound_commands = Arc::clone(&commands);
    let outbound_translator = Arc::clone(&tg2wx);
    let outbound_handler: WorkHandler<wegram::bot::Message> = Arc::new(move |_key, msg| {
        let commands = Arc::clone(&outbound_commands);
        let translator = Arc::clone(&outbound_translator);
        Box::pin(async move {
            if !commands.handle_message(&msg).await {
                translator.handle_bot_message(msg).await;
            }
        })
    });
    let outbound_pool = WorkerPool::new(outbound_handler);
    tokio::spawn(Arc::clone(&outbound_pool).run_sweeper(shutdown_rx.clone()));

    // WeChat ingress: callback sink or broker queue.
    match config.wechat_mode {
        WechatMode::Callback => {
            let my_wxid = config.my_wxid.clone();
            let port = config.callback_port;
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatch::callback::serve(&my_wxid, port, dispatcher, shutdown).await
                {
                    error!(error = %e, "callback server failed");
                }
            });
        }
        WechatMode::Queue => {
            let url = config.rabbitmq_url.clone();
            let queue_name = config.my_wxid.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                dispatch::queue::consume(&url, &queue_name, dispatcher, shutdown).await;
            });
        }
    }

    // User-session events: own sends feed the outbound translator, deletes
    // feed the revoker.
    {
        let tg2wx = Arc::clone(&tg2wx);
        let revoker = Arc::clone(&revoker);
        tokio::spawn(async move {
            while let Some(event) = user_events.recv().await {
                match event {
                    UserEvent::OwnMessage(msg) => tg2wx.handle_session_message(msg).await,
                    UserEvent::Deleted { message_ids } => {
                        revoker.handle_session_deletes(&message_ids).await;
                    }
                }
            }
        });
    }

    // Telegram ingress.
    if config.tg_mode == TgMode::Webhook {
        // Certificates terminate upstream; the webhook listener is plain
        // HTTP behind the proxy.
        if let Some(domain) = &config.webhook_domain {
            let url = format!("https://{domain}:{}/webhook", config.webhook_port);
            bot.set_webhook(&url).await.context("setWebhook failed")?;
            info!(%url, "webhook registered");
        }
        run_webhook(
            &bot,
            config.webhook_port,
            Arc::clone(&outbound_pool),
            Arc::clone(&commands),
            shutdown_rx.clone(),
        )
        .await?;
    } else {
        run_polling(
            &bot,
            Arc::clone(&outbound_pool),
            Arc::clone(&commands),
            shutdown_rx.clone(),
        )
        .await;
    }

    // Graceful teardown: drain both worker pools within their budget.
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    dispatcher.shutdown().await;
    outbound_pool.shutdown().await;
    info!("wegram stopped");
    Ok(())
}

/// Long-poll `getUpdates` until ctrl-c, feeding the per-chat workers.
async fn run_polling(
    bot: &BotClient,
    pool: Arc<WorkerPool<wegram::bot::Message>>,
    commands: Arc<CommandSurface>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut offset: Option<i64> = None;
    loop {
        let updates = tokio::select! {
            result = bot.get_updates(offset, POLL_TIMEOUT_SECS) => result,
            _ = tokio::signal::ctrl_c() => return,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id.saturating_add(1));
            route_update(update, &pool, &commands).await;
        }
    }
}

/// Webhook listener delivering updates into the same per-chat workers.
async fn run_webhook(
    _bot: &BotClient,
    port: u16,
    pool: Arc<WorkerPool<wegram::bot::Message>>,
    commands: Arc<CommandSurface>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    use axum::routing::post;

    #[derive(Clone)]
    struct WebhookState {
        pool: Arc<WorkerPool<wegram::bot::Message>>,
        commands: Arc<CommandSurface>,
    }

    async fn handle(
        axum::extract::State(state): axum::extract::State<WebhookState>,
        axum::Json(update): axum::Json<wegram::bot::Update>,
    ) -> axum::http::StatusCode {
        route_update(update, &state.pool, &state.commands).await;
        axum::http::StatusCode::OK
    }

    let app = axum::Router::new()
        .route("/webhook", post(handle))
        .with_state(WebhookState { pool, commands });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "webhook listener ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = shutdown.changed() => {}
            }
        })
        .await?;
    Ok(())
}

async fn route_update(
    update: wegram::bot::Update,
    pool: &Arc<WorkerPool<wegram::bot::Message>>,
    commands: &Arc<CommandSurface>,
) {
    if let Some(query) = update.callback_query {
        commands.handle_callback(&query).await;
        return;
    }
    // Edited messages are translated like fresh ones; WeChat has no edit
    // semantics to target.
    let Some(message) = update.message.or(update.edited_message) else {
        return;
    };
    let key = message.chat.id.to_string();
    if let Err(e) = pool.dispatch(&key, message).await {
        warn!(error = %e, "outbound dispatch failed");
    }
}
