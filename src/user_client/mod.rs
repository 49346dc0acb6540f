//! Telegram user-session client (MTProto).
//!
//! A handful of operations need the user account rather than the bot:
//! creating mirror groups, promoting the bot, folder placement, and
//! observing the user's own sends and deletes (the bot never sees either).
//! The session runs as an actor owning the connection; other subsystems
//! talk to it through [`UserClientHandle`], whose calls are awaited with a
//! 30 s budget.

use std::path::PathBuf;
use std::time::Duration;

use grammers_client::{Client, Config, InitParams, Update};
use grammers_session::Session;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub mod folders;

use folders::{input_peer_for, plan_folder_update, FolderPlan};

/// Budget for cross-task calls into the session actor.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Dialogs scanned when resolving a chat by id.
const DIALOG_SCAN_LIMIT: usize = 50;

/// Dialogs scanned by the group-creation fallback.
const CREATE_FALLBACK_SCAN: usize = 20;

/// User-session errors.
#[derive(Debug, Error)]
pub enum UserClientError {
    /// Session connect/auth failure.
    #[error("session error: {0}")]
    Session(String),
    /// An MTProto invocation failed.
    #[error("invocation failed: {0}")]
    Invocation(String),
    /// The actor did not answer within the call budget.
    #[error("user-session call timed out")]
    Timeout,
    /// The actor is gone.
    #[error("user-session actor stopped")]
    ActorStopped,
    /// The requested entity could not be found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<grammers_client::InvocationError> for UserClientError {
    fn from(e: grammers_client::InvocationError) -> Self {
        UserClientError::Invocation(e.to_string())
    }
}

/// A message observed or fetched on the user session.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    /// User-session message id.
    pub id: i64,
    /// Bot-API style chat id (negative for groups).
    pub chat_id: i64,
    /// Text body (empty for media).
    pub text: String,
    /// Send time, epoch seconds.
    pub date: i64,
    /// Whether the account itself sent it.
    pub outgoing: bool,
}

/// Events observed on the user session and fed to the outbound translator.
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// The user sent a message from their own client into a group.
    OwnMessage(SessionMessage),
    /// Messages were deleted; ids are user-session ids.
    Deleted { message_ids: Vec<i64> },
}

enum Request {
    CreateGroup {
        title: String,
        reply: oneshot::Sender<Result<i64, UserClientError>>,
    },
    PromoteBot {
        chat_id: i64,
        reply: oneshot::Sender<Result<(), UserClientError>>,
    },
    SetGroupPhoto {
        chat_id: i64,
        jpeg: Vec<u8>,
        reply: oneshot::Sender<Result<(), UserClientError>>,
    },
    MoveToFolder {
        chat_id: i64,
        folder: String,
        reply: oneshot::Sender<Result<(), UserClientError>>,
    },
    RecentOwnMessages {
        chat_id: i64,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<SessionMessage>, UserClientError>>,
    },
    UserId {
        reply: oneshot::Sender<Result<i64, UserClientError>>,
    },
}

/// Cheap-to-clone handle submitting requests to the session actor.
#[derive(Clone)]
pub struct UserClientHandle {
    tx: mpsc::Sender<Request>,
}

impl UserClientHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, UserClientError>>) -> Request,
    ) -> Result<T, UserClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| UserClientError::ActorStopped)?;
        match tokio::time::timeout(CALL_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UserClientError::ActorStopped),
            Err(_) => Err(UserClientError::Timeout),
        }
    }

    /// Create a basic group titled `title` with the bot as the only invited
    /// member. Returns the Bot-API chat id (negative).
    pub async fn create_group(&self, title: &str) -> Result<i64, UserClientError> {
        let title = title.to_owned();
        self.call(move |reply| Request::CreateGroup { title, reply })
            .await
    }

    /// Promote the bot to administrator in a basic group.
    pub async fn promote_bot(&self, chat_id: i64) -> Result<(), UserClientError> {
        self.call(move |reply| Request::PromoteBot { chat_id, reply })
            .await
    }

    /// Upload and assign a group photo (square JPEG bytes).
    pub async fn set_group_photo(&self, chat_id: i64, jpeg: Vec<u8>) -> Result<(), UserClientError> {
        self.call(move |reply| Request::SetGroupPhoto { chat_id, jpeg, reply })
            .await
    }

    /// Place a chat into the named folder, creating it if missing.
    pub async fn move_to_folder(&self, chat_id: i64, folder: &str) -> Result<(), UserClientError> {
        let folder = folder.to_owned();
        self.call(move |reply| Request::MoveToFolder { chat_id, folder, reply })
            .await
    }

    /// The most recent messages sent by the account itself in a chat.
    pub async fn recent_own_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<SessionMessage>, UserClientError> {
        self.call(move |reply| Request::RecentOwnMessages { chat_id, limit, reply })
            .await
    }

    /// The session account's user id (also the bot-DM chat id).
    pub async fn user_id(&self) -> Result<i64, UserClientError> {
        self.call(move |reply| Request::UserId { reply }).await
    }
}

/// Connection settings for the session.
pub struct SessionConfig {
    pub session_file: PathBuf,
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    pub device_model: String,
    pub bot_username: String,
}

/// Connect the user session, failing when it has never been authorized.
pub async fn connect(config: &SessionConfig) -> Result<Client, UserClientError> {
    if let Some(parent) = config.session_file.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| UserClientError::Session(format!("cannot create session dir: {e}")))?;
    }
    let session = Session::load_file_or_create(&config.session_file)
        .map_err(|e| UserClientError::Session(format!("cannot load session: {e}")))?;

    let client = Client::connect(Config {
        session,
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        params: InitParams {
            device_model: config.device_model.clone(),
            ..InitParams::default()
        },
    })
    .await
    .map_err(|e| UserClientError::Session(e.to_string()))?;

    let authorized = client
        .is_authorized()
        .await
        .map_err(|e| UserClientError::Session(e.to_string()))?;
    if !authorized {
        return Err(UserClientError::Session(
            "session is not authorized; run `wegram login` first".to_owned(),
        ));
    }
    Ok(client)
}

/// Interactive first-time login (the `login` subcommand). Prompts for the
/// code Telegram sends to the account.
pub async fn interactive_login(config: &SessionConfig) -> Result<(), UserClientError> {
    if let Some(parent) = config.session_file.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| UserClientError::Session(format!("cannot create session dir: {e}")))?;
    }
    let session = Session::load_file_or_create(&config.session_file)
        .map_err(|e| UserClientError::Session(format!("cannot load session: {e}")))?;
    let client = Client::connect(Config {
        session,
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        params: InitParams {
            device_model: config.device_model.clone(),
            ..InitParams::default()
        },
    })
    .await
    .map_err(|e| UserClientError::Session(e.to_string()))?;

    if client
        .is_authorized()
        .await
        .map_err(|e| UserClientError::Session(e.to_string()))?
    {
        info!("session already authorized");
        return Ok(());
    }

    let token = client
        .request_login_code(&config.phone_number)
        .await
        .map_err(|e| UserClientError::Session(e.to_string()))?;
    println!("Enter the login code sent to {}:", config.phone_number);
    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .map_err(|e| UserClientError::Session(e.to_string()))?;
    client
        .sign_in(&token, code.trim())
        .await
        .map_err(|e| UserClientError::Session(format!("sign-in failed: {e}")))?;

    client
        .session()
        .save_to_file(&config.session_file)
        .map_err(|e| UserClientError::Session(format!("cannot save session: {e}")))?;
    info!("session authorized and saved");
    Ok(())
}

/// Spawn the session actor. Returns the request handle and the event stream.
pub fn spawn(
    client: Client,
    config: SessionConfig,
    shutdown: watch::Receiver<bool>,
) -> (UserClientHandle, mpsc::Receiver<UserEvent>) {
    let (req_tx, req_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(run_actor(client, config, req_rx, event_tx, shutdown));
    (UserClientHandle { tx: req_tx }, event_rx)
}

async fn run_actor(
    client: Client,
    config: SessionConfig,
    mut requests: mpsc::Receiver<Request>,
    events: mpsc::Sender<UserEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("user-session actor running");
    loop {
        tokio::select! {
            update = client.next_update() => {
                match update {
                    Ok(update) => observe_update(update, &events).await,
                    Err(e) => {
                        warn!(error = %e, "user-session update stream error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            request = requests.recv() => {
                match request {
                    Some(request) => serve_request(&client, &config, request).await,
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    if let Err(e) = client.session().save_to_file(&config.session_file) {
        warn!(error = %e, "failed to save session on shutdown");
    }
    info!("user-session actor stopped");
}

async fn observe_update(update: Update, events: &mpsc::Sender<UserEvent>) {
    match update {
        Update::NewMessage(message) if message.outgoing() => {
            let chat = message.chat();
            let chat_id = bot_api_chat_id(&chat);
            // Only group traffic matters; DMs have no mirror.
            if chat_id >= 0 {
                return;
            }
            let event = UserEvent::OwnMessage(SessionMessage {
                id: i64::from(message.id()),
                chat_id,
                text: message.text().to_owned(),
                date: message.date().timestamp(),
                outgoing: true,
            });
            let _ = events.send(event).await;
        }
        Update::MessageDeleted(deletion) => {
            let message_ids: Vec<i64> = deletion.messages().iter().map(|id| i64::from(*id)).collect();
            if !message_ids.is_empty() {
                let _ = events.send(UserEvent::Deleted { message_ids }).await;
            }
        }
        _ => {}
    }
}

async fn serve_request(client: &Client, config: &SessionConfig, request: Request) {
    match request {
        Request::CreateGroup { title, reply } => {
            let _ = reply.send(create_group(client, config, &title).await);
        }
        Request::PromoteBot { chat_id, reply } => {
            let _ = reply.send(promote_bot(client, config, chat_id).await);
        }
        Request::SetGroupPhoto { chat_id, jpeg, reply } => {
            let _ = reply.send(set_group_photo(client, chat_id, jpeg).await);
        }
        Request::MoveToFolder { chat_id, folder, reply } => {
            let _ = reply.send(move_to_folder(client, chat_id, &folder).await);
        }
        Request::RecentOwnMessages { chat_id, limit, reply } => {
            let _ = reply.send(recent_own_messages(client, chat_id, limit).await);
        }
        Request::UserId { reply } => {
            let result = client
                .get_me()
                .await
                .map(|me| me.id())
                .map_err(UserClientError::from);
            let _ = reply.send(result);
        }
    }
}

// ── Operations ──────────────────────────────────────────────────

/// Map a grammers chat to the Bot-API id space.
fn bot_api_chat_id(chat: &grammers_client::types::Chat) -> i64 {
    use grammers_client::types::Chat;
    match chat {
        Chat::User(user) => user.id(),
        Chat::Group(group) => -group.id(),
        Chat::Channel(channel) => -(1_000_000_000_000 + channel.id()),
    }
}

async fn resolve_bot_user(
    client: &Client,
    config: &SessionConfig,
) -> Result<tl::enums::InputUser, UserClientError> {
    let chat = client
        .resolve_username(&config.bot_username)
        .await?
        .ok_or_else(|| UserClientError::NotFound(format!("bot @{}", config.bot_username)))?;
    let packed = chat.pack();
    Ok(tl::enums::InputUser::User(tl::types::InputUser {
        user_id: packed.id,
        access_hash: packed.access_hash.unwrap_or(0),
    }))
}

async fn find_chat(
    client: &Client,
    chat_id: i64,
    scan: usize,
) -> Result<grammers_client::types::Chat, UserClientError> {
    let mut dialogs = client.iter_dialogs().limit(scan);
    while let Some(dialog) = dialogs
        .next()
        .await
        .map_err(|e| UserClientError::Invocation(e.to_string()))?
    {
        if bot_api_chat_id(dialog.chat()) == chat_id {
            return Ok(dialog.chat().clone());
        }
    }
    Err(UserClientError::NotFound(format!("chat {chat_id}")))
}

fn chat_id_from_updates(updates: &tl::enums::Updates) -> Option<i64> {
    let chats = match updates {
        tl::enums::Updates::Updates(u) => &u.chats,
        tl::enums::Updates::Combined(u) => &u.chats,
        _ => return None,
    };
    chats.iter().find_map(|chat| match chat {
        tl::enums::Chat::Chat(c) => Some(-c.id),
        _ => None,
    })
}

async fn create_group(
    client: &Client,
    config: &SessionConfig,
    title: &str,
) -> Result<i64, UserClientError> {
    let bot = resolve_bot_user(client, config).await?;
    let result = client
        .invoke(&tl::functions::messages::CreateChat {
            users: vec![bot],
            title: title.to_owned(),
            ttl_period: None,
        })
        .await?;

    let tl::enums::messages::InvitedUsers::Users(result) = result;
    if let Some(chat_id) = chat_id_from_updates(&result.updates) {
        info!(chat_id, title, "mirror group created");
        return Ok(chat_id);
    }

    // Ambiguous response: scan recent dialogs for a basic group with the
    // requested title.
    debug!(title, "create response was ambiguous, scanning dialogs");
    let mut dialogs = client.iter_dialogs().limit(CREATE_FALLBACK_SCAN);
    while let Some(dialog) = dialogs
        .next()
        .await
        .map_err(|e| UserClientError::Invocation(e.to_string()))?
    {
        if let grammers_client::types::Chat::Group(group) = dialog.chat() {
            if group.title() == title {
                return Ok(-group.id());
            }
        }
    }
    Err(UserClientError::NotFound(format!(
        "created group {title:?} not visible in dialogs"
    )))
}

async fn promote_bot(
    client: &Client,
    config: &SessionConfig,
    chat_id: i64,
) -> Result<(), UserClientError> {
    let bot = resolve_bot_user(client, config).await?;
    client
        .invoke(&tl::functions::messages::EditChatAdmin {
            chat_id: chat_id.abs(),
            user_id: bot,
            is_admin: true,
        })
        .await?;
    Ok(())
}

async fn set_group_photo(
    client: &Client,
    chat_id: i64,
    jpeg: Vec<u8>,
) -> Result<(), UserClientError> {
    let size = jpeg.len();
    let mut stream = std::io::Cursor::new(jpeg);
    let uploaded = client
        .upload_stream(&mut stream, size, "avatar.jpg".to_owned())
        .await
        .map_err(|e| UserClientError::Invocation(e.to_string()))?;

    client
        .invoke(&tl::functions::messages::EditChatPhoto {
            chat_id: chat_id.abs(),
            photo: tl::enums::InputChatPhoto::InputChatUploadedPhoto(
                tl::types::InputChatUploadedPhoto {
                    file: Some(uploaded.raw),
                    video: None,
                    video_start_ts: None,
                    video_emoji_markup: None,
                },
            ),
        })
        .await?;
    Ok(())
}

async fn move_to_folder(
    client: &Client,
    chat_id: i64,
    folder: &str,
) -> Result<(), UserClientError> {
    let filters = match client
        .invoke(&tl::functions::messages::GetDialogFilters {})
        .await?
    {
        tl::enums::messages::DialogFilters::Filters(df) => df.filters,
    };

    // Basic groups carry no access hash; supergroups do.
    let access_hash = match find_chat(client, chat_id, DIALOG_SCAN_LIMIT).await {
        Ok(chat) => chat.pack().access_hash,
        Err(_) => None,
    };
    let peer = input_peer_for(chat_id, access_hash);

    match plan_folder_update(&filters, folder, peer) {
        FolderPlan::AlreadyPresent => {
            debug!(chat_id, folder, "chat already in folder");
            Ok(())
        }
        FolderPlan::Update { id, filter } => {
            client
                .invoke(&tl::functions::messages::UpdateDialogFilter {
                    id,
                    filter: Some(tl::enums::DialogFilter::Filter(filter)),
                })
                .await?;
            info!(chat_id, folder, "chat placed in folder");
            Ok(())
        }
    }
}

async fn recent_own_messages(
    client: &Client,
    chat_id: i64,
    limit: usize,
) -> Result<Vec<SessionMessage>, UserClientError> {
    let chat = find_chat(client, chat_id, DIALOG_SCAN_LIMIT).await?;
    let mut iter = client.iter_messages(&chat).limit(limit * 3);
    let mut out = Vec::new();
    while let Some(message) = iter
        .next()
        .await
        .map_err(|e| UserClientError::Invocation(e.to_string()))?
    {
        if !message.outgoing() {
            continue;
        }
        out.push(SessionMessage {
            id: i64::from(message.id()),
            chat_id,
            text: message.text().to_owned(),
            date: message.date().timestamp(),
            outgoing: true,
        });
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_extracted_from_updates() {
        let updates = tl::enums::Updates::Updates(tl::types::Updates {
            updates: Vec::new(),
            users: Vec::new(),
            chats: vec![tl::enums::Chat::Chat(tl::types::Chat {
                creator: true,
                left: false,
                deactivated: false,
                call_active: false,
                call_not_empty: false,
                noforwards: false,
                id: 456,
                title: "Alice".to_owned(),
                photo: tl::enums::ChatPhoto::Empty,
                participants_count: 2,
                date: 0,
                version: 1,
                migrated_to: None,
                admin_rights: None,
                default_banned_rights: None,
            })],
            date: 0,
            seq: 0,
        });
        assert_eq!(chat_id_from_updates(&updates), Some(-456));
    }

    #[test]
    fn empty_updates_yield_none() {
        let updates = tl::enums::Updates::Updates(tl::types::Updates {
            updates: Vec::new(),
            users: Vec::new(),
            chats: Vec::new(),
            date: 0,
            seq: 0,
        });
        assert_eq!(chat_id_from_updates(&updates), None);
    }
}
