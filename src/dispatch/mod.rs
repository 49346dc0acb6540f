//! Ingress dispatching for WeChat events.
//!
//! Sync payloads arrive from the HTTP callback or the broker queue. Control
//! messages drive the online/offline notice; data messages are deduplicated
//! and fanned out to per-contact serial workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod callback;
pub mod dedup;
pub mod queue;
pub mod workers;

pub use dedup::DedupCache;
pub use workers::{DispatchError, WorkHandler, WorkerPool};

use crate::wechat::{AddMsg, SyncPayload};

/// Gateway status line that carries messages.
const SYNC_OK: &str = "成功";

/// Gateway status line signalling a probable logout.
const SYNC_MAYBE_LOGGED_OUT: &str = "用户可能退出";

/// System sender that is never relayed.
const SYSTEM_SENDER: &str = "weixin";

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Side-effect hook for online/offline transitions (`true` = online).
pub type StatusNotifier = Arc<dyn Fn(bool) -> BoxedFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginState {
    Online,
    Offline,
}

/// The ingress dispatcher shared by both event sources.
pub struct Dispatcher {
    my_wxid: String,
    dedup: DedupCache,
    pool: Arc<WorkerPool<AddMsg>>,
    notifier: StatusNotifier,
    login_state: Mutex<Option<LoginState>>,
}

impl Dispatcher {
    /// Build a dispatcher fanning out to `pool`, with `notifier` invoked on
    /// online/offline transitions.
    pub fn new(
        my_wxid: &str,
        dedup_capacity: usize,
        pool: Arc<WorkerPool<AddMsg>>,
        notifier: StatusNotifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            my_wxid: my_wxid.to_owned(),
            dedup: DedupCache::new(dedup_capacity, dedup::DEFAULT_TTL),
            pool,
            notifier,
            login_state: Mutex::new(None),
        })
    }

    /// Handle one sync payload from either source.
    pub async fn handle_payload(&self, payload: SyncPayload) {
        self.login_check(&payload.message).await;

        if payload.message != SYNC_OK {
            return;
        }
        let Some(data) = payload.data else {
            return;
        };

        for raw in data.add_msgs {
            if raw.msg_id == 0 {
                continue;
            }
            if raw.from_user_name.as_str() == SYSTEM_SENDER {
                debug!("skipping WeChat system message");
                continue;
            }

            let dedup_key = raw.msg_id.to_string();
            if !self.dedup.check_and_mark(&dedup_key) {
                debug!(msg_id = raw.msg_id, "duplicate message dropped");
                continue;
            }

            let msg = AddMsg::from_raw(raw, &self.my_wxid);
            let worker_key = msg.from_wxid.clone();
            if let Err(e) = self.pool.dispatch(&worker_key, msg).await {
                warn!(key = %worker_key, error = %e, "dispatch failed, unmarking for retry");
                self.dedup.unmark(&dedup_key);
            }
        }
    }

    /// Online/offline state machine. Only transitions produce a notice.
    async fn login_check(&self, message: &str) {
        let target = if message == SYNC_MAYBE_LOGGED_OUT {
            LoginState::Offline
        } else {
            LoginState::Online
        };

        let mut state = self.login_state.lock().await;
        match (*state, target) {
            (Some(LoginState::Offline), LoginState::Offline)
            | (Some(LoginState::Online), LoginState::Online) => {}
            (_, LoginState::Offline) => {
                (self.notifier)(false).await;
            }
            (Some(LoginState::Offline), LoginState::Online) => {
                (self.notifier)(true).await;
            }
            // First sight of an online gateway is not news.
            (None, LoginState::Online) => {}
        }
        *state = Some(target);
    }

    /// Drain workers on shutdown.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wechat::{RawAddMsg, StringField, SyncData};
    use std::sync::Mutex as StdMutex;

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        handled: Arc<StdMutex<Vec<(String, i64)>>>,
        notices: Arc<StdMutex<Vec<bool>>>,
        pool: Arc<WorkerPool<AddMsg>>,
    }

    fn fixture() -> Fixture {
        let handled: Arc<StdMutex<Vec<(String, i64)>>> = Arc::new(StdMutex::new(Vec::new()));
        let handled_ref = Arc::clone(&handled);
        let handler: WorkHandler<AddMsg> = Arc::new(move |key, msg: AddMsg| {
            let handled = Arc::clone(&handled_ref);
            Box::pin(async move {
                handled.lock().expect("lock").push((key, msg.msg_id));
            })
        });
        let pool = WorkerPool::new(handler);

        let notices: Arc<StdMutex<Vec<bool>>> = Arc::new(StdMutex::new(Vec::new()));
        let notices_ref = Arc::clone(&notices);
        let notifier: StatusNotifier = Arc::new(move |online| {
            let notices = Arc::clone(&notices_ref);
            Box::pin(async move {
                notices.lock().expect("lock").push(online);
            })
        });

        let dispatcher = Dispatcher::new("me", 1000, Arc::clone(&pool), notifier);
        Fixture {
            dispatcher,
            handled,
            notices,
            pool,
        }
    }

    fn payload(msgs: Vec<RawAddMsg>) -> SyncPayload {
        SyncPayload {
            message: SYNC_OK.to_owned(),
            data: Some(SyncData { add_msgs: msgs }),
        }
    }

    fn raw(msg_id: i64, from: &str) -> RawAddMsg {
        RawAddMsg {
            msg_id,
            new_msg_id: msg_id * 100,
            from_user_name: StringField::Plain(from.to_owned()),
            to_user_name: StringField::Plain("me".to_owned()),
            msg_type: 1,
            content: StringField::Plain("hello".to_owned()),
            push_content: String::new(),
            create_time: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn messages_fan_out_to_contact_workers() {
        let f = fixture();
        f.dispatcher
            .handle_payload(payload(vec![raw(1, "u1"), raw(2, "u2"), raw(3, "u1")]))
            .await;
        f.pool.shutdown().await;

        let handled = f.handled.lock().expect("lock");
        let u1: Vec<i64> = handled
            .iter()
            .filter(|(k, _)| k == "u1")
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(u1, vec![1, 3]);
        assert_eq!(handled.len(), 3);
    }

    #[tokio::test]
    async fn duplicates_are_dropped() {
        let f = fixture();
        f.dispatcher
            .handle_payload(payload(vec![raw(10, "u1")]))
            .await;
        f.dispatcher
            .handle_payload(payload(vec![raw(10, "u1"), raw(11, "u1")]))
            .await;
        f.pool.shutdown().await;

        let handled = f.handled.lock().expect("lock");
        let ids: Vec<i64> = handled.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[tokio::test]
    async fn system_sender_skipped() {
        let f = fixture();
        f.dispatcher
            .handle_payload(payload(vec![raw(1, "weixin"), raw(2, "u1")]))
            .await;
        f.pool.shutdown().await;
        assert_eq!(f.handled.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn non_success_payload_produces_no_work() {
        let f = fixture();
        f.dispatcher
            .handle_payload(SyncPayload {
                message: "无新消息".to_owned(),
                data: Some(SyncData {
                    add_msgs: vec![raw(1, "u1")],
                }),
            })
            .await;
        f.pool.shutdown().await;
        assert!(f.handled.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn login_transitions_notify_once_each_way() {
        let f = fixture();
        let logged_out = SyncPayload {
            message: SYNC_MAYBE_LOGGED_OUT.to_owned(),
            data: None,
        };
        // Two logout payloads: one notice.
        f.dispatcher.handle_payload(logged_out.clone()).await;
        f.dispatcher.handle_payload(logged_out).await;
        // Back online: one notice.
        f.dispatcher.handle_payload(payload(vec![])).await;
        f.dispatcher.handle_payload(payload(vec![])).await;

        assert_eq!(*f.notices.lock().expect("lock"), vec![false, true]);
    }

    #[tokio::test]
    async fn initial_online_state_is_silent() {
        let f = fixture();
        f.dispatcher.handle_payload(payload(vec![])).await;
        assert!(f.notices.lock().expect("lock").is_empty());
    }
}
