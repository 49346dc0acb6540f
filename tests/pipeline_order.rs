//! Ordering and dedup guarantees across the ingress pipeline.
//!
//! These exercise the public dispatcher surface the way the callback sink
//! and queue consumer drive it: payloads in, per-contact serialized handler
//! invocations out.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wegram::dispatch::{Dispatcher, StatusNotifier, WorkHandler, WorkerPool};
use wegram::wechat::{AddMsg, RawAddMsg, StringField, SyncData, SyncPayload};

#[derive(Clone, Debug)]
struct Span {
    key: String,
    msg_id: i64,
    started: Instant,
    finished: Instant,
}

struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<WorkerPool<AddMsg>>,
    spans: Arc<Mutex<Vec<Span>>>,
}

fn pipeline(work_duration: Duration) -> Pipeline {
    let spans: Arc<Mutex<Vec<Span>>> = Arc::new(Mutex::new(Vec::new()));
    let spans_ref = Arc::clone(&spans);
    let handler: WorkHandler<AddMsg> = Arc::new(move |key, msg: AddMsg| {
        let spans = Arc::clone(&spans_ref);
        Box::pin(async move {
            let started = Instant::now();
            tokio::time::sleep(work_duration).await;
            spans.lock().expect("lock").push(Span {
                key,
                msg_id: msg.msg_id,
                started,
                finished: Instant::now(),
            });
        })
    });
    let pool = WorkerPool::new(handler);
    let notifier: StatusNotifier = Arc::new(|_| Box::pin(async {}));
    let dispatcher = Dispatcher::new("me", 1000, Arc::clone(&pool), notifier);
    Pipeline {
        dispatcher,
        pool,
        spans,
    }
}

fn payload(msgs: Vec<(i64, &str)>) -> SyncPayload {
    SyncPayload {
        message: "成功".to_owned(),
        data: Some(SyncData {
            add_msgs: msgs
                .into_iter()
                .map(|(id, from)| RawAddMsg {
                    msg_id: id,
                    new_msg_id: id * 1000,
                    from_user_name: StringField::Wrapped {
                        string: from.to_owned(),
                    },
                    to_user_name: StringField::Plain("me".to_owned()),
                    msg_type: 1,
                    content: StringField::Plain(format!("message {id}")),
                    push_content: String::new(),
                    create_time: 1_700_000_000,
                })
                .collect(),
        }),
    }
}

#[tokio::test]
async fn same_contact_sends_never_overlap() {
    let p = pipeline(Duration::from_millis(10));
    p.dispatcher
        .handle_payload(payload(vec![(1, "u1"), (2, "u1"), (3, "u1"), (4, "u1")]))
        .await;
    p.pool.shutdown().await;

    let mut spans: Vec<Span> = p.spans.lock().expect("lock").clone();
    spans.sort_by_key(|s| s.msg_id);
    assert_eq!(spans.len(), 4);
    for pair in spans.windows(2) {
        assert!(
            pair[0].finished <= pair[1].started,
            "message {} started before {} finished",
            pair[1].msg_id,
            pair[0].msg_id
        );
    }
}

#[tokio::test]
async fn different_contacts_overlap() {
    let p = pipeline(Duration::from_millis(40));
    let msgs: Vec<(i64, &str)> = vec![(1, "u1"), (2, "u2"), (3, "u3"), (4, "u4")];
    let started = Instant::now();
    p.dispatcher.handle_payload(payload(msgs)).await;
    p.pool.shutdown().await;
    let elapsed = started.elapsed();

    // Serial execution would need at least 160 ms; parallel workers finish
    // in roughly one slot.
    assert!(
        elapsed < Duration::from_millis(140),
        "workers did not run in parallel: {elapsed:?}"
    );
    assert_eq!(p.spans.lock().expect("lock").len(), 4);
}

#[tokio::test]
async fn translator_invoked_at_most_once_per_msg_id() {
    let p = pipeline(Duration::from_millis(1));
    // The same MsgId arrives via "both sources".
    p.dispatcher
        .handle_payload(payload(vec![(42, "u1"), (43, "u1")]))
        .await;
    p.dispatcher
        .handle_payload(payload(vec![(42, "u1"), (44, "u1")]))
        .await;
    p.pool.shutdown().await;

    let spans = p.spans.lock().expect("lock");
    let ids: Vec<i64> = spans.iter().map(|s| s.msg_id).collect();
    assert_eq!(ids.iter().filter(|id| **id == 42).count(), 1);
    assert_eq!(spans.len(), 3);
}

#[tokio::test]
async fn chatroom_messages_keep_their_worker_key() {
    let p = pipeline(Duration::from_millis(1));
    p.dispatcher
        .handle_payload(payload(vec![(1, "123@chatroom"), (2, "u1")]))
        .await;
    p.pool.shutdown().await;

    let spans = p.spans.lock().expect("lock");
    let keys: Vec<&str> = spans.iter().map(|s| s.key.as_str()).collect();
    assert!(keys.contains(&"123@chatroom"));
    assert!(keys.contains(&"u1"));
}
