//! File-backed registry behavior: persistence, seed-file compatibility, and
//! the correlator's shard window, exercised through the public API.

use std::collections::HashMap;

use wegram::config::UNBOUND_CHAT_ID;
use wegram::correlator::{Correlator, MsgMapping};
use wegram::registry::{Contact, ContactRegistry};

fn contact(wxid: &str, name: &str, chat_id: i64) -> Contact {
    Contact {
        chat_id,
        ..Contact::unbound(wxid, name)
    }
}

#[tokio::test]
async fn registry_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("database/contact.db");

    {
        let registry = ContactRegistry::open(&db_path).await.expect("open");
        registry
            .save(&contact("u1", "Alice", -100_123))
            .await
            .expect("save");
    }

    let reopened = ContactRegistry::open(&db_path).await.expect("reopen");
    let alice = reopened.get("u1").await.expect("query").expect("hit");
    assert_eq!(alice.name, "Alice");
    assert_eq!(alice.chat_id, -100_123);
}

#[tokio::test]
async fn seed_file_format_is_stable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let seed_path = dir.path().join("contact.json");

    // A seed produced by hand, in the documented array-of-objects format.
    std::fs::write(
        &seed_path,
        r#"[
            {"wxId": "u1", "name": "Alice", "chatId": -100123,
             "isGroup": false, "isReceive": true,
             "avatarLink": "https://a/1.jpg", "wxName": "alice_wx"},
            {"wxId": "1234@chatroom", "name": "Team", "chatId": -9999999999,
             "isGroup": true, "isReceive": false,
             "avatarLink": "", "wxName": ""}
        ]"#,
    )
    .expect("write seed");

    let registry = ContactRegistry::open_in_memory().await.expect("open");
    assert_eq!(registry.import_json(&seed_path).await.expect("import"), 2);

    let alice = registry.get("u1").await.expect("query").expect("hit");
    assert_eq!(alice.avatar_url, "https://a/1.jpg");
    assert_eq!(alice.wx_name, "alice_wx");

    let team = registry
        .get("1234@chatroom")
        .await
        .expect("query")
        .expect("hit");
    assert!(team.is_group);
    assert!(!team.is_receive);
    assert_eq!(team.chat_id, UNBOUND_CHAT_ID);

    // Export and re-import into a fresh registry: same rows.
    let export_path = dir.path().join("export.json");
    registry.export_json(&export_path).await.expect("export");
    let second = ContactRegistry::open_in_memory().await.expect("open");
    second.import_json(&export_path).await.expect("import");

    let mut a = registry.search_by_name("").await.expect("all");
    let mut b = second.search_by_name("").await.expect("all");
    a.sort_by(|x, y| x.wxid.cmp(&y.wxid));
    b.sort_by(|x, y| x.wxid.cmp(&y.wxid));
    assert_eq!(a, b);
}

#[tokio::test]
async fn discovered_contacts_do_not_clobber_bindings() {
    let registry = ContactRegistry::open_in_memory().await.expect("open");
    registry
        .save(&contact("u1", "Alice", -100_123))
        .await
        .expect("save");

    let names: HashMap<String, String> = HashMap::new();
    registry
        .merge_discovered(&["u1".to_owned(), "gh_news".to_owned()], &names)
        .await
        .expect("merge");

    let stats = registry.stats().await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.bound, 1);
}

#[tokio::test]
async fn correlator_shard_files_are_append_only_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let correlator = Correlator::open(dir.path().to_path_buf()).expect("open");

    for i in 1..=5_i64 {
        correlator
            .add(MsgMapping {
                tg_msg_id: i,
                telethon_msg_id: 0,
                from_wxid: "u1".to_owned(),
                to_wxid: "me".to_owned(),
                wx_msg_id: 1000 + i,
                client_msg_id: 0,
                create_time: 1_700_000_000 + i,
                content: format!("m{i}"),
            })
            .await
            .expect("add");
    }

    // Exactly one shard file for today, holding all five records in order.
    let shards: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    assert_eq!(shards.len(), 1);

    let text = std::fs::read_to_string(shards[0].path()).expect("read shard");
    let records: Vec<MsgMapping> = serde_json::from_str(&text).expect("parse shard");
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].tg_msg_id, 1);
    assert_eq!(records[4].wx_msg_id, 1005);

    // Reopen sees the same data through the cache load.
    drop(correlator);
    let reopened = Correlator::open(dir.path().to_path_buf()).expect("reopen");
    assert_eq!(reopened.wx_to_tg(1003).await, Some(3));
    let record = reopened.tg_to_wx(2).await.expect("hit");
    assert_eq!(record.content, "m2");
}
