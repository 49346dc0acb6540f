//! Dialog-filter (folder) placement.
//!
//! Mirror groups are tucked into a named folder: one for ordinary chats,
//! one for official accounts. The plan is computed purely from the current
//! filter list so it can be tested without a session; the actor applies it
//! with `messages.UpdateDialogFilter`.

use grammers_tl_types as tl;

/// What the actor should send to place a chat in `folder_name`.
#[derive(Debug, Clone, PartialEq)]
pub enum FolderPlan {
    /// The chat already sits in the folder; nothing to send.
    AlreadyPresent,
    /// Create or update the filter with this id and definition.
    Update { id: i32, filter: tl::types::DialogFilter },
}

/// Compute the folder update for adding `peer` to `folder_name`.
///
/// The default filter is skipped; a folder matches by exact title. A missing
/// folder is created with `groups = true`, an id one above the highest in
/// use, and an include-list holding only the new chat. An existing folder
/// keeps all other properties and gains the chat in its include-list.
pub fn plan_folder_update(
    filters: &[tl::enums::DialogFilter],
    folder_name: &str,
    peer: tl::enums::InputPeer,
) -> FolderPlan {
    let mut max_id = 0_i32;
    for filter in filters {
        if let tl::enums::DialogFilter::Filter(f) = filter {
            max_id = max_id.max(f.id);
            if f.title == folder_name {
                if f.include_peers.iter().any(|p| same_peer(p, &peer)) {
                    return FolderPlan::AlreadyPresent;
                }
                let mut updated = f.clone();
                updated.include_peers.push(peer);
                return FolderPlan::Update {
                    id: updated.id,
                    filter: updated,
                };
            }
        }
    }

    let id = max_id + 1;
    FolderPlan::Update {
        id,
        filter: tl::types::DialogFilter {
            contacts: false,
            non_contacts: false,
            groups: true,
            broadcasts: false,
            bots: false,
            exclude_muted: false,
            exclude_read: false,
            exclude_archived: false,
            id,
            title: folder_name.to_owned(),
            emoticon: Some("📱".to_owned()),
            color: None,
            pinned_peers: Vec::new(),
            include_peers: vec![peer],
            exclude_peers: Vec::new(),
        },
    }
}

/// Address a chat for folder membership: supergroups/channels carry an
/// access hash, basic groups are addressed by absolute id.
pub fn input_peer_for(chat_id: i64, access_hash: Option<i64>) -> tl::enums::InputPeer {
    match access_hash {
        Some(hash) => tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
            channel_id: chat_id.abs(),
            access_hash: hash,
        }),
        None => tl::enums::InputPeer::Chat(tl::types::InputPeerChat {
            chat_id: chat_id.abs(),
        }),
    }
}

fn same_peer(a: &tl::enums::InputPeer, b: &tl::enums::InputPeer) -> bool {
    use tl::enums::InputPeer;
    match (a, b) {
        (InputPeer::Chat(x), InputPeer::Chat(y)) => x.chat_id == y.chat_id,
        (InputPeer::Channel(x), InputPeer::Channel(y)) => x.channel_id == y.channel_id,
        (InputPeer::User(x), InputPeer::User(y)) => x.user_id == y.user_id,
        _ => false,
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(id: i32, title: &str, include: Vec<tl::enums::InputPeer>) -> tl::enums::DialogFilter {
        tl::enums::DialogFilter::Filter(tl::types::DialogFilter {
            contacts: false,
            non_contacts: false,
            groups: true,
            broadcasts: false,
            bots: false,
            exclude_muted: false,
            exclude_read: false,
            exclude_archived: false,
            id,
            title: title.to_owned(),
            emoticon: None,
            color: None,
            pinned_peers: Vec::new(),
            include_peers: include,
            exclude_peers: Vec::new(),
        })
    }

    fn chat_peer(id: i64) -> tl::enums::InputPeer {
        input_peer_for(-id.abs(), None)
    }

    #[test]
    fn missing_folder_created_with_next_id() {
        let filters = vec![filter(3, "工作", vec![]), filter(7, "家人", vec![])];
        let plan = plan_folder_update(&filters, "聊天", chat_peer(123));
        let FolderPlan::Update { id, filter } = plan else {
            panic!("expected update");
        };
        assert_eq!(id, 8);
        assert_eq!(filter.title, "聊天");
        assert!(filter.groups);
        assert_eq!(filter.include_peers.len(), 1);
    }

    #[test]
    fn empty_filter_list_starts_at_one() {
        let plan = plan_folder_update(&[], "聊天", chat_peer(123));
        let FolderPlan::Update { id, .. } = plan else {
            panic!("expected update");
        };
        assert_eq!(id, 1);
    }

    #[test]
    fn existing_folder_gains_chat_preserving_properties() {
        let existing = filter(5, "聊天", vec![chat_peer(1)]);
        let plan = plan_folder_update(&[existing], "聊天", chat_peer(2));
        let FolderPlan::Update { id, filter } = plan else {
            panic!("expected update");
        };
        assert_eq!(id, 5);
        assert_eq!(filter.include_peers.len(), 2);
        assert_eq!(filter.title, "聊天");
    }

    #[test]
    fn present_chat_is_a_noop() {
        let existing = filter(5, "聊天", vec![chat_peer(123)]);
        let plan = plan_folder_update(&[existing], "聊天", chat_peer(123));
        assert_eq!(plan, FolderPlan::AlreadyPresent);
    }

    #[test]
    fn default_filter_is_skipped() {
        let filters = vec![tl::enums::DialogFilter::Default];
        let plan = plan_folder_update(&filters, "聊天", chat_peer(123));
        let FolderPlan::Update { id, .. } = plan else {
            panic!("expected update");
        };
        assert_eq!(id, 1);
    }

    #[test]
    fn peer_addressing_by_chat_kind() {
        let basic = input_peer_for(-456, None);
        assert!(matches!(
            basic,
            tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: 456 })
        ));

        let super_group = input_peer_for(-100_789, Some(42));
        let tl::enums::InputPeer::Channel(ch) = super_group else {
            panic!("expected channel peer");
        };
        assert_eq!(ch.access_hash, 42);
    }
}
