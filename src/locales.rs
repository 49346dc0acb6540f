//! Static locale tables for user-visible strings (zh and ja).
//!
//! Keys are stable tokens; lookups that miss fall back to the key itself so
//! a missing translation never panics a send path.

/// Selected locale with static lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    /// Simplified Chinese.
    Zh,
    /// Japanese.
    Ja,
}

impl Locale {
    /// Resolve from the `LANG` config value; anything unknown becomes zh.
    pub fn from_lang(lang: &str) -> Self {
        match lang {
            "ja" => Locale::Ja,
            _ => Locale::Zh,
        }
    }

    /// Display name for a numeric message type (after appmsg/sysmsg
    /// reclassification). `None` means the type has no rendering at all.
    pub fn msg_type(self, t: i64) -> Option<&'static str> {
        let (zh, ja) = match t {
            1 => ("文本", "テキスト"),
            3 => ("图片", "写真"),
            5 => ("链接", "リンク"),
            6 => ("文件", "ファイル"),
            19 => ("聊天记录", "チャット履歴"),
            33 => ("小程序", "ミニプログラム"),
            34 => ("语音", "音声"),
            42 => ("联系人", "連絡先"),
            43 => ("视频", "動画"),
            47 => ("表情", "ステッカー"),
            48 => ("位置", "位置"),
            51 => ("视频号", "チャンネル"),
            53 => ("群接龙", "グループノート"),
            57 => ("引用", "引用"),
            66 => ("文件", "ファイル"),
            2000 => ("转账", "送金"),
            2001 => ("红包", "ラッキマネー"),
            _ => return None,
        };
        Some(self.pick(zh, ja))
    }

    /// Display name for a string-classified system type.
    pub fn sys_type(self, key: &str) -> Option<&'static str> {
        let (zh, ja) = match key {
            "revokemsg" => ("撤回", "撤回"),
            "pat" => ("拍一拍", "軽く叩く"),
            "VoIPBubbleMsg" => ("通话", "通話"),
            "unknown" => ("未知", "不明"),
            _ => return None,
        };
        Some(self.pick(zh, ja))
    }

    /// Common status strings.
    pub fn common(self, key: &str) -> &'static str {
        let (zh, ja) = match key {
            "online" => ("🟢 WeChat已上线", "🟢 WeChatがオンラインしました"),
            "offline" => ("🔴 WeChat已离线", "🔴 WeChatがオフラインしました"),
            "revoke_failed" => ("❌ 撤回失败", "❌ 撤回失敗"),
            "twice_login_success" => ("✅ 二次登录成功", "✅ 二次ログイン成功"),
            "twice_login_fail" => ("❌ 二次登录失败", "❌ 二次ログイン失敗"),
            "failed" => ("❌ 操作失败", "❌ 操作失敗"),
            "add_contact" => ("添加联系人", "連絡先を追加"),
            "chat_account" => ("好友", "友達"),
            "group_account" => ("群聊", "グループ"),
            "offical_account" => ("公众号", "公式アカウント"),
            _ => return self.pick_key(key),
        };
        self.pick(zh, ja)
    }

    /// Command feedback strings.
    pub fn command(self, key: &str) -> &'static str {
        let (zh, ja) = match key {
            "update" => ("更新联系人", "連絡先を更新"),
            "receive" => ("信息接收开关", "メッセージの受信"),
            "unbind" => ("解除绑定", "バインドを解除"),
            "friend" => ("联系人列表", "連絡先リスト"),
            "add" => ("添加好友", "友達を追加"),
            "remark" => ("设置备注", "リマークを設定"),
            "quit" => ("退出群聊", "グループを退出"),
            "revoke" => ("撤回消息", "メッセージの撤回"),
            "login" => ("二次登录", "二次ログイン"),
            "timer" => ("定时发送", "タイマー送信"),
            "receive_on" => ("✅ 转发开启", "✅ 転送オン"),
            "receive_off" => ("❌ 转发关闭", "❌ 転送オフ"),
            "unbind_successed" => ("⚠️ 从联系人文件中删除成功", "✅ 連絡先から削除しました"),
            "no_binding" => ("⚠️ 尚未绑定联系人", "⚠️ まだ連絡先とバインドされません"),
            "no_reply" => ("⚠️ 请回复要撤回的信息", "⚠️ 撤回したいメッセージを引用"),
            "no_remark_name" => ("⚠️ 请提供备注名", "⚠️ リマーク名を指定してください"),
            "no_message" => ("⚠️ 请提供发送时间与内容", "⚠️ 時間と内容を指定してください"),
            "no_phone" => ("⚠️ 请提供要添加的账号", "⚠️ 追加するIDを指定してください"),
            "no_user" => ("⚠️ 用户不存在", "⚠️ ユーザーが存在しません"),
            "user_added" => ("⚠️ 已经是好友", "⚠️ すでに友達です"),
            "no_contacts" => ("⚠️ 未找到联系人", "⚠️ 連絡先が見つかりません"),
            "only_in_bot" => ("⚠️ 该命令仅限与机器人私聊使用", "⚠️ このコマンドはボットのみ"),
            "not_in_bot" => ("⚠️ 该命令不能在机器人私聊使用", "⚠️ このコマンドはボットで使えません"),
            "only_in_group" => ("⚠️ 该命令仅限微信群聊使用", "⚠️ このコマンドはグループのみ"),
            "only_in_chat" => ("⚠️ 该命令仅限微信私聊使用", "⚠️ このコマンドは個人チャットのみ"),
            "timer_successed" => ("✅ 定时消息已发送", "✅ タイマー送信しました"),
            "timer_failed" => ("❌ 定时消息发送失败", "❌ タイマー送信失敗"),
            "contact_list" => ("联系人列表", "連絡先リスト"),
            "previous_page" => ("⬅️ 上一页", "⬅️ 前へ"),
            "next_page" => ("➡️ 下一页", "➡️ 次へ"),
            _ => return self.pick_key(key),
        };
        self.pick(zh, ja)
    }

    fn pick(self, zh: &'static str, ja: &'static str) -> &'static str {
        match self {
            Locale::Zh => zh,
            Locale::Ja => ja,
        }
    }

    // Unknown tokens render as themselves; leaking is fine for the handful
    // of misses that can only come from a programming error.
    fn pick_key(self, key: &str) -> &'static str {
        Box::leak(key.to_owned().into_boxed_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_resolution() {
        assert_eq!(Locale::from_lang("zh"), Locale::Zh);
        assert_eq!(Locale::from_lang("ja"), Locale::Ja);
        assert_eq!(Locale::from_lang("en_US.UTF-8"), Locale::Zh);
    }

    #[test]
    fn type_names_differ_by_locale() {
        assert_eq!(Locale::Zh.msg_type(3), Some("图片"));
        assert_eq!(Locale::Ja.msg_type(3), Some("写真"));
        assert_eq!(Locale::Zh.msg_type(9999), None);
    }

    #[test]
    fn sys_types() {
        assert_eq!(Locale::Zh.sys_type("revokemsg"), Some("撤回"));
        assert_eq!(Locale::Ja.sys_type("pat"), Some("軽く叩く"));
        assert_eq!(Locale::Zh.sys_type("bizlivenotify"), None);
    }

    #[test]
    fn unknown_key_falls_back_to_itself() {
        assert_eq!(Locale::Zh.common("no_such_token"), "no_such_token");
    }

    #[test]
    fn status_strings() {
        assert_eq!(Locale::Zh.common("online"), "🟢 WeChat已上线");
        assert_eq!(Locale::Ja.common("offline"), "🔴 WeChatがオフラインしました");
    }
}
