//! WeChat emoji keyword rewriting.
//!
//! WeChat renders `[微笑]`-style tokens as built-in emojis. Telegram users
//! type the bare names; before an outbound text goes to the gateway, any
//! whitelisted name found at line start or after whitespace is wrapped in
//! square brackets so the WeChat client renders it.

/// Built-in emoji names recognised by the WeChat client.
pub const EMOJI_NAMES: &[&str] = &[
    "微笑", "撇嘴", "色", "发呆", "得意", "流泪", "害羞", "闭嘴", "睡", "大哭", "尴尬", "发怒",
    "调皮", "呲牙", "惊讶", "难过", "囧", "抓狂", "吐", "偷笑", "愉快", "白眼", "傲慢", "困",
    "惊恐", "憨笑", "悠闲", "咒骂", "疑问", "嘘", "晕", "衰", "骷髅", "敲打", "再见", "擦汗",
    "抠鼻", "鼓掌", "坏笑", "右哼哼", "鄙视", "委屈", "快哭了", "阴险", "亲亲", "可怜", "笑脸",
    "生病", "脸红", "破涕为笑", "恐惧", "失望", "无语", "嘿哈", "捂脸", "奸笑", "机智", "皱眉",
    "耶", "吃瓜", "加油", "汗", "天啊", "Emm", "社会社会", "旺柴", "好的", "打脸", "哇",
    "翻白眼", "666", "让我看看", "叹气", "苦涩", "裂开", "嘴唇", "爱心", "心碎", "拥抱", "强",
    "弱", "握手", "胜利", "抱拳", "勾引", "拳头", "OK", "合十", "啤酒", "咖啡", "蛋糕", "玫瑰",
    "凋谢", "菜刀", "炸弹", "便便", "月亮", "太阳", "庆祝", "礼物", "红包", "發", "福", "烟花",
    "爆竹", "猪头", "跳跳", "发抖", "转圈",
];

/// Wrap whitelisted emoji names in `[...]`.
///
/// A name matches only at a line start or immediately after whitespace, and
/// the longest name wins at each position. Names already inside brackets are
/// left alone (the `[` preceding them is not whitespace).
pub fn rewrite_aliases(text: &str) -> String {
    // Longest-first so 快哭了 beats any shorter prefix.
    let mut names: Vec<&str> = EMOJI_NAMES.to_vec();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut at_boundary = true;

    'outer: while !rest.is_empty() {
        if at_boundary {
            for name in &names {
                if let Some(tail) = rest.strip_prefix(name) {
                    // The token must end at a boundary too, so 微笑着 stays
                    // plain text.
                    let ends_clean = tail
                        .chars()
                        .next()
                        .map_or(true, |c| c.is_whitespace() || c.is_ascii_punctuation());
                    if ends_clean {
                        out.push('[');
                        out.push_str(name);
                        out.push(']');
                        rest = tail;
                        at_boundary = false;
                        continue 'outer;
                    }
                }
            }
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        out.push(c);
        at_boundary = c.is_whitespace();
        rest = &rest[c.len_utf8()..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_at_line_start() {
        assert_eq!(rewrite_aliases("微笑"), "[微笑]");
    }

    #[test]
    fn rewrites_after_space() {
        assert_eq!(rewrite_aliases("你好 微笑 再见"), "你好 [微笑] [再见]");
    }

    #[test]
    fn rewrites_after_newline() {
        assert_eq!(rewrite_aliases("第一行\n呲牙"), "第一行\n[呲牙]");
    }

    #[test]
    fn mid_word_not_rewritten() {
        assert_eq!(rewrite_aliases("假装微笑"), "假装微笑");
    }

    #[test]
    fn name_with_trailing_text_not_rewritten() {
        assert_eq!(rewrite_aliases("微笑着说"), "微笑着说");
    }

    #[test]
    fn longest_name_wins() {
        // 快哭了 contains no shorter alias prefix that should fire instead.
        assert_eq!(rewrite_aliases("快哭了"), "[快哭了]");
    }

    #[test]
    fn already_bracketed_left_alone() {
        assert_eq!(rewrite_aliases("[微笑]"), "[微笑]");
    }

    #[test]
    fn ascii_names() {
        assert_eq!(rewrite_aliases("OK"), "[OK]");
        assert_eq!(rewrite_aliases("666 666"), "[666] [666]");
    }
}
