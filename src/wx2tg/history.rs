//! Forwarded chat-history rendering.
//!
//! A history bundle becomes one expandable blockquote: header (title, item
//! count, date range) followed by `👤sender (time)` lines. Times drop to
//! `HH:MM` when every item falls on the same day.

use chrono::NaiveDateTime;

use crate::bot::html;
use crate::wechat::xml::RecordInfo;

/// Render a history bundle into `<blockquote expandable>` HTML.
pub fn render_chat_history(title: &str, record: &RecordInfo) -> String {
    let times: Vec<Option<NaiveDateTime>> = record
        .items
        .iter()
        .map(|item| parse_source_time(&item.source_time))
        .collect();

    let date_range = match (times.first().copied().flatten(), times.last().copied().flatten()) {
        (Some(first), Some(last)) => {
            let start = first.format("%Y/%m/%d").to_string();
            let end = last.format("%Y/%m/%d").to_string();
            if start == end {
                start
            } else {
                format!("{start} ～ {end}")
            }
        }
        _ => String::new(),
    };

    let distinct_days: std::collections::BTreeSet<_> =
        times.iter().flatten().map(|t| t.date()).collect();
    let same_day = distinct_days.len() <= 1;

    let mut lines = vec![format!(
        "{}\n件数：{}\n日期：{}",
        html::escape(title),
        record.count,
        html::escape(&date_range)
    )];

    for (item, time) in record.items.iter().zip(times.iter()) {
        let stamp = match time {
            Some(t) if same_day => t.format("%H:%M").to_string(),
            Some(t) => t.format("%m/%d %H:%M").to_string(),
            None => String::new(),
        };
        let desc = if item.data_desc.is_empty() {
            "[不明]".to_owned()
        } else {
            item.data_desc.clone()
        };
        lines.push(format!(
            "👤{} ({stamp})\n{}",
            html::escape(&item.source_name),
            html::escape(&desc)
        ));
    }

    format!("<blockquote expandable>{}</blockquote>", lines.join("\n"))
}

/// Source times arrive as `YYYY-MM-DD HH:MM:SS` with occasional single-digit
/// fields; seconds are ignored.
fn parse_source_time(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wechat::xml::RecordItem;

    fn record(items: Vec<(&str, &str, &str)>) -> RecordInfo {
        RecordInfo {
            title: "群聊的聊天记录".to_owned(),
            count: items.len() as u32,
            items: items
                .into_iter()
                .map(|(name, time, desc)| RecordItem {
                    source_name: name.to_owned(),
                    source_time: time.to_owned(),
                    data_desc: desc.to_owned(),
                })
                .collect(),
        }
    }

    #[test]
    fn same_day_uses_short_times() {
        let rendered = render_chat_history(
            "群聊的聊天记录",
            &record(vec![
                ("Alice", "2023-10-01 10:00:00", "hi"),
                ("Bob", "2023-10-01 11:30:00", "yo"),
            ]),
        );
        assert!(rendered.starts_with("<blockquote expandable>"));
        assert!(rendered.contains("日期：2023/10/01"));
        assert!(rendered.contains("👤Alice (10:00)"));
        assert!(rendered.contains("👤Bob (11:30)"));
        assert!(!rendered.contains("10/01 10:00"));
    }

    #[test]
    fn cross_day_uses_date_range_and_long_times() {
        let rendered = render_chat_history(
            "记录",
            &record(vec![
                ("Alice", "2023-10-01 10:00:00", "hi"),
                ("Bob", "2023-10-02 11:00:00", "yo"),
            ]),
        );
        assert!(rendered.contains("2023/10/01 ～ 2023/10/02"));
        assert!(rendered.contains("(10/01 10:00)"));
        assert!(rendered.contains("(10/02 11:00)"));
    }

    #[test]
    fn missing_desc_falls_back() {
        let rendered = render_chat_history(
            "记录",
            &record(vec![("Alice", "2023-10-01 10:00:00", "")]),
        );
        assert!(rendered.contains("[不明]"));
    }

    #[test]
    fn unparsable_time_does_not_panic() {
        let rendered = render_chat_history("记录", &record(vec![("Alice", "someday", "hi")]));
        assert!(rendered.contains("👤Alice ()"));
    }

    #[test]
    fn html_in_fields_is_escaped() {
        let rendered = render_chat_history(
            "<b>t</b>",
            &record(vec![("A<x>", "2023-10-01 10:00:00", "1 < 2")]),
        );
        assert!(rendered.contains("&lt;b&gt;t&lt;/b&gt;"));
        assert!(rendered.contains("A&lt;x&gt;"));
        assert!(rendered.contains("1 &lt; 2"));
    }
}
