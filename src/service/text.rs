//! 文本处理：代码转义与转发摘要 / Code escaping and forward preview text

use crate::domain::{ChatRecord, MsgType};

/// 摘要文本最大字符数 / Max characters of a preview line
pub const PREVIEW_TEXT_CHARS: usize = 30;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape_html(escaped: &str) -> String {
    const ENTITIES: [(&str, char); 6] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#039;", '\''),
        ("&#39;", '\''),
    ];
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    'outer: while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        for (entity, ch) in ENTITIES {
            if let Some(tail) = rest.strip_prefix(entity) {
                out.push(ch);
                rest = tail;
                continue 'outer;
            }
        }
        out.push('&');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

/// 合并转发摘要中的一行 / One preview line for a forwarded record
pub fn preview_text(record: &ChatRecord) -> String {
    match record.msg_type {
        MsgType::Text => {
            let content = record.content.as_deref().unwrap_or_default();
            content
                .chars()
                .filter(|c| *c != '\n' && *c != '\r')
                .take(PREVIEW_TEXT_CHARS)
                .collect()
        }
        MsgType::File => "[file]".to_string(),
        MsgType::Code => "[code]".to_string(),
        MsgType::Forward => "[forward]".to_string(),
        MsgType::Invite => "[notice]".to_string(),
    }
}

/// 会话列表里的最后一条消息 / Last-message text shown in the conversation list
pub fn talk_summary(record: &ChatRecord) -> String {
    if record.is_revoke {
        "[revoked]".to_string()
    } else {
        preview_text(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Source;
    use chrono::Utc;

    #[test]
    fn escape_round_trip() {
        let src = "if a < b && c > \"d\" { print('x') }";
        let escaped = escape_html(src);
        assert!(!escaped.contains('<'));
        assert_eq!(unescape_html(&escaped), src);
    }

    #[test]
    fn unescape_keeps_unknown_entities() {
        assert_eq!(unescape_html("a &nbsp; b &amp; c &"), "a &nbsp; b & c &");
    }

    #[test]
    fn preview_truncates_and_strips_line_breaks() {
        let long = format!("line one\r\n{}", "x".repeat(40));
        let record = ChatRecord {
            id: 1,
            source: Source::Direct,
            msg_type: MsgType::Text,
            sender_id: 1,
            receive_id: 2,
            content: Some(long),
            is_revoke: false,
            created_at: Utc::now(),
        };
        let text = preview_text(&record);
        assert_eq!(text.chars().count(), PREVIEW_TEXT_CHARS);
        assert!(text.starts_with("line onexx"));

        let code = ChatRecord { msg_type: MsgType::Code, content: None, ..record };
        assert_eq!(preview_text(&code), "[code]");
        assert_eq!(talk_summary(&code), "[code]");

        let revoked = ChatRecord { is_revoke: true, ..code };
        assert_eq!(talk_summary(&revoked), "[revoked]");
    }
}
