//! 纯文本聊天记录
//!
//! 每条顶层消息输出一行头部（`[HH:MM] 名称: ...`），同一发送者的连续消息只保留时间，
//! 名称位置用空格补齐；跨天时插入日期分隔行。

use crate::archive::message::models::Message;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use unicode_width::UnicodeWidthStr;

/// 渲染状态：上一条消息的日期与发送者
#[derive(Debug, Default)]
pub struct RenderState {
    last_day: Option<NaiveDate>,
    last_sender: Option<i64>,
}

pub struct TranscriptRenderer {
    account_id: i64,
    tz: FixedOffset,
}

impl TranscriptRenderer {
    pub fn new(account_id: i64, tz: FixedOffset) -> Self {
        Self { account_id, tz }
    }

    fn local(&self, ts: i64) -> DateTime<FixedOffset> {
        DateTime::<Utc>::from_timestamp(ts, 0)
            .unwrap_or_default()
            .with_timezone(&self.tz)
    }

    /// 文件开头的标题
    pub fn title(&self, title: &str, account_name: &str) -> String {
        format!(
            "{}\n账号: {} (id{})\n\n",
            title, account_name, self.account_id
        )
    }

    fn display_name<'m>(&self, msg: &'m Message) -> &'m str {
        if msg.sender_id == self.account_id {
            "我"
        } else {
            &msg.sender_name
        }
    }

    /// 渲染一条顶层消息
    pub fn render(&self, msg: &Message, state: &mut RenderState) -> String {
        let mut buf = String::new();
        let at = self.local(msg.date);

        let day = at.date_naive();
        if state.last_day != Some(day) {
            if state.last_day.is_some() {
                buf.push('\n');
            }
            buf.push_str(&format!("        [{}]\n", day.format("%Y-%m-%d")));
            state.last_day = Some(day);
            state.last_sender = None;
        }

        let name = self.display_name(msg);
        // 按终端显示宽度补齐，中文名称每个字占两列
        let pad = " ".repeat(name.width());
        let mut lines = self.content_lines(msg);
        if lines.is_empty() {
            lines.push(String::new());
        }

        let grouped = state.last_sender == Some(msg.sender_id);
        for (i, line) in lines.iter().enumerate() {
            if i == 0 {
                if grouped {
                    buf.push_str(&format!("[{}] {}  {}\n", at.format("%H:%M"), pad, line));
                } else {
                    buf.push_str(&format!("[{}] {}: {}\n", at.format("%H:%M"), name, line));
                }
            } else {
                buf.push_str(&format!("{} {}  {}\n", " ".repeat(7), pad, line));
            }
        }

        state.last_sender = Some(msg.sender_id);
        buf
    }

    /// 消息内容行：服务消息、回复、正文、转发、附件、位置、标记
    fn content_lines(&self, msg: &Message) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(action) = &msg.action {
            lines.push(action.text.clone());
        }

        if let Some(reply) = &msg.reply {
            lines.push(format!("> {} ({}):", self.display_name(reply), self.stamp(reply)));
            for line in self.content_lines(reply) {
                lines.push(format!("> {}", line));
            }
        }

        lines.extend(msg.text.lines().map(str::to_string));

        for fwd in &msg.forwards {
            lines.push(format!("| {} ({}):", self.display_name(fwd), self.stamp(fwd)));
            for line in self.content_lines(fwd) {
                lines.push(format!("| {}", line));
            }
        }

        lines.extend(msg.attachments.iter().map(|a| a.placeholder()));

        if let Some(geo) = msg.geo {
            lines.push(format!("[位置: {:.6}, {:.6}]", geo.latitude, geo.longitude));
        }
        if msg.edited {
            lines.push("(已编辑)".to_string());
        }
        if msg.expired {
            lines.push("(已过期)".to_string());
        }

        lines
    }

    fn stamp(&self, msg: &Message) -> String {
        self.local(msg.date).format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::message::graph::MessageGraph;
    use crate::archive::participant::ParticipantDirectory;
    use crate::archive::store::models::StoredParticipant;
    use serde_json::json;

    fn names() -> ParticipantDirectory {
        ParticipantDirectory::from_stored(&[
            StoredParticipant::from_json(json!({"id": 1, "first_name": "Ann", "last_name": "K"})).unwrap(),
            StoredParticipant::from_json(json!({"id": 2, "first_name": "Bob", "last_name": "L"})).unwrap(),
        ])
    }

    fn render_all(records: Vec<serde_json::Value>) -> String {
        let names = names();
        let renderer = TranscriptRenderer::new(1, FixedOffset::east_opt(0).unwrap());
        let mut state = RenderState::default();
        MessageGraph::new(&names)
            .build(records)
            .map(|m| renderer.render(&m, &mut state))
            .collect()
    }

    #[test]
    fn groups_consecutive_messages_of_one_sender() {
        let out = render_all(vec![
            json!({"id": 1, "from_id": 2, "date": 3600, "text": "hi\nthere"}),
            json!({"id": 2, "from_id": 2, "date": 3660, "text": "again", "update_time": 3700}),
            json!({"id": 3, "from_id": 1, "date": 3720, "text": "yo"}),
        ]);
        let cont = |line: &str| format!("{}{}\n", " ".repeat(15), line);
        let expected = format!(
            "        [1970-01-01]\n[01:00] Bob L: hi\n{}[01:01]{}again\n{}[01:02] 我: yo\n",
            cont("there"),
            " ".repeat(8),
            cont("(已编辑)")
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn day_change_inserts_separator_and_resets_grouping() {
        let out = render_all(vec![
            json!({"id": 1, "from_id": 2, "date": 0, "text": "a"}),
            json!({"id": 2, "from_id": 2, "date": 86_400, "text": "b"}),
        ]);
        assert!(out.contains("\n\n        [1970-01-02]\n[00:00] Bob L: b\n"));
    }

    #[test]
    fn nested_blocks_are_prefixed() {
        let out = render_all(vec![json!({
            "id": 5, "from_id": 2, "date": 0, "text": "see",
            "reply_message": {"id": 4, "from_id": 1, "date": 0, "text": "question"},
            "fwd_messages": [{"from_id": 1, "date": 0, "text": "fwd",
                              "attachments": [{"type": "poll", "poll": {"question": "?"}}]}],
        })]);
        assert!(out.contains("[00:00] Bob L: > 我 (1970-01-01 00:00):"));
        assert!(out.contains("> question"));
        assert!(out.contains("| 我 (1970-01-01 00:00):"));
        assert!(out.contains("| [投票: ?]"));
    }

    #[test]
    fn padding_follows_display_width_of_wide_names() {
        let out = render_all(vec![
            json!({"id": 1, "from_id": 1, "date": 0, "text": "a\nb"}),
            json!({"id": 2, "from_id": 1, "date": 60, "text": "c"}),
        ]);
        // "我" 占两列：7 + 1 + 2 + 2
        let expected = format!(
            "        [1970-01-01]\n[00:00] 我: a\n{}b\n[00:01]{}c\n",
            " ".repeat(12),
            " ".repeat(5)
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn empty_conversation_renders_nothing() {
        assert_eq!(render_all(Vec::new()), "");
    }
}
