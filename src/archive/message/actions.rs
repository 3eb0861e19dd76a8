//! 服务消息（入群、踢人、改标题等）的文本合成

use crate::archive::participant::ParticipantDirectory;
use serde_json::Value;

/// 服务消息类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    TitleUpdate,
    PhotoUpdate,
    PhotoRemove,
    Invite,
    Kick,
    /// 自己退出（由 Kick 改判）
    Left,
    /// 自己重新加入（由 Invite 改判）
    Returned,
    Pin,
    Unpin,
    JoinByLink,
    Screenshot,
    CallStarted,
    InviteByCall,
    StyleUpdate,
    Other(String),
}

/// 类型标记与文本模板，`{member}`、`{text}`、`{message}` 在合成时替换
const TEMPLATES: &[(&str, ActionKind, &str)] = &[
    ("chat_create", ActionKind::Create, "创建了群聊「{text}」"),
    ("chat_title_update", ActionKind::TitleUpdate, "将群聊名称改为「{text}」"),
    ("chat_photo_update", ActionKind::PhotoUpdate, "更新了群聊头像"),
    ("chat_photo_remove", ActionKind::PhotoRemove, "删除了群聊头像"),
    ("chat_invite_user", ActionKind::Invite, "邀请了 {member}"),
    ("chat_kick_user", ActionKind::Kick, "将 {member} 移出了群聊"),
    ("chat_pin_message", ActionKind::Pin, "置顶了消息「{message}」"),
    ("chat_unpin_message", ActionKind::Unpin, "取消了置顶消息"),
    ("chat_invite_user_by_link", ActionKind::JoinByLink, "通过邀请链接加入了群聊"),
    ("chat_screenshot", ActionKind::Screenshot, "截取了屏幕"),
    ("chat_group_call_started", ActionKind::CallStarted, "发起了群通话"),
    ("chat_invite_user_by_call", ActionKind::InviteByCall, "邀请 {member} 加入通话"),
    ("conversation_style_update", ActionKind::StyleUpdate, "更改了聊天主题"),
];

/// 成员对自己执行操作时的改判
const SELF_OVERRIDES: &[(ActionKind, ActionKind, &str)] = &[
    (ActionKind::Kick, ActionKind::Left, "退出了群聊"),
    (ActionKind::Invite, ActionKind::Returned, "重新加入了群聊"),
];

/// 服务消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAction {
    pub kind: ActionKind,
    pub member_id: Option<i64>,
    /// 合成后的可读文本（不含发送者名称）
    pub text: String,
}

impl ServiceAction {
    /// 根据消息的 `action` 字段与发送者合成服务消息
    pub fn decode(raw: &Value, sender_id: i64, names: &ParticipantDirectory) -> Self {
        let tag = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let member_id = raw.get("member_id").and_then(Value::as_i64);

        let (mut kind, mut template) = TEMPLATES
            .iter()
            .find(|(t, _, _)| *t == tag)
            .map(|(_, kind, tpl)| (kind.clone(), *tpl))
            .unwrap_or_else(|| (ActionKind::Other(tag.to_string()), "[服务消息: {tag}]"));

        if member_id == Some(sender_id) {
            if let Some((_, to, tpl)) = SELF_OVERRIDES.iter().find(|(from, _, _)| *from == kind) {
                kind = to.clone();
                template = *tpl;
            }
        }

        let field = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let text = fill(template, |placeholder| match placeholder {
            "member" => Some(member_id.map(|id| names.name(id)).unwrap_or_default()),
            "text" => Some(field("text")),
            "message" => Some(field("message")),
            "tag" => Some(tag.to_string()),
            _ => None,
        });

        Self {
            kind,
            member_id,
            text,
        }
    }
}

/// 一次扫描替换模板中的 `{name}` 占位符，替换进去的内容不会再被展开
fn fill(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('}').and_then(|end| lookup(&tail[1..end]).map(|v| (end, v))) {
            Some((end, value)) => {
                out.push_str(&value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::models::StoredParticipant;
    use serde_json::json;

    fn names() -> ParticipantDirectory {
        ParticipantDirectory::from_stored(&[
            StoredParticipant::from_json(json!({"id": 1, "first_name": "Anna", "last_name": "K"})).unwrap(),
            StoredParticipant::from_json(json!({"id": 2, "first_name": "Boris", "last_name": "L"})).unwrap(),
        ])
    }

    #[test]
    fn kick_of_another_member_names_them() {
        let a = ServiceAction::decode(&json!({"type": "chat_kick_user", "member_id": 2}), 1, &names());
        assert_eq!(a.kind, ActionKind::Kick);
        assert_eq!(a.text, "将 Boris L 移出了群聊");
    }

    #[test]
    fn self_kick_is_leaving_and_self_invite_is_returning() {
        let left = ServiceAction::decode(&json!({"type": "chat_kick_user", "member_id": 2}), 2, &names());
        assert_eq!(left.kind, ActionKind::Left);
        let back = ServiceAction::decode(&json!({"type": "chat_invite_user", "member_id": 2}), 2, &names());
        assert_eq!(back.kind, ActionKind::Returned);
        assert_eq!(back.text, "重新加入了群聊");
    }

    #[test]
    fn unknown_action_keeps_tag() {
        let a = ServiceAction::decode(&json!({"type": "chat_something_new"}), 1, &names());
        assert_eq!(a.kind, ActionKind::Other("chat_something_new".to_string()));
        assert!(a.text.contains("chat_something_new"));
    }

    #[test]
    fn substituted_text_is_not_expanded_again() {
        let a = ServiceAction::decode(
            &json!({"type": "chat_title_update", "text": "{message} & {tag} {"}),
            1,
            &names(),
        );
        assert_eq!(a.text, "将群聊名称改为「{message} & {tag} {」");
    }
}
