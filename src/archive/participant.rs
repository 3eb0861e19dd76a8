//! 会话参与者：ID 收集、资料拉取与名称查询

use crate::archive::error::RemoteError;
use crate::archive::remote::{with_rate_limit_retry, RateLimitPolicy, RemoteClient};
use crate::archive::store::models::{ParticipantIds, StoredParticipant};
use crate::archive::types::CHAT_PEER_OFFSET;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// users.get 单次最多请求的 ID 数
pub const USERS_CHUNK: usize = 1000;

/// groups.getById 单次最多请求的 ID 数
pub const GROUPS_CHUNK: usize = 500;

/// 广度优先遍历消息（含回复与转发），收集发送者以及服务消息涉及的成员
pub fn collect_ids(messages: &[Value], ids: &mut ParticipantIds) {
    let mut queue: VecDeque<&Value> = messages.iter().collect();

    while let Some(msg) = queue.pop_front() {
        if let Some(from_id) = msg.get("from_id").and_then(Value::as_i64) {
            ids.insert_signed(from_id);
        }
        if let Some(member) = msg
            .get("action")
            .and_then(|a| a.get("member_id"))
            .and_then(Value::as_i64)
        {
            ids.insert_signed(member);
        }
        if let Some(fwd) = msg.get("fwd_messages").and_then(Value::as_array) {
            queue.extend(fwd.iter());
        }
        if let Some(reply) = msg.get("reply_message") {
            queue.push_back(reply);
        }
    }
}

/// 非群聊会话的对方本身也是参与者
pub fn collect_peer(peer_id: i64, ids: &mut ParticipantIds) {
    if peer_id < CHAT_PEER_OFFSET {
        ids.insert_signed(peer_id);
    }
}

/// 分批拉取用户与社区资料
pub async fn fetch_participants(
    remote: &dyn RemoteClient,
    ids: &ParticipantIds,
    policy: RateLimitPolicy,
) -> Result<Vec<StoredParticipant>, RemoteError> {
    let mut res = Vec::with_capacity(ids.len());

    let users: Vec<i64> = ids.users.iter().copied().collect();
    for chunk in users.chunks(USERS_CHUNK) {
        debug!("[Participant] 拉取用户资料 {} 个", chunk.len());
        let items = with_rate_limit_retry(policy, "users.get", || remote.fetch_users(chunk)).await?;
        res.extend(items.into_iter().filter_map(StoredParticipant::from_json));
    }

    let groups: Vec<i64> = ids.groups.iter().copied().collect();
    for chunk in groups.chunks(GROUPS_CHUNK) {
        debug!("[Participant] 拉取社区资料 {} 个", chunk.len());
        let items =
            with_rate_limit_retry(policy, "groups.getById", || remote.fetch_groups(chunk)).await?;
        res.extend(
            items
                .into_iter()
                .filter_map(|mut json| {
                    // 社区资料统一带 name 字段，保证取反
                    if json.get("name").is_none() {
                        json["name"] = Value::String(String::new());
                    }
                    StoredParticipant::from_json(json)
                }),
        );
    }

    info!(
        "[Participant] ✅ 拉取参与者资料完成，请求 {} 个，返回 {} 个",
        ids.len(),
        res.len()
    );
    Ok(res)
}

/// 参与者名称目录
#[derive(Debug, Clone, Default)]
pub struct ParticipantDirectory {
    names: HashMap<i64, String>,
}

impl ParticipantDirectory {
    pub fn from_stored(participants: &[StoredParticipant]) -> Self {
        let mut dir = Self::default();
        for p in participants {
            dir.names.insert(p.id, display_name(p));
        }
        dir
    }

    /// 按带符号 ID 查询名称，未知时返回 `#id`
    pub fn name(&self, id: i64) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    }
}

/// 用户为“名 姓”，已注销用户只有名；社区为社区名
fn display_name(p: &StoredParticipant) -> String {
    let field = |key: &str| {
        p.json
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    if p.is_group() {
        return field("name");
    }

    let first = field("first_name");
    let deleted = p.json.get("deactivated").and_then(Value::as_str) == Some("deleted");
    let last = field("last_name");
    if deleted || last.is_empty() {
        first
    } else {
        format!("{} {}", first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::remote::mock::FakeRemote;
    use serde_json::json;

    #[test]
    fn collects_nested_senders_and_action_members() {
        let messages = vec![json!({
            "from_id": 1,
            "action": {"type": "chat_invite_user", "member_id": 5},
            "fwd_messages": [{"from_id": -20, "fwd_messages": [{"from_id": 3}]}],
            "reply_message": {"from_id": 4}
        })];
        let mut ids = ParticipantIds::default();
        collect_ids(&messages, &mut ids);
        collect_peer(2_000_000_001, &mut ids);
        collect_peer(-20, &mut ids);

        assert_eq!(ids.users.iter().copied().collect::<Vec<_>>(), vec![1, 3, 4, 5]);
        assert_eq!(ids.groups.iter().copied().collect::<Vec<_>>(), vec![20]);
    }

    #[tokio::test]
    async fn fetches_users_and_groups_separately() {
        let remote = FakeRemote::default()
            .with_user(7, "Ivan", "Petrov")
            .with_group(7, "Club");
        let mut ids = ParticipantIds::default();
        ids.insert_signed(7);
        ids.insert_signed(-7);

        let fetched = fetch_participants(&remote, &ids, RateLimitPolicy::default())
            .await
            .unwrap();
        let dir = ParticipantDirectory::from_stored(&fetched);
        assert_eq!(dir.name(7), "Ivan Petrov");
        assert_eq!(dir.name(-7), "Club");
        assert_eq!(dir.name(8), "#8");
        assert_eq!(*remote.group_requests.lock().unwrap(), vec![vec![7]]);
    }

    #[test]
    fn deleted_users_keep_only_first_name() {
        let p = StoredParticipant::from_json(json!({
            "id": 3, "first_name": "DELETED", "last_name": "", "deactivated": "deleted"
        }))
        .unwrap();
        assert_eq!(display_name(&p), "DELETED");
    }
}
