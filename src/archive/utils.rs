//! 通用工具函数

use crate::archive::error::ArchiveError;
use crate::archive::types::CHAT_PEER_OFFSET;
use std::collections::BTreeSet;

/// 文件名最大字符数
const MAX_FILENAME_CHARS: usize = 100;

/// 解析逗号分隔的会话 ID 列表
///
/// 支持三种写法：用户 `123`、社区 `-123`、群聊简写 `c12`（= 2000000012）
pub fn parse_peer_ids(input: &str) -> Result<BTreeSet<i64>, ArchiveError> {
    let mut res = BTreeSet::new();

    for raw in input.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let id = if let Some(chat) = raw.strip_prefix('c') {
            chat.parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(|n| CHAT_PEER_OFFSET + n)
        } else {
            raw.parse::<i64>().ok().filter(|n| *n != 0)
        };

        match id {
            Some(id) => {
                res.insert(id);
            }
            None => {
                return Err(ArchiveError::Validation(format!("无效的会话 ID: {}", raw)));
            }
        }
    }

    Ok(res)
}

/// 将任意文本转换为安全的文件名
///
/// 路径分隔符和控制字符替换为 `_`，首尾空白与点号去掉，结果为空时返回 `untitled`
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_FILENAME_CHARS)
        .collect();

    let trimmed = sanitized.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
