//! 附件类型
//!
//! 按 `type` 字段分派到封闭的枚举变体；每次加载都从消息 JSON 重新解析，不单独存储

use crate::archive::error::ArchiveError;
use crate::archive::utils::sanitize_filename;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 附件类别，用于下载过滤和输出目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentKind {
    Photo,
    Video,
    Audio,
    Document,
    Sticker,
    Gift,
    AudioMessage,
    Graffiti,
    Link,
    Wall,
    WallReply,
    Poll,
    Call,
    Unknown,
}

impl AttachmentKind {
    /// VK 中的类型标记
    pub fn tag(&self) -> &'static str {
        match self {
            AttachmentKind::Photo => "photo",
            AttachmentKind::Video => "video",
            AttachmentKind::Audio => "audio",
            AttachmentKind::Document => "doc",
            AttachmentKind::Sticker => "sticker",
            AttachmentKind::Gift => "gift",
            AttachmentKind::AudioMessage => "audio_message",
            AttachmentKind::Graffiti => "graffiti",
            AttachmentKind::Link => "link",
            AttachmentKind::Wall => "wall",
            AttachmentKind::WallReply => "wall_reply",
            AttachmentKind::Poll => "poll",
            AttachmentKind::Call => "call",
            AttachmentKind::Unknown => "unknown",
        }
    }

    /// 下载目录名，不可下载的类别返回 None
    pub fn dir(&self) -> Option<&'static str> {
        match self {
            AttachmentKind::Photo => Some("photos"),
            AttachmentKind::Audio => Some("audios"),
            AttachmentKind::Document => Some("docs"),
            AttachmentKind::Sticker => Some("stickers"),
            AttachmentKind::Gift => Some("gifts"),
            AttachmentKind::AudioMessage => Some("audio_messages"),
            AttachmentKind::Graffiti => Some("graffiti"),
            _ => None,
        }
    }

    /// 可下载的类别
    pub fn downloadable() -> &'static [AttachmentKind] {
        &[
            AttachmentKind::Photo,
            AttachmentKind::Audio,
            AttachmentKind::Document,
            AttachmentKind::Sticker,
            AttachmentKind::Gift,
            AttachmentKind::AudioMessage,
            AttachmentKind::Graffiti,
        ]
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AttachmentKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim() {
            "photo" => AttachmentKind::Photo,
            "video" => AttachmentKind::Video,
            "audio" => AttachmentKind::Audio,
            "doc" => AttachmentKind::Document,
            "sticker" => AttachmentKind::Sticker,
            "gift" => AttachmentKind::Gift,
            "audio_message" => AttachmentKind::AudioMessage,
            "graffiti" => AttachmentKind::Graffiti,
            "link" => AttachmentKind::Link,
            "wall" => AttachmentKind::Wall,
            "wall_reply" => AttachmentKind::WallReply,
            "poll" => AttachmentKind::Poll,
            "call" => AttachmentKind::Call,
            other => {
                return Err(ArchiveError::Validation(format!("未知的附件类型: {}", other)));
            }
        };
        Ok(kind)
    }
}

/// 附件
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Photo {
        owner_id: i64,
        id: i64,
        url: Option<String>,
    },
    Video {
        owner_id: i64,
        id: i64,
        title: String,
    },
    Audio {
        artist: String,
        title: String,
        url: Option<String>,
    },
    Document {
        owner_id: i64,
        id: i64,
        title: String,
        ext: String,
        url: Option<String>,
    },
    Sticker {
        sticker_id: i64,
        url: Option<String>,
    },
    Gift {
        id: i64,
        url: Option<String>,
    },
    AudioMessage {
        owner_id: i64,
        id: i64,
        duration: i64,
        url: Option<String>,
    },
    Graffiti {
        owner_id: i64,
        id: i64,
        url: Option<String>,
    },
    Link {
        url: String,
        title: String,
    },
    Wall {
        owner_id: i64,
        id: i64,
    },
    WallReply {
        owner_id: i64,
        post_id: i64,
        id: i64,
    },
    Poll {
        question: String,
    },
    Call {
        video: bool,
        state: String,
        duration: i64,
    },
    Unknown {
        tag: String,
    },
}

/// 可下载附件的下载信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
}

fn int(v: &Value, key: &str) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn string(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_url(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 从尺寸列表中选最大的一张（按宽、高排序）
fn largest(sizes: Option<&Value>) -> Option<String> {
    sizes?
        .as_array()?
        .iter()
        .max_by_key(|s| (int(s, "width"), int(s, "height")))
        .and_then(|s| opt_url(s, "url"))
}

impl Attachment {
    /// 解析一个附件 JSON（`{"type": "photo", "photo": {...}}`）
    pub fn decode(raw: &Value) -> Self {
        let tag = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let body = raw.get(tag).unwrap_or(&Value::Null);

        match tag {
            "photo" => Attachment::Photo {
                owner_id: int(body, "owner_id"),
                id: int(body, "id"),
                url: largest(body.get("sizes")),
            },
            "video" => Attachment::Video {
                owner_id: int(body, "owner_id"),
                id: int(body, "id"),
                title: string(body, "title"),
            },
            "audio" => Attachment::Audio {
                artist: string(body, "artist"),
                title: string(body, "title"),
                url: opt_url(body, "url"),
            },
            "doc" => Attachment::Document {
                owner_id: int(body, "owner_id"),
                id: int(body, "id"),
                title: string(body, "title"),
                ext: string(body, "ext"),
                url: opt_url(body, "url"),
            },
            "sticker" => Attachment::Sticker {
                sticker_id: int(body, "sticker_id"),
                url: largest(body.get("images")),
            },
            "gift" => Attachment::Gift {
                id: int(body, "id"),
                url: opt_url(body, "thumb_256").or_else(|| opt_url(body, "thumb_96")),
            },
            "audio_message" => Attachment::AudioMessage {
                owner_id: int(body, "owner_id"),
                id: int(body, "id"),
                duration: int(body, "duration"),
                url: opt_url(body, "link_mp3").or_else(|| opt_url(body, "link_ogg")),
            },
            "graffiti" => Attachment::Graffiti {
                owner_id: int(body, "owner_id"),
                id: int(body, "id"),
                url: opt_url(body, "url"),
            },
            "link" => Attachment::Link {
                url: string(body, "url"),
                title: string(body, "title"),
            },
            "wall" => Attachment::Wall {
                owner_id: body
                    .get("owner_id")
                    .or_else(|| body.get("from_id"))
                    .and_then(Value::as_i64)
                    .unwrap_or_default(),
                id: int(body, "id"),
            },
            "wall_reply" => Attachment::WallReply {
                owner_id: int(body, "owner_id"),
                post_id: int(body, "post_id"),
                id: int(body, "id"),
            },
            "poll" => Attachment::Poll {
                question: string(body, "question"),
            },
            "call" => Attachment::Call {
                video: body.get("video").and_then(Value::as_bool).unwrap_or(false),
                state: string(body, "state"),
                duration: int(body, "duration"),
            },
            other => Attachment::Unknown {
                tag: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::Photo { .. } => AttachmentKind::Photo,
            Attachment::Video { .. } => AttachmentKind::Video,
            Attachment::Audio { .. } => AttachmentKind::Audio,
            Attachment::Document { .. } => AttachmentKind::Document,
            Attachment::Sticker { .. } => AttachmentKind::Sticker,
            Attachment::Gift { .. } => AttachmentKind::Gift,
            Attachment::AudioMessage { .. } => AttachmentKind::AudioMessage,
            Attachment::Graffiti { .. } => AttachmentKind::Graffiti,
            Attachment::Link { .. } => AttachmentKind::Link,
            Attachment::Wall { .. } => AttachmentKind::Wall,
            Attachment::WallReply { .. } => AttachmentKind::WallReply,
            Attachment::Poll { .. } => AttachmentKind::Poll,
            Attachment::Call { .. } => AttachmentKind::Call,
            Attachment::Unknown { .. } => AttachmentKind::Unknown,
        }
    }

    /// 确定性的文件名，同一附件多次计算结果相同
    pub fn filename(&self) -> Option<String> {
        let name = match self {
            Attachment::Photo { owner_id, id, .. } => format!("{}_{}.jpg", owner_id, id),
            Attachment::Audio { artist, title, .. } => {
                format!("{}.mp3", sanitize_filename(&format!("{} - {}", artist, title)))
            }
            Attachment::Document {
                owner_id, id, ext, ..
            } => {
                let ext = sanitize_filename(ext);
                format!("{}_{}.{}", owner_id, id, ext)
            }
            Attachment::Sticker { sticker_id, .. } => format!("{}.png", sticker_id),
            Attachment::Gift { id, .. } => format!("{}.jpg", id),
            Attachment::AudioMessage { owner_id, id, .. } => format!("{}_{}.mp3", owner_id, id),
            Attachment::Graffiti { owner_id, id, .. } => format!("{}_{}.png", owner_id, id),
            _ => return None,
        };
        Some(name)
    }

    fn url(&self) -> Option<&str> {
        match self {
            Attachment::Photo { url, .. }
            | Attachment::Audio { url, .. }
            | Attachment::Document { url, .. }
            | Attachment::Sticker { url, .. }
            | Attachment::Gift { url, .. }
            | Attachment::AudioMessage { url, .. }
            | Attachment::Graffiti { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    /// 下载信息；没有地址或不可下载时返回 None
    pub fn download_target(&self) -> Option<DownloadTarget> {
        Some(DownloadTarget {
            kind: self.kind(),
            url: self.url()?.to_string(),
            filename: self.filename()?,
        })
    }

    /// 文本记录中的占位文本
    pub fn placeholder(&self) -> String {
        match self {
            Attachment::Photo { .. } => {
                format!("[图片: {}]", self.filename().unwrap_or_default())
            }
            Attachment::Video {
                owner_id, id, title, ..
            } => format!("[视频: {} https://vk.com/video{}_{}]", title, owner_id, id),
            Attachment::Audio { artist, title, .. } => format!("[音频: {} - {}]", artist, title),
            Attachment::Document { title, .. } => format!(
                "[文件: {} ({})]",
                title,
                self.filename().unwrap_or_default()
            ),
            Attachment::Sticker { sticker_id, .. } => format!("[贴纸: {}]", sticker_id),
            Attachment::Gift { id, .. } => format!("[礼物: {}]", id),
            Attachment::AudioMessage { duration, .. } => format!(
                "[语音消息: {} 秒, {}]",
                duration,
                self.filename().unwrap_or_default()
            ),
            Attachment::Graffiti { .. } => {
                format!("[涂鸦: {}]", self.filename().unwrap_or_default())
            }
            Attachment::Link { url, title } if title.is_empty() => format!("[链接: {}]", url),
            Attachment::Link { url, title } => format!("[链接: {} {}]", title, url),
            Attachment::Wall { owner_id, id } => {
                format!("[帖子: https://vk.com/wall{}_{}]", owner_id, id)
            }
            Attachment::WallReply {
                owner_id,
                post_id,
                id,
            } => format!(
                "[评论: https://vk.com/wall{}_{}?reply={}]",
                owner_id, post_id, id
            ),
            Attachment::Poll { question } => format!("[投票: {}]", question),
            Attachment::Call {
                video,
                state,
                duration,
            } => {
                let what = if *video { "视频通话" } else { "语音通话" };
                if state == "reached" {
                    format!("[{}: {} 秒]", what, duration)
                } else {
                    format!("[{}: 未接通]", what)
                }
            }
            Attachment::Unknown { tag } => format!("[未知附件: {}]", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn photo_picks_largest_size_and_stable_name() {
        let raw = json!({"type": "photo", "photo": {
            "owner_id": 10, "id": 20,
            "sizes": [
                {"width": 75, "height": 50, "url": "https://cdn/s.jpg"},
                {"width": 1280, "height": 853, "url": "https://cdn/w.jpg"},
                {"width": 604, "height": 402, "url": "https://cdn/x.jpg"}
            ]
        }});
        let a = Attachment::decode(&raw);
        let b = Attachment::decode(&raw);
        assert_eq!(a, b);
        let target = a.download_target().unwrap();
        assert_eq!(target.url, "https://cdn/w.jpg");
        assert_eq!(target.filename, "10_20.jpg");
        assert_eq!(target.kind.dir(), Some("photos"));
    }

    #[test]
    fn audio_is_named_by_artist_and_title() {
        let a = Attachment::decode(&json!({"type": "audio", "audio": {
            "artist": "AC/DC", "title": "T.N.T.", "url": "https://cdn/a.mp3"
        }}));
        assert_eq!(a.filename().unwrap(), "AC_DC - T.N.T.mp3");
    }

    #[test]
    fn unknown_tag_is_placeholder_only() {
        let a = Attachment::decode(&json!({"type": "market", "market": {}}));
        assert_eq!(a.kind(), AttachmentKind::Unknown);
        assert!(a.download_target().is_none());
        assert_eq!(a.placeholder(), "[未知附件: market]");
    }

    #[test]
    fn video_is_link_only() {
        let a = Attachment::decode(&json!({"type": "video", "video": {"owner_id": -1, "id": 2, "title": "clip"}}));
        assert!(a.download_target().is_none());
        assert!(a.placeholder().contains("https://vk.com/video-1_2"));
    }

    #[test]
    fn parses_filter_tags() {
        assert_eq!("doc".parse::<AttachmentKind>().unwrap(), AttachmentKind::Document);
        assert!("nope".parse::<AttachmentKind>().is_err());
    }
}
