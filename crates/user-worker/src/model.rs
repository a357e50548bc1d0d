//! 用户模型
//!
//! 同时作为事件消息体的 JSON 结构：`{"id", "username", "email", "status"}`。
//! 缺失字段解码为零值，与上游发布方省略字段的习惯保持一致。

use serde::{Deserialize, Serialize};

/// 用户记录
///
/// `id` 由存储分配，0 表示尚未分配；`username` 是唯一键。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_without_id() {
        let body = br#"{"username":"foo","email":"foo@mail.com","status":"new"}"#;
        let user: User = serde_json::from_slice(body).unwrap();

        assert_eq!(user.id, 0);
        assert_eq!(user.username, "foo");
        assert_eq!(user.email, "foo@mail.com");
        assert_eq!(user.status, "new");
    }

    #[test]
    fn test_decode_missing_fields_as_empty() {
        let user: User = serde_json::from_slice(br#"{"id":7}"#).unwrap();
        assert_eq!(user.id, 7);
        assert!(user.username.is_empty());
        assert!(user.status.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(serde_json::from_slice::<User>(b"INVALID").is_err());
        // 负数不是合法的 ID
        assert!(serde_json::from_slice::<User>(br#"{"id":-1}"#).is_err());
    }
}
