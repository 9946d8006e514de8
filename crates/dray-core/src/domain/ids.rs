//! Task identifiers.
//!
//! # ULID ベースの生成 + 任意の上書き
//! 生成される ID は ULID (Universally Unique Lexicographically Sortable
//! Identifier) です。timestamp が先頭にあるため、生成順序でソートできます。
//!
//! ただし呼び出し側が独自の ID を持ち込むこともできるため（元システムの
//! 識別子をそのまま使うケース）、内部表現は文字列です。ID はそのまま
//! ファイル名として使われるので、パス区切り文字を含む ID は拒否されます。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a task. Doubles as the on-disk file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap a caller-supplied identifier.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Generate a fresh, time-sortable identifier.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ID がそのままファイル名として安全に使えるか。
    ///
    /// パス区切りや `..` を含む ID を受け入れると bucket ディレクトリの
    /// 外にファイルが作られてしまうため、作成時に拒否します。
    pub(crate) fn is_safe_filename(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\'])
            && !self.0.contains('\0')
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_sort_by_creation_time() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let a = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TaskId::generate();
        assert!(a < b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TaskId::new("my-task");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"my-task\"");

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn path_like_ids_are_unsafe() {
        assert!(TaskId::new("plain-id").is_safe_filename());
        assert!(TaskId::new("01J0QZ2M9Q").is_safe_filename());

        assert!(!TaskId::new("").is_safe_filename());
        assert!(!TaskId::new(".").is_safe_filename());
        assert!(!TaskId::new("..").is_safe_filename());
        assert!(!TaskId::new("a/b").is_safe_filename());
        assert!(!TaskId::new("a\\b").is_safe_filename());
    }
}
