//! message contracts exchanged with the outside world. field names follow
//! the camelCase wire format used by the capture, compression and archive
//! services.

use std::collections::HashMap;

use canopy_lib::fs::NodeKind;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// table name reported by change capture for file nodes
pub const NODES_TABLE: &str = "nodes";

pub mod columns {
    pub const KEY: &str = "key";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const THUMBNAIL: &str = "thumbnail";
    pub const DELETED: &str = "deleted";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub table: String,
    pub change_type: ChangeType,
    #[serde(default)]
    pub columns: HashMap<String, ColumnChange>,
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None
    }
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "1" | "t" | "true" | "TRUE"),
        _ => false
    }
}

fn value_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false
    }
}

impl ChangeNotification {
    pub fn is_nodes(&self) -> bool {
        self.table == NODES_TABLE
    }

    pub fn after_text(&self, column: &str) -> Option<String> {
        self.columns.get(column).and_then(|c| value_text(&c.after))
    }

    /// the value of `column` after the change, falling back to the value
    /// before it (delete notifications only carry `before`)
    pub fn current_text(&self, column: &str) -> Option<String> {
        let change = self.columns.get(column)?;

        value_text(&change.after).or_else(|| value_text(&change.before))
    }

    pub fn kind(&self) -> Option<NodeKind> {
        let change = self.columns.get(columns::KIND)?;

        match &change.after {
            Value::Number(n) => n.as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .and_then(NodeKind::from_i16),
            Value::String(s) => NodeKind::from_str(s),
            _ => None
        }
    }

    /// true when the column went from empty/null to a non-empty value
    pub fn became_non_empty(&self, column: &str) -> bool {
        let Some(change) = self.columns.get(column) else {
            return false;
        };

        value_empty(&change.before) && !value_empty(&change.after)
    }

    /// true when a boolean-like column flipped from false to true
    pub fn flipped_on(&self, column: &str) -> bool {
        let Some(change) = self.columns.get(column) else {
            return false;
        };

        !value_truthy(&change.before) && value_truthy(&change.after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionRequest {
    pub identifier: String,
    pub external_content_id: String,
    pub reply_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub identifier: String,
    pub produced_external_content_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnzipRequest {
    pub external_content_id: String,
    pub reply_topic: String,
    pub correlation_payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnzipEntry {
    pub name: String,
    pub external_content_id: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnzipResult {
    pub correlation_payload: String,
    #[serde(default)]
    pub entries: Vec<UnzipEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryLinkRequest {
    pub acting_user_identity: String,
    pub acting_username: String,
    pub parent_directory_key: String,
    pub parent_directory_name: String,
    pub image_name: String,
    pub image_file_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleted {
    pub file_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeRecalc {
    pub directory_key: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn change(value: Value) -> ChangeNotification {
        serde_json::from_value(value).expect("invalid change notification")
    }

    #[test]
    fn insert_notification() {
        let notify = change(json!({
            "table": "nodes",
            "changeType": "INSERT",
            "columns": {
                "key": {"after": "abc"},
                "kind": {"after": 0},
                "name": {"after": "a.png"}
            }
        }));

        assert!(notify.is_nodes());
        assert_eq!(notify.change_type, ChangeType::Insert);
        assert_eq!(notify.after_text(columns::KEY).as_deref(), Some("abc"));
        assert_eq!(notify.kind(), Some(NodeKind::File));
    }

    #[test]
    fn thumbnail_transition() {
        let notify = change(json!({
            "table": "nodes",
            "changeType": "UPDATE",
            "columns": {
                "thumbnail": {"before": "", "after": "thumb-1"},
                "deleted": {"before": false, "after": false}
            }
        }));

        assert!(notify.became_non_empty(columns::THUMBNAIL));
        assert!(!notify.flipped_on(columns::DELETED));

        let unchanged = change(json!({
            "table": "nodes",
            "changeType": "UPDATE",
            "columns": {
                "thumbnail": {"before": "thumb-1", "after": "thumb-2"}
            }
        }));

        assert!(!unchanged.became_non_empty(columns::THUMBNAIL));
    }

    #[test]
    fn delete_flag_transition() {
        let notify = change(json!({
            "table": "nodes",
            "changeType": "UPDATE",
            "columns": {
                "deleted": {"before": 0, "after": 1}
            }
        }));

        assert!(notify.flipped_on(columns::DELETED));
    }

    #[test]
    fn wire_names() {
        let result: UnzipResult = serde_json::from_value(json!({
            "correlationPayload": "{}",
            "entries": [{"name": "a.txt", "externalContentId": "c1", "size": 4}]
        })).expect("invalid unzip result");

        assert_eq!(result.entries[0].external_content_id, "c1");

        let link = serde_json::to_value(FileDeleted { file_key: "k".into() })
            .expect("failed to serialize");

        assert_eq!(link, json!({"fileKey": "k"}));
    }
}
