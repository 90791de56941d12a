//! Firestore REST API types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Used as the optimistic-concurrency token for updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Create a new document with the given fields.
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Same as `new`, with the full resource name set (required for commit writes).
    pub fn named(name: impl Into<String>, fields: HashMap<String, Value>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(fields)
        }
    }

    /// Read and convert a single field.
    pub fn get<T: FromFirestoreValue>(&self, field: &str) -> Option<T> {
        self.fields
            .as_ref()
            .and_then(|f| f.get(field))
            .and_then(T::from_firestore_value)
    }

    /// Last segment of the resource name.
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }
}

// ============================================================================
// Commit Types (atomic multi-document writes)
// ============================================================================

/// A single write operation in a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    /// Update or insert a document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,

    /// Delete a document by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,

    /// Field mask for partial updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,

    /// Precondition for the write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

impl Write {
    /// Create-only write: fails if the document already exists.
    pub fn create(document: Document) -> Self {
        Self {
            update: Some(document),
            delete: None,
            update_mask: None,
            current_document: Some(Precondition::must_not_exist()),
        }
    }

    /// Masked update guarded by the document's last `updateTime`.
    pub fn update_at(document: Document, field_paths: Vec<String>, update_time: String) -> Self {
        Self {
            update: Some(document),
            delete: None,
            update_mask: Some(DocumentMask { field_paths }),
            current_document: Some(Precondition::updated_at(update_time)),
        }
    }

    /// Delete guarded by the document's last `updateTime`.
    pub fn delete_at(name: String, update_time: String) -> Self {
        Self {
            update: None,
            delete: Some(name),
            update_mask: None,
            current_document: Some(Precondition::updated_at(update_time)),
        }
    }
}

/// Document field mask for partial updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

/// Precondition for a write operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    /// Document must (or must not) exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,

    /// Document must have this update time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Precondition {
    pub fn must_not_exist() -> Self {
        Self {
            exists: Some(false),
            update_time: None,
        }
    }

    pub fn updated_at(update_time: String) -> Self {
        Self {
            exists: None,
            update_time: Some(update_time),
        }
    }
}

/// `documents:commit` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

/// Result of a single write in a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// Update time of the written document.
    pub update_time: Option<String>,
}

/// `documents:commit` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// Results for each write, in order.
    pub write_results: Option<Vec<WriteResult>>,
    pub commit_time: Option<String>,
}

// ============================================================================
// Query Types
// ============================================================================

/// `runQuery` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

/// One element of the `runQuery` response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl StructuredQuery {
    /// Query over a single direct child collection.
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.into(),
                all_descendants: false,
            }],
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: &str, op: FieldOperator, value: Value) -> Self {
        self.filter = Some(Filter {
            field_filter: FieldFilter {
                field: FieldReference::new(field),
                op,
                value,
            },
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: FieldReference::new(field),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
    #[serde(default)]
    pub all_descendants: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_filter: FieldFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: FieldOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    Equal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

impl FieldReference {
    pub fn new(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub field: FieldReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ascending,
    Descending,
}

// ============================================================================
// Value conversion
// ============================================================================

/// Convert a Rust value to Firestore Value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for HashMap<String, T> {
    fn to_firestore_value(&self) -> Value {
        Value::MapValue(MapValue {
            fields: Some(
                self.iter()
                    .map(|(k, v)| (k.clone(), v.to_firestore_value()))
                    .collect(),
            ),
        })
    }
}

/// Convert Firestore Value to Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for bool {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for HashMap<String, String> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::MapValue(map) => Some(
                map.fields
                    .iter()
                    .flatten()
                    .filter_map(|(k, v)| String::from_firestore_value(v).map(|s| (k.clone(), s)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_serializes_where_and_order() {
        let query = StructuredQuery::collection("credit_transactions")
            .with_filter("kind", FieldOperator::Equal, "deduction".to_firestore_value())
            .order_by("created_at", Direction::Descending)
            .limit(20);

        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["from"][0]["collectionId"], "credit_transactions");
        assert_eq!(json["where"]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(json["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(json["limit"], 20);
    }

    #[test]
    fn test_create_write_has_exists_false() {
        let write = Write::create(Document::named("projects/p/x", HashMap::new()));
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["currentDocument"]["exists"], false);
        assert!(json.get("updateMask").is_none());
    }

    #[test]
    fn test_document_field_access() {
        let mut fields = HashMap::new();
        fields.insert("credits_remaining_minor".to_string(), 700i64.to_firestore_value());
        let mut meta = HashMap::new();
        meta.insert("plan".to_string(), "pro".to_string());
        fields.insert("metadata".to_string(), meta.to_firestore_value());
        let doc = Document::named("projects/p/databases/d/documents/accounts/u1", fields);

        assert_eq!(doc.get::<i64>("credits_remaining_minor"), Some(700));
        assert_eq!(doc.get::<String>("credits_remaining_minor"), None);
        assert_eq!(
            doc.get::<HashMap<String, String>>("metadata").unwrap().get("plan"),
            Some(&"pro".to_string())
        );
        assert_eq!(doc.doc_id(), Some("u1"));
    }
}
