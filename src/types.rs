use serde::{Deserialize, Deserializer, Serialize};

/// One tracked batch at one recorded processing step.
///
/// The serde layout is the persisted world-state format: camelCase field
/// names, list fields always written as arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResource {
    pub id: String,
    pub batch_id: String,
    pub actor_id: String,
    pub step: String,
    pub product_name: String,
    pub product_category: String,
    pub timestamp: String,
    #[serde(deserialize_with = "nullable_list")]
    pub parent_batches: Vec<String>,
    #[serde(deserialize_with = "nullable_list")]
    pub attachment_refs: Vec<String>,
}

impl BatchResource {
    /// Encode the record into its stored byte form
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(self).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    /// Decode a record from its stored byte form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))
    }
}

// Older ledgers marshalled an unset list as `null`.
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A list-valued creation argument
///
/// Distinguishes "nothing supplied" from "explicitly supplied, possibly empty".
/// Both store as an empty list when there are no entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Vec<String>>", into = "Option<Vec<String>>")]
pub enum ListArg {
    #[default]
    Absent,
    Present(Vec<String>),
}

impl ListArg {
    /// Decode the ledger-transaction encoding of a list argument
    ///
    /// An empty string is `Absent`; otherwise the text must be a JSON array
    /// of strings.
    pub fn decode(encoded: &str) -> Result<Self, RegistryError> {
        if encoded.is_empty() {
            return Ok(ListArg::Absent);
        }
        serde_json::from_str::<Vec<String>>(encoded)
            .map(ListArg::Present)
            .map_err(|e| RegistryError::Serialization(format!("invalid list argument: {}", e)))
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ListArg::Present(_))
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            ListArg::Absent => Vec::new(),
            ListArg::Present(items) => items,
        }
    }
}

impl From<Option<Vec<String>>> for ListArg {
    fn from(value: Option<Vec<String>>) -> Self {
        match value {
            Some(items) => ListArg::Present(items),
            None => ListArg::Absent,
        }
    }
}

impl From<ListArg> for Option<Vec<String>> {
    fn from(value: ListArg) -> Self {
        match value {
            ListArg::Absent => None,
            ListArg::Present(items) => Some(items),
        }
    }
}

/// Inputs for creating a batch record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatch {
    pub id: String,
    pub batch_id: String,
    pub actor_id: String,
    pub step: String,
    pub product_name: String,
    pub product_category: String,
    pub timestamp: String,
    #[serde(default)]
    pub parent_batches: ListArg,
    #[serde(default)]
    pub attachment_refs: ListArg,
}

impl NewBatch {
    /// Build creation inputs from the positional ledger-transaction arguments
    ///
    /// The last two arguments are the encoded list strings (see [`ListArg::decode`]).
    #[allow(clippy::too_many_arguments)]
    pub fn from_encoded(
        id: &str,
        batch_id: &str,
        actor_id: &str,
        step: &str,
        product_name: &str,
        product_category: &str,
        timestamp: &str,
        parent_batches_encoded: &str,
        attachment_refs_encoded: &str,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            id: id.to_string(),
            batch_id: batch_id.to_string(),
            actor_id: actor_id.to_string(),
            step: step.to_string(),
            product_name: product_name.to_string(),
            product_category: product_category.to_string(),
            timestamp: timestamp.to_string(),
            parent_batches: ListArg::decode(parent_batches_encoded)?,
            attachment_refs: ListArg::decode(attachment_refs_encoded)?,
        })
    }

    pub fn into_resource(self) -> BatchResource {
        BatchResource {
            id: self.id,
            batch_id: self.batch_id,
            actor_id: self.actor_id,
            step: self.step,
            product_name: self.product_name,
            product_category: self.product_category,
            timestamp: self.timestamp,
            parent_batches: self.parent_batches.into_vec(),
            attachment_refs: self.attachment_refs.into_vec(),
        }
    }
}

/// Errors raised by world-state adapters
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    /// A compare-and-put found different bytes than expected under `key`.
    #[error("concurrent modification of key {key}")]
    Conflict { key: String },

    #[error("world state key must not be empty")]
    EmptyKey,

    #[error("world state unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("the batch {0} already exists")]
    AlreadyExists(String),

    #[error("the batch {0} does not exist")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("failed to access world state: {0}")]
    Storage(#[from] StoreError),

    #[error("query failed: {0}")]
    Query(String),
}

impl RegistryError {
    /// Stable short name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::AlreadyExists(_) => "AlreadyExists",
            RegistryError::NotFound(_) => "NotFound",
            RegistryError::Serialization(_) => "Serialization",
            RegistryError::Storage(_) => "Storage",
            RegistryError::Query(_) => "Query",
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchResource {
        BatchResource {
            id: "b1".to_string(),
            batch_id: "BARREL0042".to_string(),
            actor_id: "WINEPRODUCER01".to_string(),
            step: "BOTTLING".to_string(),
            product_name: "Teran".to_string(),
            product_category: "Refosco".to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            parent_batches: vec![],
            attachment_refs: vec!["Qm111".to_string()],
        }
    }

    #[test]
    fn test_stored_layout_uses_ledger_field_names() {
        let value: serde_json::Value = serde_json::from_slice(&sample().to_bytes().unwrap()).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "actorId",
                "attachmentRefs",
                "batchId",
                "id",
                "parentBatches",
                "productCategory",
                "productName",
                "step",
                "timestamp",
            ]
        );
        // Empty lists are written, not omitted
        assert_eq!(obj["parentBatches"], serde_json::json!([]));
    }

    #[test]
    fn test_null_lists_decode_as_empty() {
        let raw = br#"{"id":"x","batchId":"","actorId":"","step":"","productName":"","productCategory":"","timestamp":"","parentBatches":null,"attachmentRefs":null}"#;
        let batch = BatchResource::from_bytes(raw).unwrap();
        assert!(batch.parent_batches.is_empty());
        assert!(batch.attachment_refs.is_empty());
    }

    #[test]
    fn test_corrupt_bytes_are_serialization_errors() {
        let err = BatchResource::from_bytes(b"not json").unwrap_err();
        assert_eq!(err.kind(), "Serialization");
    }

    #[test]
    fn test_list_arg_decoding() {
        assert_eq!(ListArg::decode("").unwrap(), ListArg::Absent);
        assert_eq!(ListArg::decode("[]").unwrap(), ListArg::Present(vec![]));
        assert_eq!(
            ListArg::decode(r#"["a","b"]"#).unwrap(),
            ListArg::Present(vec!["a".to_string(), "b".to_string()])
        );
        assert!(matches!(ListArg::decode("a,b"), Err(RegistryError::Serialization(_))));
        assert!(matches!(ListArg::decode(r#"{"a":1}"#), Err(RegistryError::Serialization(_))));
        assert!(matches!(ListArg::decode("[1,2]"), Err(RegistryError::Serialization(_))));
    }

    #[test]
    fn test_new_batch_accepts_missing_lists() {
        let raw = r#"{"id":"b2","batchId":"B","actorId":"A","step":"S","productName":"P","productCategory":"C","timestamp":"T","attachmentRefs":["Qm1"]}"#;
        let new_batch: NewBatch = serde_json::from_str(raw).unwrap();
        assert_eq!(new_batch.parent_batches, ListArg::Absent);
        assert!(new_batch.attachment_refs.is_present());

        let resource = new_batch.into_resource();
        assert!(resource.parent_batches.is_empty());
        assert_eq!(resource.attachment_refs, vec!["Qm1".to_string()]);
    }
}
