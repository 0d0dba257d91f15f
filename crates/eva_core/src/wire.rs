//! JSON bodies of the entity HTTP contract and their conversion into store inputs.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{
    Block, EntityKey, EntityRecord, EvaError, EvaResult, Filter, NumericAttributes,
    NumericPredicate, OWNER_ATTRIBUTE, QueryInput, StringAttributes, Ttl, WriteEntityInput,
};

pub const DEFAULT_QUERY_LIMIT: u32 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityRequest {
    pub key: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub owner_address: Option<String>,
    #[serde(default)]
    pub string_annotations: StringAttributes,
    #[serde(default)]
    pub numeric_annotations: NumericAttributes,
}

impl CreateEntityRequest {
    /// Requests must carry a key, a content type, an owner and a positive `expiresIn`.
    /// Open-ended entities are only reachable through [`Ttl::Never`] on the core API.
    pub fn into_write_input(self, block: Block) -> EvaResult<WriteEntityInput> {
        let key = EntityKey::from_hex(required("key", &self.key)?)?;
        if self.expires_in <= 0 {
            return Err(EvaError::invalid(format!(
                "expiresIn must be positive, got {}",
                self.expires_in
            )));
        }
        let content_type = required("contentType", &self.content_type)?.to_string();
        let owner = required("ownerAddress", self.owner_address.as_deref().unwrap_or(""))?
            .to_string();
        let payload = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|err| EvaError::invalid(format!("payload is not base64: {err}")))?;
        let mut string_attributes = self.string_annotations;
        string_attributes.insert(OWNER_ATTRIBUTE.to_string(), owner);
        Ok(WriteEntityInput {
            key,
            block,
            payload,
            content_type,
            string_attributes,
            numeric_attributes: self.numeric_annotations,
            ttl: Ttl::Blocks(self.expires_in.unsigned_abs()),
        })
    }
}

fn required<'a>(field: &str, value: &'a str) -> EvaResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EvaError::invalid(format!("{field} is required")));
    }
    Ok(trimmed)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub string_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub numeric_annotations: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub owner_address: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl QueryRequest {
    pub fn into_query_input(self, at_block: Block) -> EvaResult<QueryInput> {
        let mut filter = Filter::new();
        for (name, value) in self.string_annotations {
            filter = filter.string_eq(name, value);
        }
        for (name, raw) in &self.numeric_annotations {
            let predicate = NumericPredicate::from_json(raw)
                .map_err(|err| EvaError::invalid_query(format!("{name}: {err}")))?;
            filter = filter.numeric(name.clone(), predicate);
        }
        filter.validate()?;
        let mut input = QueryInput::new(
            filter,
            at_block,
            self.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        )
        .with_offset(self.offset.unwrap_or(0));
        input.owner = self
            .owner_address
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty());
        Ok(input)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResponse {
    pub key: EntityKey,
    pub payload: String,
    pub content_type: String,
    pub owner: Option<String>,
    pub last_modified_at_block: i64,
    pub expires_at: Option<i64>,
    pub string_annotations: StringAttributes,
    pub numeric_annotations: NumericAttributes,
}

impl From<EntityRecord> for EntityResponse {
    fn from(record: EntityRecord) -> Self {
        let owner = record.owner().map(str::to_string);
        Self {
            key: record.key,
            payload: STANDARD.encode(&record.payload),
            content_type: record.content_type,
            owner,
            last_modified_at_block: record.last_modified_at_block.as_i64(),
            expires_at: record.expires_at_block.map(Block::as_i64),
            string_annotations: record.string_attributes,
            numeric_annotations: record.numeric_attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CreateEntityRequest, QueryRequest};
    use crate::{
        Block, Clause, CompareOp, EntityKey, EvaError, NumericPredicate, OWNER_ATTRIBUTE, Ttl,
    };

    #[test]
    fn create_request_maps_owner_and_ttl() {
        let key = EntityKey::from_bytes([9; 32]);
        let body = json!({
            "key": key.to_hex(),
            "expiresIn": 50,
            "payload": "aGVsbG8=",
            "contentType": "text/plain",
            "ownerAddress": "0xowner",
            "stringAnnotations": { "type": "node" },
            "numericAnnotations": { "cpu_count": 8 }
        });
        let request: CreateEntityRequest = serde_json::from_value(body).expect("decode");
        let input = request.into_write_input(Block(7)).expect("input");
        assert_eq!(input.key, key);
        assert_eq!(input.payload, b"hello");
        assert_eq!(input.ttl, Ttl::Blocks(50));
        assert_eq!(
            input.string_attributes.get(OWNER_ATTRIBUTE).map(String::as_str),
            Some("0xowner")
        );
        assert_eq!(input.numeric_attributes.get("cpu_count"), Some(&8));
    }

    fn minimal_create(expires_in: i64) -> serde_json::Value {
        json!({
            "key": EntityKey::from_bytes([1; 32]).to_hex(),
            "expiresIn": expires_in,
            "contentType": "application/json",
            "ownerAddress": "0xowner"
        })
    }

    #[test]
    fn create_request_rejects_non_positive_expiry() {
        for expires_in in [0, -5] {
            let request: CreateEntityRequest =
                serde_json::from_value(minimal_create(expires_in)).expect("decode");
            let err = request.into_write_input(Block(1)).expect_err("invalid");
            assert!(matches!(err, EvaError::Validation { .. }), "{expires_in}: {err:?}");
        }
    }

    #[test]
    fn create_request_requires_key_content_type_and_owner() {
        for field in ["key", "contentType", "ownerAddress"] {
            let mut body = minimal_create(5);
            body[field] = json!("  ");
            let request: CreateEntityRequest = serde_json::from_value(body).expect("decode");
            let err = request.into_write_input(Block(1)).expect_err("invalid");
            assert!(err.to_string().contains(field), "{field}: {err}");
        }

        let mut body = minimal_create(5);
        body.as_object_mut().expect("object").remove("ownerAddress");
        let request: CreateEntityRequest = serde_json::from_value(body).expect("decode");
        assert!(request.into_write_input(Block(1)).is_err());
    }

    #[test]
    fn create_request_accepts_empty_payload() {
        let request: CreateEntityRequest =
            serde_json::from_value(minimal_create(3)).expect("decode");
        let input = request.into_write_input(Block(1)).expect("input");
        assert!(input.payload.is_empty());
        assert_eq!(input.ttl, Ttl::Blocks(3));
    }

    #[test]
    fn query_request_ignores_blank_owner() {
        let body = json!({ "ownerAddress": "", "stringAnnotations": { "type": "node" } });
        let request: QueryRequest = serde_json::from_value(body).expect("decode");
        let input = request.into_query_input(Block(1)).expect("input");
        assert_eq!(input.owner, None);

        let body = json!({ "ownerAddress": "0xowner" });
        let request: QueryRequest = serde_json::from_value(body).expect("decode");
        let input = request.into_query_input(Block(1)).expect("input");
        assert_eq!(input.owner.as_deref(), Some("0xowner"));
    }

    #[test]
    fn query_request_decides_numeric_predicates() {
        let body = json!({
            "stringAnnotations": { "region": "eu-west" },
            "numericAnnotations": { "cpu_count": ">=8", "ram_gb": 32 },
            "limit": 5
        });
        let request: QueryRequest = serde_json::from_value(body).expect("decode");
        let input = request.into_query_input(Block(3)).expect("input");
        assert_eq!(input.limit, 5);
        let clauses: Vec<_> = input
            .filter
            .predicates
            .iter()
            .map(|p| (p.attribute.as_str(), p.clause.clone()))
            .collect();
        assert!(clauses.contains(&(
            "cpu_count",
            Clause::Numeric(NumericPredicate::Compare(CompareOp::Gte, 8))
        )));
        assert!(clauses.contains(&("ram_gb", Clause::Numeric(NumericPredicate::Equals(32)))));
    }

    #[test]
    fn query_request_rejects_unknown_operator() {
        let body = json!({ "numericAnnotations": { "cpu_count": "~8" } });
        let request: QueryRequest = serde_json::from_value(body).expect("decode");
        let err = request.into_query_input(Block(3)).expect_err("invalid");
        assert!(matches!(err, EvaError::InvalidQuery { .. }));
    }

    #[test]
    fn query_request_defaults_limit() {
        let request = QueryRequest::default();
        let input = request.into_query_input(Block(1)).expect("input");
        assert_eq!(input.limit, super::DEFAULT_QUERY_LIMIT);
        assert!(input.filter.is_empty());
    }
}
