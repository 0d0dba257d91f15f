use serde::{Deserialize, Serialize};

use crate::{
    AttributeKind, Block, EntityKey, EvaError, EvaResult, NumericAttributes, StringAttributes, Ttl,
    is_system_attribute,
};

/// One full-replacement write of an entity at `block`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteEntityInput {
    pub key: EntityKey,
    pub block: Block,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub string_attributes: StringAttributes,
    pub numeric_attributes: NumericAttributes,
    pub ttl: Ttl,
}

impl WriteEntityInput {
    pub fn new(key: EntityKey, block: Block, ttl: Ttl) -> Self {
        Self {
            key,
            block,
            payload: Vec::new(),
            content_type: String::new(),
            string_attributes: StringAttributes::new(),
            numeric_attributes: NumericAttributes::new(),
            ttl,
        }
    }

    pub fn with_payload(
        mut self,
        payload: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        self.payload = payload.into();
        self.content_type = content_type.into();
        self
    }

    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_numeric(mut self, name: impl Into<String>, value: i64) -> Self {
        self.numeric_attributes.insert(name.into(), value);
        self
    }

    pub fn validate(&self) -> EvaResult<Block> {
        let names = self
            .string_attributes
            .keys()
            .chain(self.numeric_attributes.keys());
        for name in names {
            if name.trim().is_empty() {
                return Err(EvaError::invalid(format!(
                    "entity {} has an empty attribute name",
                    self.key
                )));
            }
        }
        if let Some(name) = self
            .string_attributes
            .keys()
            .find(|name| self.numeric_attributes.contains_key(*name))
        {
            return Err(EvaError::invalid(format!(
                "attribute '{name}' is both string and numeric"
            )));
        }
        self.block.expiry(self.ttl)
    }
}

/// Writes and deletes committed together as one block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockBatch {
    pub block: Block,
    pub deletes: Vec<EntityKey>,
    pub writes: Vec<WriteEntityInput>,
}

impl BlockBatch {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            deletes: Vec::new(),
            writes: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockReceipt {
    pub block: Block,
    pub entities_written: usize,
    pub entities_deleted: usize,
    pub string_rows: usize,
    pub numeric_rows: usize,
}

/// Entity state materialised from the payload row visible at a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub last_modified_at_block: Block,
    pub expires_at_block: Option<Block>,
    pub string_attributes: StringAttributes,
    pub numeric_attributes: NumericAttributes,
    pub system_string_attributes: StringAttributes,
    pub system_numeric_attributes: NumericAttributes,
}

impl EntityRecord {
    /// Splits `$`-prefixed names away from user annotations.
    pub fn from_parts(
        key: EntityKey,
        range: (Block, Block),
        payload: Vec<u8>,
        content_type: String,
        strings: StringAttributes,
        numerics: NumericAttributes,
    ) -> Self {
        let (system_string_attributes, string_attributes) = strings
            .into_iter()
            .partition(|(name, _)| is_system_attribute(name));
        let (system_numeric_attributes, numeric_attributes) = numerics
            .into_iter()
            .partition(|(name, _)| is_system_attribute(name));
        let (from_block, to_block) = range;
        Self {
            key,
            payload,
            content_type,
            last_modified_at_block: from_block,
            expires_at_block: (!to_block.is_open()).then_some(to_block),
            string_attributes,
            numeric_attributes,
            system_string_attributes,
            system_numeric_attributes,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.system_string_attributes
            .get(crate::OWNER_ATTRIBUTE)
            .map(String::as_str)
    }
}

/// One stored attribute version, as kept in the fact tables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub kind: AttributeKind,
    pub attribute: String,
    pub value: FactValue,
    pub from_block: Block,
    pub to_block: Block,
}

impl FactRow {
    pub fn is_visible_at(&self, at: Block) -> bool {
        self.from_block <= at && self.to_block > at
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    String(String),
    Numeric(i64),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub watermark: Block,
    pub string_rows: u64,
    pub numeric_rows: u64,
    pub payload_rows: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.string_rows + self.numeric_rows + self.payload_rows
    }
}

/// More than one row of one `(entity_key, key)` visible at the same block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityFinding {
    pub table: String,
    pub key: EntityKey,
    pub attribute: Option<String>,
    pub visible_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::{EntityRecord, WriteEntityInput};
    use crate::{Block, EntityKey, Ttl};

    #[test]
    fn record_splits_system_attributes() {
        let input = WriteEntityInput::new(EntityKey::from_bytes([1; 32]), Block(3), Ttl::Never)
            .with_string("$owner", "0xabc")
            .with_string("type", "node")
            .with_numeric("$expiration", 99)
            .with_numeric("cpu_count", 8);
        let record = EntityRecord::from_parts(
            input.key,
            (Block(3), Block::OPEN),
            Vec::new(),
            String::new(),
            input.string_attributes,
            input.numeric_attributes,
        );
        assert_eq!(record.owner(), Some("0xabc"));
        assert_eq!(record.string_attributes.len(), 1);
        assert_eq!(record.numeric_attributes.get("cpu_count"), Some(&8));
        assert_eq!(record.system_numeric_attributes.get("$expiration"), Some(&99));
        assert_eq!(record.expires_at_block, None);
    }

    #[test]
    fn validate_rejects_blank_and_clashing_names() {
        let key = EntityKey::from_bytes([2; 32]);
        let input = WriteEntityInput::new(key, Block(1), Ttl::Blocks(5)).with_string(" ", "x");
        assert!(input.validate().is_err());
        let input = WriteEntityInput::new(key, Block(1), Ttl::Blocks(5))
            .with_string("a", "x")
            .with_numeric("a", 1);
        assert!(input.validate().is_err());
        let input = WriteEntityInput::new(key, Block(1), Ttl::Blocks(5)).with_string("a", "x");
        assert_eq!(input.validate().expect("valid"), Block(6));
    }
}
