use sea_query::{DynIden, Iden, SeaRc};

use eva_core::AttributeKind;

#[derive(Iden, Clone, Copy)]
pub enum StringAttributes {
    Table,
}

#[derive(Iden, Clone, Copy)]
pub enum NumericAttributes {
    Table,
}

/// Columns shared by both attribute tables.
#[derive(Iden, Clone, Copy)]
pub enum Fact {
    EntityKey,
    FromBlock,
    ToBlock,
    Block,
    Key,
    Value,
}

#[derive(Iden, Clone, Copy)]
pub enum Payloads {
    Table,
    EntityKey,
    FromBlock,
    ToBlock,
    Block,
    Payload,
    ContentType,
    StringAttributes,
    NumericAttributes,
}

#[derive(Iden, Clone, Copy)]
pub enum LastBlock {
    Table,
    Id,
    Block,
}

pub fn attribute_table(kind: AttributeKind) -> DynIden {
    match kind {
        AttributeKind::String => SeaRc::new(StringAttributes::Table),
        AttributeKind::Numeric => SeaRc::new(NumericAttributes::Table),
    }
}

pub fn attribute_table_name(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::String => "string_attributes",
        AttributeKind::Numeric => "numeric_attributes",
    }
}

pub const ATTRIBUTE_KINDS: [AttributeKind; 2] = [AttributeKind::String, AttributeKind::Numeric];
