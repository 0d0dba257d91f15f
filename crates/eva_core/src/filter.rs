use serde::{Deserialize, Serialize};

use crate::{AttributeKind, Block, EvaError, EvaResult, NumericPredicate, StringPredicate};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Clause {
    String(StringPredicate),
    Numeric(NumericPredicate),
}

impl Clause {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Clause::String(_) => AttributeKind::String,
            Clause::Numeric(_) => AttributeKind::Numeric,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub attribute: String,
    pub clause: Clause,
}

/// Conjunction of per-attribute predicates. Tags are string equalities that
/// only assert existence of a sibling fact (`type = workload`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
    pub tags: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string_eq(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate {
            attribute: attribute.into(),
            clause: Clause::String(StringPredicate::Equals(value.into())),
        });
        self
    }

    pub fn numeric(mut self, attribute: impl Into<String>, predicate: NumericPredicate) -> Self {
        self.predicates.push(Predicate {
            attribute: attribute.into(),
            clause: Clause::Numeric(predicate),
        });
        self
    }

    pub fn with_tag(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((attribute.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.tags.is_empty()
    }

    pub fn validate(&self) -> EvaResult<()> {
        let names = self
            .predicates
            .iter()
            .map(|predicate| predicate.attribute.as_str())
            .chain(self.tags.iter().map(|(name, _)| name.as_str()));
        for name in names {
            if name.trim().is_empty() {
                return Err(EvaError::invalid_query("predicate attribute name is empty"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub attribute: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn numeric_asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: AttributeKind::Numeric,
            direction: SortDirection::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub filter: Filter,
    pub owner: Option<String>,
    pub at_block: Block,
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    pub order_by: Option<OrderBy>,
}

impl QueryInput {
    pub fn new(filter: Filter, at_block: Block, limit: u32) -> Self {
        Self {
            filter,
            owner: None,
            at_block,
            limit,
            offset: 0,
            order_by: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn validate(&self) -> EvaResult<()> {
        self.filter.validate()?;
        if let Some(order_by) = &self.order_by {
            if order_by.attribute.trim().is_empty() {
                return Err(EvaError::invalid_query("sort attribute name is empty"));
            }
            let conflicting = self.filter.predicates.iter().any(|predicate| {
                predicate.attribute == order_by.attribute
                    && predicate.clause.kind() != order_by.kind
            });
            if conflicting {
                return Err(EvaError::invalid_query(format!(
                    "sort attribute '{}' is filtered as a different kind",
                    order_by.attribute
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, OrderBy, QueryInput};
    use crate::{Block, CompareOp, NumericPredicate};

    #[test]
    fn empty_attribute_names_are_rejected() {
        let filter = Filter::new().string_eq("", "x");
        assert!(filter.validate().is_err());
        let filter = Filter::new().with_tag(" ", "x");
        assert!(filter.validate().is_err());
    }

    #[test]
    fn sort_kind_must_agree_with_filter() {
        let filter = Filter::new().string_eq("price_hour", "cheap");
        let input =
            QueryInput::new(filter, Block(1), 10).order_by(OrderBy::numeric_asc("price_hour"));
        assert!(input.validate().is_err());

        let filter =
            Filter::new().numeric("price_hour", NumericPredicate::Compare(CompareOp::Lte, 5));
        let input =
            QueryInput::new(filter, Block(1), 10).order_by(OrderBy::numeric_asc("price_hour"));
        assert!(input.validate().is_ok());
    }
}
