use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EvaError, EvaResult};

/// Logical clock value. Rows are valid over `[from_block, to_block)`.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Block(pub i64);

impl Block {
    /// `to_block` of a row that never expires.
    pub const OPEN: Block = Block(i64::MAX);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn is_open(self) -> bool {
        self == Self::OPEN
    }

    /// End of the validity window for a row written at `self`.
    pub fn expiry(self, ttl: Ttl) -> EvaResult<Block> {
        match ttl {
            Ttl::Never => Ok(Block::OPEN),
            Ttl::Blocks(0) => Err(EvaError::invalid("ttl must be at least one block")),
            Ttl::Blocks(blocks) => {
                let blocks = i64::try_from(blocks)
                    .map_err(|_| EvaError::invalid(format!("ttl {blocks} out of range")))?;
                self.0
                    .checked_add(blocks)
                    .filter(|end| *end < i64::MAX)
                    .map(Block)
                    .ok_or_else(|| {
                        EvaError::invalid(format!("block {} + ttl {blocks} overflows", self.0))
                    })
            }
        }
    }
}

impl From<i64> for Block {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            write!(f, "open")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ttl {
    Blocks(u64),
    Never,
}

#[cfg(test)]
mod tests {
    use super::{Block, Ttl};

    #[test]
    fn expiry_adds_ttl_or_stays_open() {
        assert_eq!(Block(10).expiry(Ttl::Blocks(5)).expect("ttl"), Block(15));
        assert_eq!(Block(10).expiry(Ttl::Never).expect("never"), Block::OPEN);
        assert!(Block(10).expiry(Ttl::Blocks(0)).is_err());
        assert!(Block(i64::MAX - 1).expiry(Ttl::Blocks(1)).is_err());
    }
}
