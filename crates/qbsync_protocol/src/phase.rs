//! Sync pipeline phases.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the data-sync pipeline.
///
/// Phases run in declaration order for every session. The terminal "done"
/// state is represented by the absence of a phase (`Option::None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Company information.
    Company,
    /// Inventory and service items.
    Items,
    /// Customer list.
    Customers,
    /// Sales receipts (and optionally invoices).
    Sales,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 4] = [Phase::Company, Phase::Items, Phase::Customers, Phase::Sales];

    /// Returns the wire tag of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Company => "company",
            Phase::Items => "items",
            Phase::Customers => "customers",
            Phase::Sales => "sales",
        }
    }

    /// Returns the zero-based position in the pipeline.
    pub fn position(&self) -> usize {
        match self {
            Phase::Company => 0,
            Phase::Items => 1,
            Phase::Customers => 2,
            Phase::Sales => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| CodecError::UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }

    #[test]
    fn positions_follow_pipeline_order() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.position(), i);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            "invoices".parse::<Phase>(),
            Err(CodecError::UnknownPhase(_))
        ));
        assert!("Company".parse::<Phase>().is_err());
    }
}
