//! Per-capability value constraints advertised by a gateway.
//!
//! A `LIMITS` line reports the legal values for one capability, either as
//! an enumerated set (`LIMITS:MODE,[AUTO,HEAT,DRY,FAN,COOL]`) or as a
//! numeric range (`LIMITS:SETPTEMP,[160,320]`). Every outgoing `SET` is
//! checked against the current limits before any network I/O; a capability
//! with no limits data is unconstrained.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::Capability;

/// The advertised constraint for one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limits {
    /// An enumerated set of legal wire tokens (possibly mixed with
    /// numeric members, e.g. `[AUTO,1,2,3,4]`).
    ValueSet(Vec<String>),
    /// An inclusive numeric range in wire units.
    Range {
        /// Smallest legal value.
        min: i32,
        /// Largest legal value.
        max: i32,
    },
}

impl Limits {
    /// Build limits from the bracketed member list of a `LIMITS` line.
    ///
    /// If every member is numeric the set is collapsed to a range over its
    /// extremes (`[160,320]` becomes 160..=320); otherwise the members are
    /// kept as an enumerated set, normalized to uppercase.
    pub fn from_values(values: &[String]) -> Limits {
        let numeric: Vec<i32> = values.iter().filter_map(|v| v.trim().parse().ok()).collect();
        if !values.is_empty() && numeric.len() == values.len() {
            let min = *numeric.iter().min().unwrap_or(&0);
            let max = *numeric.iter().max().unwrap_or(&0);
            Limits::Range { min, max }
        } else {
            Limits::ValueSet(
                values
                    .iter()
                    .map(|v| v.trim().to_ascii_uppercase())
                    .collect(),
            )
        }
    }

    /// Whether the given wire token is allowed by this limit.
    ///
    /// Range limits require the token to parse as a number inside the
    /// range; value sets are matched case-insensitively.
    pub fn allows(&self, value: &str) -> bool {
        match self {
            Limits::Range { min, max } => value
                .trim()
                .parse::<i32>()
                .map(|v| (*min..=*max).contains(&v))
                .unwrap_or(false),
            Limits::ValueSet(values) => {
                let needle = value.trim().to_ascii_uppercase();
                values.iter().any(|v| *v == needle)
            }
        }
    }

    /// The numeric members of this limit, ascending.
    ///
    /// For a range this is empty (the range is dense, not enumerated);
    /// used by relative fan/vane stepping over enumerated positions.
    pub fn numeric_members(&self) -> Vec<i32> {
        match self {
            Limits::Range { .. } => Vec::new(),
            Limits::ValueSet(values) => {
                let mut nums: Vec<i32> =
                    values.iter().filter_map(|v| v.parse().ok()).collect();
                nums.sort_unstable();
                nums
            }
        }
    }
}

/// The set of limits known for one unit, keyed by capability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitSet {
    entries: HashMap<Capability, Limits>,
}

impl LimitSet {
    /// Create an empty (fully unconstrained) limit set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the advertised limits for a capability, replacing any
    /// previous advertisement.
    pub fn insert(&mut self, capability: Capability, limits: Limits) {
        self.entries.insert(capability, limits);
    }

    /// The limits for a capability, if any have been advertised.
    pub fn get(&self, capability: Capability) -> Option<&Limits> {
        self.entries.get(&capability)
    }

    /// Validate an outgoing wire value against the limits for a
    /// capability. Absence of limits data means "allow anything".
    pub fn check(&self, capability: Capability, value: &str) -> Result<()> {
        match self.entries.get(&capability) {
            None => Ok(()),
            Some(limits) if limits.allows(value) => Ok(()),
            Some(limits) => Err(Error::InvalidParameter(format!(
                "{value} not allowed for {capability} (limits: {limits:?})"
            ))),
        }
    }

    /// Number of capabilities with advertised limits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no limits have been advertised at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_numeric_collapses_to_range() {
        let limits = Limits::from_values(&values(&["160", "320"]));
        assert_eq!(limits, Limits::Range { min: 160, max: 320 });
        assert!(limits.allows("215"));
        assert!(limits.allows("160"));
        assert!(limits.allows("320"));
        assert!(!limits.allows("321"));
        assert!(!limits.allows("AUTO"));
    }

    #[test]
    fn mixed_set_stays_enumerated() {
        let limits = Limits::from_values(&values(&["AUTO", "1", "2", "3", "4"]));
        assert!(matches!(limits, Limits::ValueSet(_)));
        assert!(limits.allows("auto"));
        assert!(limits.allows("3"));
        assert!(!limits.allows("5"));
        assert_eq!(limits.numeric_members(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mode_set_case_normalized() {
        let limits = Limits::from_values(&values(&["AUTO", "HEAT", "COOL"]));
        assert!(limits.allows("cool"));
        assert!(limits.allows("Heat"));
        assert!(!limits.allows("DRY"));
    }

    #[test]
    fn absent_capability_is_unconstrained() {
        let set = LimitSet::new();
        assert!(set.check(Capability::SetpointTemp, "999").is_ok());
    }

    #[test]
    fn check_rejects_out_of_range() {
        let mut set = LimitSet::new();
        set.insert(
            Capability::SetpointTemp,
            Limits::from_values(&values(&["160", "320"])),
        );
        assert!(set.check(Capability::SetpointTemp, "215").is_ok());
        let err = set.check(Capability::SetpointTemp, "500").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn range_from_unordered_members() {
        // Some firmware lists range extremes high-to-low.
        let limits = Limits::from_values(&values(&["320", "160"]));
        assert_eq!(limits, Limits::Range { min: 160, max: 320 });
    }
}
