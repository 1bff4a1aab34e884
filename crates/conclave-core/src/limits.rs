//! Round and budget limits for a collaborative turn

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Upper bound on rounds or delegations
///
/// Zero and "off" mean no rounds at all; only the explicit "unlimited"
/// removes the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundLimit {
    /// No bound
    Unlimited,
    /// No rounds permitted
    Disabled,
    /// At most `n` rounds (`n > 0`)
    Limited(usize),
}

impl RoundLimit {
    /// Build from a count; 0 is [`RoundLimit::Disabled`]
    pub fn from_count(n: usize) -> Self {
        if n == 0 {
            RoundLimit::Disabled
        } else {
            RoundLimit::Limited(n)
        }
    }

    /// Whether another round is allowed after `used` rounds
    pub fn allows(&self, used: usize) -> bool {
        match self {
            RoundLimit::Unlimited => true,
            RoundLimit::Disabled => false,
            RoundLimit::Limited(n) => used < *n,
        }
    }

    /// What is left after `used` rounds
    pub fn remaining(&self, used: usize) -> RoundLimit {
        match self {
            RoundLimit::Unlimited => RoundLimit::Unlimited,
            RoundLimit::Disabled => RoundLimit::Disabled,
            RoundLimit::Limited(n) => RoundLimit::from_count(n.saturating_sub(used)),
        }
    }

    /// Whether no rounds are permitted
    pub fn is_disabled(&self) -> bool {
        matches!(self, RoundLimit::Disabled)
    }
}

impl fmt::Display for RoundLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundLimit::Unlimited => write!(f, "unlimited"),
            RoundLimit::Disabled => write!(f, "off"),
            RoundLimit::Limited(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for RoundLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unlimited" | "infinite" => Ok(RoundLimit::Unlimited),
            "off" | "disabled" | "none" => Ok(RoundLimit::Disabled),
            other => other
                .parse::<usize>()
                .map(RoundLimit::from_count)
                .map_err(|_| format!("invalid round limit '{}'", s)),
        }
    }
}

impl Serialize for RoundLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RoundLimit::Limited(n) => serializer.serialize_u64(*n as u64),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RoundLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) if n < 0 => Err(serde::de::Error::custom(format!(
                "round limit must not be negative, got {}",
                n
            ))),
            Raw::Count(n) => Ok(RoundLimit::from_count(n as usize)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Budgets for one collaborative turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnLimits {
    /// Tool rounds per turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: RoundLimit,
    /// Delegation rounds per turn
    #[serde(default = "default_max_supervisor_rounds")]
    pub max_supervisor_rounds: RoundLimit,
    /// Delegations per turn, shared across its rounds
    #[serde(default = "default_max_delegations")]
    pub max_delegations: RoundLimit,
    /// Re-asks after a reply that is only a verdict payload
    #[serde(default = "default_max_verdict_retries")]
    pub max_verdict_retries: usize,
}

fn default_max_tool_rounds() -> RoundLimit {
    RoundLimit::Limited(8)
}

fn default_max_supervisor_rounds() -> RoundLimit {
    RoundLimit::Limited(3)
}

fn default_max_delegations() -> RoundLimit {
    RoundLimit::Limited(8)
}

fn default_max_verdict_retries() -> usize {
    2
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_supervisor_rounds: default_max_supervisor_rounds(),
            max_delegations: default_max_delegations(),
            max_verdict_retries: default_max_verdict_retries(),
        }
    }
}
