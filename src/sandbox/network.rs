//! Network policy definitions for sandbox containers.

use serde::{Deserialize, Serialize};

/// Network access policy for sandbox containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    /// Default bridge network
    AllowAll,
    /// No network access
    #[default]
    Deny,
}

impl NetworkPolicy {
    /// Extra arguments for the container create command.
    pub fn run_args(self) -> &'static [&'static str] {
        match self {
            Self::AllowAll => &[],
            Self::Deny => &["--network", "none"],
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowAll => write!(f, "allow-all"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_policy_display() {
        assert_eq!(format!("{}", NetworkPolicy::AllowAll), "allow-all");
        assert_eq!(format!("{}", NetworkPolicy::Deny), "deny");
    }

    #[test]
    fn test_network_policy_run_args() {
        assert!(NetworkPolicy::AllowAll.run_args().is_empty());
        assert_eq!(NetworkPolicy::Deny.run_args(), &["--network", "none"]);
    }
}
