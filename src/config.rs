//! Tunables for both mutation paths.
//!
//! Everything has a default matching the documented protocol, so an empty
//! JSON object is a valid configuration:
//!
//! ```rust
//! use cidrgate_core::AccessConfig;
//!
//! let config = AccessConfig::from_json_str(r#"{ "rule": { "from_port": 443, "to_port": 443 } }"#).unwrap();
//! assert_eq!(config.versioned.max_attempts, 10);
//! assert_eq!(config.rule.from_port, 443);
//! ```

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AccessError;
use crate::retry::RetryPolicy;
use crate::types::Protocol;

pub const DEFAULT_RULE_PORT: u16 = 22;
pub const DEFAULT_RULE_DESCRIPTION: &str = "temporary CI access";

/// Shape of the ingress rule created on the unversioned path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RuleTemplate {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    /// Used when the caller does not pass a description of its own.
    pub description: String,
}

impl Default for RuleTemplate {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: DEFAULT_RULE_PORT,
            to_port: DEFAULT_RULE_PORT,
            description: DEFAULT_RULE_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct AccessConfig {
    pub versioned: RetryPolicy,
    pub unversioned: RetryPolicy,
    pub rule: RuleTemplate,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            versioned: RetryPolicy::versioned(),
            unversioned: RetryPolicy::unversioned(),
            rule: RuleTemplate::default(),
        }
    }
}

impl AccessConfig {
    pub fn from_json_str(text: &str) -> Result<Self, AccessError> {
        let config: AccessConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AccessError> {
        self.versioned.validate()?;
        self.unversioned.validate()?;
        if self.rule.from_port > self.rule.to_port {
            return Err(AccessError::InvalidConfig(format!(
                "rule port range {}-{} is inverted",
                self.rule.from_port, self.rule.to_port
            )));
        }
        Ok(())
    }
}
