//! Single ingress rules on unversioned resources.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use utoipa::ToSchema;

use super::entry::CidrEntry;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    StrumDisplay,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// One ingress rule, identified by all of its fields.
///
/// There is no version token; the store itself reports whether an identical
/// rule is already present or already gone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub struct IngressRule {
    pub resource_id: String,
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub source: CidrEntry,
    pub description: String,
}

impl Display for IngressRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.from_port == self.to_port {
            write!(
                f,
                "{} {}/{} from {}",
                self.resource_id, self.protocol, self.from_port, self.source
            )
        } else {
            write!(
                f,
                "{} {}/{}-{} from {}",
                self.resource_id, self.protocol, self.from_port, self.to_port, self.source
            )
        }
    }
}
