// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Organization hierarchy
//!
//! Static classification of the accounts that own or service devices.
//!
//! | Kind       | Billing                    | Parent link |
//! |------------|----------------------------|-------------|
//! | `Parent`   | `Direct` or `ResellerOnly` | none        |
//! | `Child`    | inherited from its parent  | required    |
//! | `Reseller` | none                       | none        |
//!
//! A `ResellerOnly` parent always names the reseller that services it, so
//! "which reseller handles this quote" is a property of the type rather than
//! an optional field checked at each call site.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flat organization type, used in views and wire payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgType {
    Parent,
    Child,
    Reseller,
}

impl std::fmt::Display for OrgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrgType::Parent => "PARENT",
            OrgType::Child => "CHILD",
            OrgType::Reseller => "RESELLER",
        };
        write!(f, "{}", s)
    }
}

/// Flat billing mode, meaningful for PARENT organizations only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingMode {
    Direct,
    ResellerOnly,
}

/// How a PARENT pays for renewals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Billing {
    /// Pays and renews immediately
    Direct,
    /// Must transact through the named reseller
    ResellerOnly { reseller: OrgId },
}

impl Billing {
    pub fn mode(&self) -> BillingMode {
        match self {
            Billing::Direct => BillingMode::Direct,
            Billing::ResellerOnly { .. } => BillingMode::ResellerOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgKind {
    Parent { billing: Billing },
    Child { parent: OrgId },
    Reseller,
}

// ============================================================================
// Aggregate Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub kind: OrgKind,
}

impl Organization {
    pub fn parent(name: impl Into<String>, billing: Billing) -> Self {
        Self {
            id: OrgId::new(),
            name: name.into(),
            kind: OrgKind::Parent { billing },
        }
    }

    pub fn child(name: impl Into<String>, parent: OrgId) -> Self {
        Self {
            id: OrgId::new(),
            name: name.into(),
            kind: OrgKind::Child { parent },
        }
    }

    pub fn reseller(name: impl Into<String>) -> Self {
        Self {
            id: OrgId::new(),
            name: name.into(),
            kind: OrgKind::Reseller,
        }
    }

    pub fn org_type(&self) -> OrgType {
        match self.kind {
            OrgKind::Parent { .. } => OrgType::Parent,
            OrgKind::Child { .. } => OrgType::Child,
            OrgKind::Reseller => OrgType::Reseller,
        }
    }

    pub fn billing_mode(&self) -> Option<BillingMode> {
        match &self.kind {
            OrgKind::Parent { billing } => Some(billing.mode()),
            _ => None,
        }
    }

    pub fn parent_ref(&self) -> Option<OrgId> {
        match self.kind {
            OrgKind::Child { parent } => Some(parent),
            _ => None,
        }
    }

    /// Reseller servicing this organization's quotes, if it bills through one
    pub fn managing_reseller(&self) -> Option<OrgId> {
        match self.kind {
            OrgKind::Parent {
                billing: Billing::ResellerOnly { reseller },
            } => Some(reseller),
            _ => None,
        }
    }

    pub fn is_direct_parent(&self) -> bool {
        matches!(
            self.kind,
            OrgKind::Parent {
                billing: Billing::Direct
            }
        )
    }

    pub fn is_reseller_only_parent(&self) -> bool {
        self.managing_reseller().is_some()
    }

    /// Whether `self` may see records owned by `owner`.
    ///
    /// `owner_parent` is the owner's parent link, if the owner is a CHILD, and
    /// `owner_reseller` is the reseller servicing the owner's billing root.
    pub fn manages(
        &self,
        owner: OrgId,
        owner_parent: Option<OrgId>,
        owner_reseller: Option<OrgId>,
    ) -> bool {
        if self.id == owner {
            return true;
        }
        match self.kind {
            OrgKind::Parent { .. } => owner_parent == Some(self.id),
            OrgKind::Child { .. } => false,
            OrgKind::Reseller => owner_reseller == Some(self.id),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_queries() {
        let reseller = Organization::reseller("Global Signs Partners Ltd");
        let direct = Organization::parent("Acme", Billing::Direct);
        let routed = Organization::parent(
            "Borealis",
            Billing::ResellerOnly {
                reseller: reseller.id,
            },
        );
        let child = Organization::child("Acme North", direct.id);

        assert_eq!(direct.org_type(), OrgType::Parent);
        assert_eq!(direct.billing_mode(), Some(BillingMode::Direct));
        assert!(direct.is_direct_parent());

        assert_eq!(routed.billing_mode(), Some(BillingMode::ResellerOnly));
        assert_eq!(routed.managing_reseller(), Some(reseller.id));

        assert_eq!(child.billing_mode(), None);
        assert_eq!(child.parent_ref(), Some(direct.id));
        assert_eq!(reseller.billing_mode(), None);
    }

    #[test]
    fn test_management_relation() {
        let reseller = Organization::reseller("R");
        let parent = Organization::parent(
            "P",
            Billing::ResellerOnly {
                reseller: reseller.id,
            },
        );
        let child = Organization::child("C", parent.id);
        let stranger = Organization::parent("S", Billing::Direct);

        assert!(parent.manages(parent.id, None, Some(reseller.id)));
        assert!(parent.manages(child.id, Some(parent.id), Some(reseller.id)));
        assert!(reseller.manages(child.id, Some(parent.id), Some(reseller.id)));
        assert!(!child.manages(parent.id, None, Some(reseller.id)));
        assert!(!stranger.manages(child.id, Some(parent.id), Some(reseller.id)));
    }

    #[test]
    fn test_kind_serializes_as_tagged_variant() {
        let reseller = OrgId::new();
        let kind = OrgKind::Parent {
            billing: Billing::ResellerOnly { reseller },
        };
        let json = serde_json::to_value(kind).unwrap();
        assert_eq!(json["type"], "PARENT");
        assert_eq!(json["billing"]["mode"], "RESELLER_ONLY");

        let back: OrgKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }
}
