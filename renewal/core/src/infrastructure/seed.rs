// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet seed loader
//!
//! Populates the in-memory stores from a YAML document:
//!
//! ```yaml
//! organizations:
//!   - id: 6a1f...            # UUID
//!     name: Acme
//!     kind: { type: PARENT, billing: { mode: DIRECT } }
//! devices:
//!   - id: 0b7c...
//!     org_id: 6a1f...
//!     name: Lobby screen
//!     serial_number: SN-0001
//!     location: { label: "Leeds", coordinates: { latitude: 53.8, longitude: -1.55 } }
//!     expiry_date: 2025-01-31
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::domain::device::Device;
use crate::domain::organization::{OrgId, OrgKind, OrgType, Organization};
use crate::domain::repository::{DeviceRegistry, OrganizationRepository};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSeed {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl FleetSeed {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet seed {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid fleet seed {:?}", path))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let seed: FleetSeed = serde_yaml::from_str(yaml)?;
        seed.validate()?;
        Ok(seed)
    }

    /// Check references between organizations and devices
    pub fn validate(&self) -> Result<()> {
        let types: HashMap<OrgId, OrgType> = self
            .organizations
            .iter()
            .map(|org| (org.id, org.org_type()))
            .collect();
        if types.len() != self.organizations.len() {
            bail!("duplicate organization ids in seed");
        }

        for org in &self.organizations {
            match org.kind {
                OrgKind::Child { parent } => {
                    if types.get(&parent) != Some(&OrgType::Parent) {
                        bail!("child '{}' references {} which is not a parent", org.name, parent);
                    }
                }
                OrgKind::Parent { .. } => {
                    if let Some(reseller) = org.managing_reseller() {
                        if types.get(&reseller) != Some(&OrgType::Reseller) {
                            bail!(
                                "parent '{}' bills through {} which is not a reseller",
                                org.name,
                                reseller
                            );
                        }
                    }
                }
                OrgKind::Reseller => {}
            }
        }

        for device in &self.devices {
            let Some(owner) = types.get(&device.org_id) else {
                bail!(
                    "device {} references unknown organization {}",
                    device.serial_number,
                    device.org_id
                );
            };
            device
                .validate_registration(*owner)
                .with_context(|| format!("device {}", device.serial_number))?;
        }
        Ok(())
    }

    pub async fn load_into(
        &self,
        organizations: &dyn OrganizationRepository,
        registry: &dyn DeviceRegistry,
    ) -> Result<()> {
        for org in &self.organizations {
            organizations
                .save(org)
                .await
                .with_context(|| format!("Failed to store organization '{}'", org.name))?;
        }
        for device in &self.devices {
            registry
                .insert(device)
                .await
                .with_context(|| format!("Failed to register device {}", device.serial_number))?;
        }
        info!(
            organizations = self.organizations.len(),
            devices = self.devices.len(),
            "Fleet seed loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::{InMemoryDeviceRegistry, InMemoryOrganizationRepository};

    const SEED: &str = r#"
organizations:
  - id: 00000000-0000-0000-0000-0000000000a1
    name: Global Signs Partners Ltd
    kind: { type: RESELLER }
  - id: 00000000-0000-0000-0000-0000000000b1
    name: Borealis
    kind:
      type: PARENT
      billing: { mode: RESELLER_ONLY, reseller: 00000000-0000-0000-0000-0000000000a1 }
  - id: 00000000-0000-0000-0000-0000000000c1
    name: Borealis East
    kind: { type: CHILD, parent: 00000000-0000-0000-0000-0000000000b1 }
devices:
  - id: 00000000-0000-0000-0000-000000000d01
    org_id: 00000000-0000-0000-0000-0000000000c1
    name: Lobby
    serial_number: SN-0001
    location: { label: Leeds }
    expiry_date: 2025-01-31
"#;

    #[tokio::test]
    async fn test_seed_loads_into_stores() {
        let seed = FleetSeed::from_yaml_str(SEED).unwrap();
        let orgs = InMemoryOrganizationRepository::new();
        let registry = InMemoryDeviceRegistry::new();
        seed.load_into(&orgs, &registry).await.unwrap();

        let parent = OrgId::from_string("00000000-0000-0000-0000-0000000000b1").unwrap();
        let children = orgs.list_children(parent).await.unwrap();
        assert_eq!(children.len(), 1);

        let devices = registry.list_by_orgs(&[children[0].id]).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, "SN-0001");
    }

    #[test]
    fn test_seed_rejects_dangling_parent() {
        let yaml = r#"
organizations:
  - id: 00000000-0000-0000-0000-0000000000c1
    name: Orphan
    kind: { type: CHILD, parent: 00000000-0000-0000-0000-0000000000ff }
"#;
        assert!(FleetSeed::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_seed_rejects_reseller_owned_device() {
        let yaml = r#"
organizations:
  - id: 00000000-0000-0000-0000-0000000000a1
    name: Global Signs Partners Ltd
    kind: { type: RESELLER }
devices:
  - id: 00000000-0000-0000-0000-000000000d01
    org_id: 00000000-0000-0000-0000-0000000000a1
    name: Demo
    serial_number: SN-0001
    expiry_date: 2025-01-31
"#;
        let err = FleetSeed::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("cannot be owned by a reseller"));
    }
}
