//! # Zone Provisioning
//!
//! Turns a resolved identifier into a zone row id, creating the zone on first
//! sight when auto-creation is on. Creation is race tolerant: if another
//! connection inserted the same identifier first, the repository reports
//! `Duplicate` and the existing row is re-read.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::identity::{DEFAULT_IDENTIFIER, DYNAMIC_PREFIX, IdentitySource, ResolvedIdentity};
use crate::configs::PolicyConfig;
use crate::store::{NewZone, RepoError, ZoneRepository};

/// A zone id together with the identifier it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRef {
    pub id: i64,
    pub identifier: String,
}

pub struct ZoneProvisioner {
    zones: Arc<dyn ZoneRepository>,
    auto_create: bool,
    system_user_id: Option<i64>,
}

impl ZoneProvisioner {
    pub fn new(zones: Arc<dyn ZoneRepository>, policy: &PolicyConfig) -> Self {
        Self {
            zones,
            auto_create: policy.auto_create_zones,
            system_user_id: policy.system_user_id,
        }
    }

    /// Finds or creates the zone for `identity`. `Ok(None)` means the zone
    /// does not exist and auto-creation is off.
    pub async fn resolve(
        &self,
        identity: &ResolvedIdentity,
        remote: Option<IpAddr>,
    ) -> Result<Option<ZoneRef>, RepoError> {
        if let Some(zone) = self.zones.find_by_identifier(&identity.identifier).await? {
            return Ok(Some(ZoneRef {
                id: zone.id,
                identifier: zone.identifier,
            }));
        }
        if !self.auto_create {
            debug!(identifier = %identity.identifier, "Zone unknown and auto-creation disabled");
            return Ok(None);
        }

        let new_zone = describe_zone(identity, remote, self.system_user_id);
        self.create_or_reload(new_zone).await.map(Some)
    }

    /// Makes sure the `default` zone exists. Used at startup.
    pub async fn ensure_default_zone(&self) -> Result<ZoneRef, RepoError> {
        if let Some(zone) = self.zones.find_by_identifier(DEFAULT_IDENTIFIER).await? {
            return Ok(ZoneRef {
                id: zone.id,
                identifier: zone.identifier,
            });
        }
        let identity = ResolvedIdentity {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            source: IdentitySource::Default,
        };
        self.create_or_reload(describe_zone(&identity, None, self.system_user_id))
            .await
    }

    async fn create_or_reload(&self, new_zone: NewZone) -> Result<ZoneRef, RepoError> {
        let identifier = new_zone.identifier.clone();
        match self.zones.create(new_zone).await {
            Ok(id) => {
                info!(zone_id = id, identifier = %identifier, "Auto-created router zone");
                Ok(ZoneRef { id, identifier })
            }
            Err(RepoError::Duplicate { .. }) => {
                warn!(identifier = %identifier, "Zone created concurrently, reloading");
                match self.zones.find_by_identifier(&identifier).await? {
                    Some(zone) => Ok(ZoneRef {
                        id: zone.id,
                        identifier: zone.identifier,
                    }),
                    None => Err(RepoError::Storage(format!(
                        "zone {} reported duplicate but cannot be found",
                        identifier
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Display attributes for an auto-created zone, derived from the identifier
/// shape.
pub fn describe_zone(
    identity: &ResolvedIdentity,
    remote: Option<IpAddr>,
    created_by: Option<i64>,
) -> NewZone {
    let identifier = identity.identifier.as_str();
    let (zone_name, router_name, description) = if identifier == DEFAULT_IDENTIFIER {
        (
            "Default Zone".to_string(),
            "Default Router".to_string(),
            "System default zone for routers without a mapping".to_string(),
        )
    } else if let Some(hash) = identifier.strip_prefix(DYNAMIC_PREFIX) {
        let short: String = hash.chars().take(8).collect();
        let router = match remote {
            Some(ip) => format!("Router {}", ip.to_canonical()),
            None => format!("Router {}", short),
        };
        (
            format!("Dynamic Zone {}", short),
            router,
            format!("Auto-created from {}", identity.source),
        )
    } else {
        (
            format!("Zone {}", identifier),
            identifier.to_string(),
            format!("Auto-created from {}", identity.source),
        )
    };

    NewZone {
        identifier: identifier.to_string(),
        zone_name,
        router_name: Some(router_name),
        description: Some(description),
        is_active: true,
        created_by,
    }
}
