use crudgrid_crud::{Authorizer, Capability, Halt};
use http::StatusCode;

use crate::config::Grant;

/// Role-based capability table. Record-level checks use the same grants as
/// collection-level ones.
#[derive(Debug, Clone, Default)]
pub struct GrantTable {
    grants: Vec<Grant>,
}

impl GrantTable {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self { grants }
    }

    fn allows(&self, capability: &Capability<'_>, role: &str) -> bool {
        self.grants.iter().any(|grant| {
            grant.role == role
                && (grant.collection == "*" || grant.collection == capability.collection)
                && grant.actions.contains(&capability.action)
        })
    }
}

impl Authorizer for GrantTable {
    fn check(&self, capability: &Capability<'_>) -> Result<(), Halt> {
        let Some(actor) = capability.actor else {
            return Err(Halt::json(StatusCode::UNAUTHORIZED, "authentication required"));
        };
        if actor.roles.iter().any(|role| self.allows(capability, role)) {
            return Ok(());
        }
        Err(Halt::json(
            StatusCode::FORBIDDEN,
            &format!(
                "{} may not {} {}",
                actor.id,
                capability.action.as_str(),
                capability.collection
            ),
        ))
    }
}
