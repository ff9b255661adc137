// Role resolver: maps a caller's guild roles to the team they manage.

use serde::Deserialize;

use crate::protocol::RoleId;

/// Static association between a guild role and a team name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamBinding {
    pub role_id: RoleId,
    pub name: String,
}

/// The ordered role → team table. Declaration order decides which team wins
/// when a caller holds more than one team role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRoles {
    bindings: Vec<TeamBinding>,
}

impl TeamRoles {
    pub fn new(bindings: Vec<TeamBinding>) -> Self {
        TeamRoles { bindings }
    }

    /// Return the first bound team whose role appears in `caller_roles`, or
    /// `None` if the caller is a free agent.
    pub fn resolve_team(&self, caller_roles: &[RoleId]) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| caller_roles.contains(&binding.role_id))
            .map(|binding| binding.name.as_str())
    }

    pub fn bindings(&self) -> &[TeamBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
