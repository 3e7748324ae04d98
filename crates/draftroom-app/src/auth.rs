// Static, config-driven identity resolution and admin authorization.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use draftroom_core::admin::{Authorizer, Caller};

use crate::config::Config;

/// Resolves authenticated identities to callers and decides draft admin
/// rights from the `[admin]` and `[[identities]]` config sections.
#[derive(Debug, Clone, Default)]
pub struct ConfigAuthorizer {
    admins: HashSet<String>,
    teams: HashMap<String, String>,
}

impl ConfigAuthorizer {
    pub fn from_config(config: &Config) -> Self {
        ConfigAuthorizer {
            admins: config.admin.identities.iter().cloned().collect(),
            teams: config
                .identities
                .iter()
                .map(|m| (m.identity.clone(), m.team_id.clone()))
                .collect(),
        }
    }

    /// The caller for an identity. Identities with no team mapping may still
    /// read and, if listed as admins, administer drafts.
    pub fn resolve(&self, identity: &str) -> Caller {
        Caller {
            identity: identity.to_string(),
            team_id: self.teams.get(identity).cloned(),
        }
    }
}

#[async_trait]
impl Authorizer for ConfigAuthorizer {
    async fn is_draft_admin(&self, caller: &Caller, _draft_id: &str) -> anyhow::Result<bool> {
        Ok(self.admins.contains(&caller.identity))
    }
}
