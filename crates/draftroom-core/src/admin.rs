// Admin/reset controller: authorization in front of the engine's admin
// transitions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::draft::state::DraftState;
use crate::engine::AllocationEngine;
use crate::error::{EngineError, EngineResult};

/// An authenticated identity, optionally acting for a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub identity: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Decides who may administer a draft.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_draft_admin(&self, caller: &Caller, draft_id: &str) -> anyhow::Result<bool>;
}

/// Proof that an authorization check passed for one draft. Only this module
/// can mint one.
#[derive(Debug)]
pub struct AdminGrant {
    actor: String,
    draft_id: String,
}

impl AdminGrant {
    pub(crate) fn new(actor: &str, draft_id: &str) -> Self {
        AdminGrant {
            actor: actor.to_string(),
            draft_id: draft_id.to_string(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    pub(crate) fn check(&self, draft_id: &str) -> EngineResult<()> {
        if self.draft_id == draft_id {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(format!(
                "grant for draft `{}` does not cover `{}`",
                self.draft_id, draft_id
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRequest {
    pub draft_id: String,
    /// Explicit acknowledgement that every pick will be deleted.
    #[serde(default)]
    pub confirmed: bool,
}

pub struct AdminController {
    engine: Arc<AllocationEngine>,
    authorizer: Arc<dyn Authorizer>,
}

impl AdminController {
    pub fn new(engine: Arc<AllocationEngine>, authorizer: Arc<dyn Authorizer>) -> Self {
        AdminController { engine, authorizer }
    }

    async fn authorize(&self, caller: &Caller, draft_id: &str) -> EngineResult<AdminGrant> {
        match self.authorizer.is_draft_admin(caller, draft_id).await {
            Ok(true) => Ok(AdminGrant::new(&caller.identity, draft_id)),
            Ok(false) => {
                warn!(
                    "Denied admin action on draft {} for {}",
                    draft_id, caller.identity
                );
                Err(EngineError::Unauthorized(format!(
                    "`{}` is not an administrator of draft `{}`",
                    caller.identity, draft_id
                )))
            }
            Err(e) => {
                warn!("Authorization check for {} failed: {:#}", caller.identity, e);
                Err(EngineError::Unauthorized(format!(
                    "authorization check failed: {e}"
                )))
            }
        }
    }

    pub async fn open_draft(&self, caller: &Caller, draft_id: &str) -> EngineResult<Arc<DraftState>> {
        let grant = self.authorize(caller, draft_id).await?;
        self.engine.open_draft(&grant, draft_id).await
    }

    pub async fn reset(&self, caller: &Caller, request: &ResetRequest) -> EngineResult<Arc<DraftState>> {
        let grant = self.authorize(caller, &request.draft_id).await?;
        if !request.confirmed {
            return Err(EngineError::Unauthorized(
                "reset deletes every pick and must be confirmed".into(),
            ));
        }
        info!(
            "Reset of draft {} confirmed by {}",
            request.draft_id, caller.identity
        );
        self.engine.reset(&grant, &request.draft_id).await
    }
}
