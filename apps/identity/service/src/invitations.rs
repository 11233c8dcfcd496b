use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::json_file;
use crate::notifications::InvitationSource;

pub const ROLE_OWNER: &str = "owner";
pub const ROLE_MEMBER: &str = "member";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Invitation for `user` to join `organization` with `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOrganizationInvitation {
    pub organization: String,
    pub role: String,
    pub user: String,
    pub status: InvitationStatus,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserOrganizations {
    pub owner: Vec<String>,
    pub member: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("unknown role '{role}'")]
    InvalidRole { role: String },
    #[error("no pending invitation for {user} in {organization} as {role}")]
    NotFound {
        user: String,
        organization: String,
        role: String,
    },
    #[error("invitation for {user} in {organization} as {role} already pending")]
    AlreadyPending {
        user: String,
        organization: String,
        role: String,
    },
    #[error("{message}")]
    Persistence { message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct InvitationState {
    invitations: Vec<JoinOrganizationInvitation>,
}

#[derive(Clone)]
pub struct InvitationStore {
    state: Arc<RwLock<InvitationState>>,
    persist_lock: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

impl InvitationStore {
    pub fn from_config(config: &Config) -> Self {
        let path = config.invitation_store_path.clone();
        let state = json_file::load_or_default(path.as_deref(), "invitation_store");
        Self {
            state: Arc::new(RwLock::new(state)),
            persist_lock: Arc::new(Mutex::new(())),
            path,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(InvitationState::default())),
            persist_lock: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    pub async fn invite(
        &self,
        organization: &str,
        role: &str,
        user: &str,
    ) -> Result<JoinOrganizationInvitation, InvitationError> {
        validate_role(role)?;
        let invitation = JoinOrganizationInvitation {
            organization: organization.to_string(),
            role: role.to_string(),
            user: user.to_string(),
            status: InvitationStatus::Pending,
            created: Utc::now(),
        };

        self.update(|state| {
            if state
                .invitations
                .iter()
                .any(|existing| is_pending_match(existing, user, organization, role))
            {
                return Err(InvitationError::AlreadyPending {
                    user: user.to_string(),
                    organization: organization.to_string(),
                    role: role.to_string(),
                });
            }
            state.invitations.push(invitation.clone());
            Ok(invitation)
        })
        .await
    }

    pub async fn accept(
        &self,
        user: &str,
        organization: &str,
        role: &str,
    ) -> Result<JoinOrganizationInvitation, InvitationError> {
        self.resolve(user, organization, role, InvitationStatus::Accepted)
            .await
    }

    pub async fn reject(
        &self,
        user: &str,
        organization: &str,
        role: &str,
    ) -> Result<JoinOrganizationInvitation, InvitationError> {
        self.resolve(user, organization, role, InvitationStatus::Rejected)
            .await
    }

    pub async fn organizations_for_user(&self, user: &str) -> UserOrganizations {
        let state = self.state.read().await;
        let mut organizations = UserOrganizations::default();
        for invitation in state
            .invitations
            .iter()
            .filter(|invitation| invitation.user == user)
            .filter(|invitation| invitation.status == InvitationStatus::Accepted)
        {
            let bucket = if invitation.role == ROLE_OWNER {
                &mut organizations.owner
            } else {
                &mut organizations.member
            };
            if !bucket.contains(&invitation.organization) {
                bucket.push(invitation.organization.clone());
            }
        }
        organizations
    }

    async fn resolve(
        &self,
        user: &str,
        organization: &str,
        role: &str,
        status: InvitationStatus,
    ) -> Result<JoinOrganizationInvitation, InvitationError> {
        validate_role(role)?;
        let invitation = self
            .update(|state| {
                let invitation = state
                    .invitations
                    .iter_mut()
                    .find(|existing| is_pending_match(existing, user, organization, role))
                    .ok_or_else(|| InvitationError::NotFound {
                        user: user.to_string(),
                        organization: organization.to_string(),
                        role: role.to_string(),
                    })?;
                invitation.status = status;
                Ok(invitation.clone())
            })
            .await?;

        tracing::info!(
            target: "identity.invitations",
            user,
            organization,
            role,
            status = ?status,
            "invitation resolved",
        );
        Ok(invitation)
    }

    /// Applies `operation` and persists; the in-memory state is restored when
    /// either step fails.
    async fn update<T, F>(&self, operation: F) -> Result<T, InvitationError>
    where
        F: FnOnce(&mut InvitationState) -> Result<T, InvitationError>,
    {
        let _persist_guard = self.persist_lock.lock().await;
        let (result, previous, snapshot) = {
            let mut state = self.state.write().await;
            let previous = state.clone();
            let result = operation(&mut *state)?;
            (result, previous, state.clone())
        };

        if let Some(path) = self.path.as_ref() {
            if let Err(message) = json_file::write_atomically(path, &snapshot).await {
                *self.state.write().await = previous;
                return Err(InvitationError::Persistence { message });
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl InvitationSource for InvitationStore {
    async fn pending_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<JoinOrganizationInvitation>, InvitationError> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .iter()
            .filter(|invitation| {
                invitation.user == user && invitation.status == InvitationStatus::Pending
            })
            .cloned()
            .collect())
    }
}

fn validate_role(role: &str) -> Result<(), InvitationError> {
    if role == ROLE_OWNER || role == ROLE_MEMBER {
        Ok(())
    } else {
        Err(InvitationError::InvalidRole {
            role: role.to_string(),
        })
    }
}

fn is_pending_match(
    invitation: &JoinOrganizationInvitation,
    user: &str,
    organization: &str,
    role: &str,
) -> bool {
    invitation.status == InvitationStatus::Pending
        && invitation.user == user
        && invitation.organization == organization
        && invitation.role == role
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepted_invitations_become_organizations_by_role() {
        let store = InvitationStore::in_memory();
        store.invite("acme", ROLE_OWNER, "alice").await.expect("invite");
        store.invite("globex", ROLE_MEMBER, "alice").await.expect("invite");
        store.invite("initech", ROLE_MEMBER, "alice").await.expect("invite");

        store.accept("alice", "acme", ROLE_OWNER).await.expect("accept");
        store.accept("alice", "globex", ROLE_MEMBER).await.expect("accept");
        store.reject("alice", "initech", ROLE_MEMBER).await.expect("reject");

        let organizations = store.organizations_for_user("alice").await;
        assert_eq!(organizations.owner, vec!["acme".to_string()]);
        assert_eq!(organizations.member, vec!["globex".to_string()]);
        assert!(store.pending_for_user("alice").await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn resolving_without_pending_invitation_is_not_found() {
        let store = InvitationStore::in_memory();
        store.invite("acme", ROLE_MEMBER, "alice").await.expect("invite");
        store.accept("alice", "acme", ROLE_MEMBER).await.expect("accept");

        let error = store
            .reject("alice", "acme", ROLE_MEMBER)
            .await
            .expect_err("already accepted");
        assert!(matches!(error, InvitationError::NotFound { .. }));

        let error = store
            .accept("alice", "acme", "admin")
            .await
            .expect_err("unknown role");
        assert!(matches!(error, InvitationError::InvalidRole { .. }));
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_is_refused() {
        let store = InvitationStore::in_memory();
        store.invite("acme", ROLE_MEMBER, "alice").await.expect("invite");
        let error = store
            .invite("acme", ROLE_MEMBER, "alice")
            .await
            .expect_err("duplicate");
        assert!(matches!(error, InvitationError::AlreadyPending { .. }));
        assert_eq!(store.pending_for_user("alice").await.expect("pending").len(), 1);
    }

    #[tokio::test]
    async fn invitations_survive_reload() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = Config::for_tests();
        config.invitation_store_path = Some(temp.path().join("invitations.json"));

        let store = InvitationStore::from_config(&config);
        store.invite("acme", ROLE_MEMBER, "alice").await.expect("invite");

        let restored = InvitationStore::from_config(&config);
        let pending = restored.pending_for_user("alice").await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].organization, "acme");
    }
}
