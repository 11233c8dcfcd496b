use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::invitations::{InvitationError, JoinOrganizationInvitation};

/// Producer of pending join-organization invitations.
#[async_trait]
pub trait InvitationSource: Send + Sync {
    async fn pending_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<JoinOrganizationInvitation>, InvitationError>;
}

/// Approvals and contract requests have no producer yet and stay empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub approvals: Vec<JoinOrganizationInvitation>,
    pub contract_requests: Vec<serde_json::Value>,
    pub invitations: Vec<JoinOrganizationInvitation>,
}

#[derive(Clone)]
pub struct NotificationAggregator {
    invitations: Arc<dyn InvitationSource>,
}

impl NotificationAggregator {
    pub fn new(invitations: Arc<dyn InvitationSource>) -> Self {
        Self { invitations }
    }

    pub async fn for_user(&self, username: &str) -> Result<NotificationList, InvitationError> {
        let invitations = self.invitations.pending_for_user(username).await?;
        Ok(NotificationList {
            approvals: Vec::new(),
            contract_requests: Vec::new(),
            invitations,
        })
    }
}
