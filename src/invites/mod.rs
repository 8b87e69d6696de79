/// School invitations
///
/// Admins invite an email address to join their school with a role. The
/// invite is consumed by the `invite` registration branch; see
/// `AccountManager::register`.

mod manager;

pub use manager::InviteManager;

use crate::{account::Role, db::models::Invite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived state of an invite row
///
/// Revoked invites are deleted and therefore never listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Used,
    Expired,
}

impl InviteStatus {
    pub fn of(invite: &Invite, now: DateTime<Utc>) -> Self {
        if invite.used {
            InviteStatus::Used
        } else if now >= invite.expires_at {
            InviteStatus::Expired
        } else {
            InviteStatus::Pending
        }
    }
}

/// Create invite request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInviteRequest {
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Invite as shown to the issuing admin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteView {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub status: InviteStatus,
    pub invited_by: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InviteView {
    pub fn new(invite: &Invite, now: DateTime<Utc>) -> Self {
        Self {
            id: invite.id.clone(),
            email: invite.email.clone(),
            role: invite.role,
            status: InviteStatus::of(invite, now),
            invited_by: invite.invited_by.clone(),
            expires_at: invite.expires_at,
            used_at: invite.used_at,
            created_at: invite.created_at,
        }
    }
}

/// Create invite response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteResponse {
    pub invite: InviteView,
    /// Present when the invitation email was not delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
}

/// What the registration page shows before the invitee submits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteSummary {
    pub email: String,
    pub role: Role,
    pub school_name: String,
    pub expires_at: DateTime<Utc>,
}
