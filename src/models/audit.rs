use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Auditable action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    PasswordChange,
    EmailChange,
    ProfileUpdate,
    PermissionChange,
    SettingsChange,
    DataExport,
    ApiAccess,
}

impl AuditAction {
    pub const ALL: [AuditAction; 13] = [
        AuditAction::Create,
        AuditAction::Read,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::PasswordChange,
        AuditAction::EmailChange,
        AuditAction::ProfileUpdate,
        AuditAction::PermissionChange,
        AuditAction::SettingsChange,
        AuditAction::DataExport,
        AuditAction::ApiAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Read => "READ",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::PasswordChange => "PASSWORD_CHANGE",
            AuditAction::EmailChange => "EMAIL_CHANGE",
            AuditAction::ProfileUpdate => "PROFILE_UPDATE",
            AuditAction::PermissionChange => "PERMISSION_CHANGE",
            AuditAction::SettingsChange => "SETTINGS_CHANGE",
            AuditAction::DataExport => "DATA_EXPORT",
            AuditAction::ApiAccess => "API_ACCESS",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown audit action: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditCategory {
    User,
    Admin,
    System,
    Security,
    Data,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::User => "USER",
            AuditCategory::Admin => "ADMIN",
            AuditCategory::System => "SYSTEM",
            AuditCategory::Security => "SECURITY",
            AuditCategory::Data => "DATA",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(AuditCategory::User),
            "ADMIN" => Ok(AuditCategory::Admin),
            "SYSTEM" => Ok(AuditCategory::System),
            "SECURITY" => Ok(AuditCategory::Security),
            "DATA" => Ok(AuditCategory::Data),
            other => Err(format!("unknown audit category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditDetails {
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

/// Write-once audit record, one per auditable state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub action: AuditAction,
    pub category: AuditCategory,
    pub account_id: Option<String>,
    pub target_id: Option<String>,
    pub target_kind: Option<String>,
    pub details: AuditDetails,
    pub metadata: AuditMetadata,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a business action, handed to the audit hook after the action completes
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub category: AuditCategory,
    pub account_id: Option<String>,
    pub target_id: Option<String>,
    pub target_kind: Option<String>,
    pub details: AuditDetails,
    pub metadata: AuditMetadata,
}

impl AuditEntry {
    pub fn new(action: AuditAction, category: AuditCategory) -> Self {
        AuditEntry {
            action,
            category,
            account_id: None,
            target_id: None,
            target_kind: None,
            details: AuditDetails::default(),
            metadata: AuditMetadata::default(),
        }
    }

    pub fn account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn target(mut self, kind: &str, id: &str) -> Self {
        self.target_kind = Some(kind.to_string());
        self.target_id = Some(id.to_string());
        self
    }

    pub fn change(
        mut self,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
        reason: &str,
    ) -> Self {
        self.details = AuditDetails {
            before,
            after,
            reason: Some(reason.to_string()),
        };
        self
    }

    pub fn metadata(mut self, metadata: AuditMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
