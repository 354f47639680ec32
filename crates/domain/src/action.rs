//! Action enumeration. Every mutation the control plane knows how to plan
//! and dispatch maps to exactly one upstream endpoint/method pair.

use serde::{Deserialize, Serialize};

use crate::error::StandardError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Domains
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The upstream resource family an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDomain {
    Project,
    Database,
    Auth,
    Function,
}

impl ActionDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionDomain::Project => "project",
            ActionDomain::Database => "database",
            ActionDomain::Auth => "auth",
            ActionDomain::Function => "function",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User update fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single field an `auth.users.update.<field>` action mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    Email,
    Name,
    Status,
    Password,
    Phone,
    EmailVerification,
    PhoneVerification,
    Mfa,
    Labels,
    Prefs,
}

impl UserField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserField::Email => "email",
            UserField::Name => "name",
            UserField::Status => "status",
            UserField::Password => "password",
            UserField::Phone => "phone",
            UserField::EmailVerification => "email_verification",
            UserField::PhoneVerification => "phone_verification",
            UserField::Mfa => "mfa",
            UserField::Labels => "labels",
            UserField::Prefs => "prefs",
        }
    }

    pub const ALL: [UserField; 10] = [
        UserField::Email,
        UserField::Name,
        UserField::Status,
        UserField::Password,
        UserField::Phone,
        UserField::EmailVerification,
        UserField::PhoneVerification,
        UserField::Mfa,
        UserField::Labels,
        UserField::Prefs,
    ];
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An enumerated mutation or read the tool surface accepts. Serialized as
/// its dotted wire name (e.g. `database.create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    ProjectCreate,
    ProjectDelete,
    DatabaseList,
    DatabaseCreate,
    DatabaseUpsertCollection,
    DatabaseDeleteCollection,
    UsersList,
    UsersCreate,
    /// Legacy alias: the field to update is inferred from `params`.
    UsersUpdate,
    UsersUpdateField(UserField),
    FunctionList,
    FunctionCreate,
    FunctionUpdate,
    DeploymentTrigger,
    ExecutionTrigger,
    ExecutionStatus,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ProjectCreate => "project.create",
            Action::ProjectDelete => "project.delete",
            Action::DatabaseList => "database.list",
            Action::DatabaseCreate => "database.create",
            Action::DatabaseUpsertCollection => "database.upsert_collection",
            Action::DatabaseDeleteCollection => "database.delete_collection",
            Action::UsersList => "auth.users.list",
            Action::UsersCreate => "auth.users.create",
            Action::UsersUpdate => "auth.users.update",
            Action::UsersUpdateField(field) => match field {
                UserField::Email => "auth.users.update.email",
                UserField::Name => "auth.users.update.name",
                UserField::Status => "auth.users.update.status",
                UserField::Password => "auth.users.update.password",
                UserField::Phone => "auth.users.update.phone",
                UserField::EmailVerification => "auth.users.update.email_verification",
                UserField::PhoneVerification => "auth.users.update.phone_verification",
                UserField::Mfa => "auth.users.update.mfa",
                UserField::Labels => "auth.users.update.labels",
                UserField::Prefs => "auth.users.update.prefs",
            },
            Action::FunctionList => "function.list",
            Action::FunctionCreate => "function.create",
            Action::FunctionUpdate => "function.update",
            Action::DeploymentTrigger => "function.deployment.trigger",
            Action::ExecutionTrigger => "function.execution.trigger",
            Action::ExecutionStatus => "function.execution.status",
        }
    }

    pub fn domain(&self) -> ActionDomain {
        match self {
            Action::ProjectCreate | Action::ProjectDelete => ActionDomain::Project,
            Action::DatabaseList
            | Action::DatabaseCreate
            | Action::DatabaseUpsertCollection
            | Action::DatabaseDeleteCollection => ActionDomain::Database,
            Action::UsersList
            | Action::UsersCreate
            | Action::UsersUpdate
            | Action::UsersUpdateField(_) => ActionDomain::Auth,
            Action::FunctionList
            | Action::FunctionCreate
            | Action::FunctionUpdate
            | Action::DeploymentTrigger
            | Action::ExecutionTrigger
            | Action::ExecutionStatus => ActionDomain::Function,
        }
    }

    /// Actions that destroy upstream state no matter what the client claims.
    pub fn is_inherently_destructive(&self) -> bool {
        matches!(self, Action::ProjectDelete | Action::DatabaseDeleteCollection)
    }

    /// Project-management actions run against the management auth context
    /// and never carry the per-project header.
    pub fn is_project_management(&self) -> bool {
        self.domain() == ActionDomain::Project
    }

    /// Read-only actions issue GET requests upstream.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Action::DatabaseList
                | Action::UsersList
                | Action::FunctionList
                | Action::ExecutionStatus
        )
    }

    /// Every known action, in catalog order.
    pub fn all() -> Vec<Action> {
        let mut actions = vec![
            Action::ProjectCreate,
            Action::ProjectDelete,
            Action::DatabaseList,
            Action::DatabaseCreate,
            Action::DatabaseUpsertCollection,
            Action::DatabaseDeleteCollection,
            Action::UsersList,
            Action::UsersCreate,
            Action::UsersUpdate,
        ];
        actions.extend(UserField::ALL.iter().map(|f| Action::UsersUpdateField(*f)));
        actions.extend([
            Action::FunctionList,
            Action::FunctionCreate,
            Action::FunctionUpdate,
            Action::DeploymentTrigger,
            Action::ExecutionTrigger,
            Action::ExecutionStatus,
        ]);
        actions
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = StandardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::all()
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| StandardError::validation(format!("unknown action \"{s}\"")))
    }
}

impl TryFrom<String> for Action {
    type Error = StandardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Action> for String {
    fn from(a: Action) -> String {
        a.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_action_name() {
        for action in Action::all() {
            let parsed: Action = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn unknown_action_is_validation_error() {
        let err = "database.drop".parse::<Action>().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationError);
        assert!(err.message.contains("database.drop"));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Action::UsersUpdateField(UserField::Email)).unwrap();
        assert_eq!(json, r#""auth.users.update.email""#);
        let back: Action = serde_json::from_str(r#""function.deployment.trigger""#).unwrap();
        assert_eq!(back, Action::DeploymentTrigger);
    }

    #[test]
    fn domains_match_prefixes() {
        for action in Action::all() {
            let prefix = action.as_str().split('.').next().unwrap();
            let expected = match prefix {
                "project" => ActionDomain::Project,
                "database" => ActionDomain::Database,
                "auth" => ActionDomain::Auth,
                "function" => ActionDomain::Function,
                other => panic!("unexpected prefix {other}"),
            };
            assert_eq!(action.domain(), expected);
        }
    }

    #[test]
    fn destructive_set_is_exact() {
        let destructive: Vec<_> = Action::all()
            .into_iter()
            .filter(Action::is_inherently_destructive)
            .collect();
        assert_eq!(
            destructive,
            vec![Action::ProjectDelete, Action::DatabaseDeleteCollection]
        );
    }

    #[test]
    fn reads_are_gets() {
        assert!(Action::DatabaseList.is_read());
        assert!(Action::ExecutionStatus.is_read());
        assert!(!Action::DatabaseCreate.is_read());
        assert!(!Action::DeploymentTrigger.is_read());
    }
}
