//! Build-time scope catalog: the minimum capability scopes each action
//! requires. The planner unions these into every operation before hashing,
//! so a client can declare extra scopes but never fewer.

use crate::action::Action;

/// Version tag advertised by `scopes.catalog.get` and folded into the plan
/// hash as the policy tag. Bump when the catalog changes so previewed plans
/// from the old catalog fail verification instead of silently re-scoping.
pub const CATALOG_VERSION: &str = "2025-07";

/// Minimum scopes for an action. Always non-empty.
pub fn required_scopes(action: Action) -> &'static [&'static str] {
    match action {
        Action::ProjectCreate | Action::ProjectDelete => &["projects.write"],
        Action::DatabaseList => &["databases.read"],
        Action::DatabaseCreate
        | Action::DatabaseUpsertCollection
        | Action::DatabaseDeleteCollection => &["databases.write"],
        Action::UsersList => &["users.read"],
        Action::UsersCreate | Action::UsersUpdate | Action::UsersUpdateField(_) => {
            &["users.write"]
        }
        Action::FunctionList => &["functions.read"],
        Action::FunctionCreate | Action::FunctionUpdate | Action::DeploymentTrigger => {
            &["functions.write"]
        }
        Action::ExecutionTrigger => &["execution.write"],
        Action::ExecutionStatus => &["execution.read"],
    }
}

/// The full catalog in action order, for `scopes.catalog.get`.
pub fn entries() -> Vec<(Action, &'static [&'static str])> {
    Action::all()
        .into_iter()
        .map(|a| (a, required_scopes(a)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_has_scopes() {
        for (action, scopes) in entries() {
            assert!(
                !scopes.is_empty(),
                "action {action} has an empty scope set"
            );
        }
    }

    #[test]
    fn known_mappings() {
        assert_eq!(required_scopes(Action::DatabaseCreate), &["databases.write"]);
        assert_eq!(required_scopes(Action::UsersCreate), &["users.write"]);
        assert_eq!(required_scopes(Action::ExecutionStatus), &["execution.read"]);
    }

    #[test]
    fn entries_cover_all_actions() {
        assert_eq!(entries().len(), Action::all().len());
    }
}
