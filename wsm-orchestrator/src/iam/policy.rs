//! Broker policies for controlled resources and workspaces.

use super::{ControlledResourceIamRole, PolicyDocument, ServiceIdentity, WsmIamRole};
use crate::error::{OrchestratorError, Result};
use crate::model::{ControlledResourceCategory, WsmApplication};
use tracing::warn;

/// Inputs to [`controlled_resource_policy`].
#[derive(Debug, Clone, Copy)]
pub struct ResourcePolicyRequest<'a> {
    pub category: ControlledResourceCategory,
    pub private_role: Option<ControlledResourceIamRole>,
    pub assignee: Option<&'a str>,
    pub application: Option<&'a WsmApplication>,
}

/// Roles present on the broker resource of each category.
pub fn declared_roles(category: ControlledResourceCategory) -> &'static [ControlledResourceIamRole] {
    use ControlledResourceIamRole::*;
    match category {
        ControlledResourceCategory::UserShared => &[Owner],
        ControlledResourceCategory::ApplicationShared => &[Owner, Editor],
        ControlledResourceCategory::UserPrivate | ControlledResourceCategory::ApplicationPrivate => {
            &[Owner, Editor, Writer, Reader]
        }
    }
}

/// Build the broker policy for a new controlled resource.
///
/// OWNER is always the service identity. Workspace-level roles are inherited from the parent
/// workspace and never appear here.
pub fn controlled_resource_policy(
    service: &ServiceIdentity,
    request: &ResourcePolicyRequest<'_>,
) -> Result<PolicyDocument> {
    let mut policy = PolicyDocument::new();
    for role in declared_roles(request.category) {
        policy.declare(role.as_str());
    }
    policy.add_member(ControlledResourceIamRole::Owner.as_str(), service.email());

    match request.category {
        ControlledResourceCategory::UserShared => {
            if request.private_role.is_some() || request.assignee.is_some() {
                warn!(
                    "Shared user resource given private role {:?} or assignee {:?}; ignoring",
                    request.private_role, request.assignee
                );
            }
        }
        ControlledResourceCategory::UserPrivate => {
            let (Some(role), Some(assignee)) = (request.private_role, request.assignee) else {
                return Err(OrchestratorError::InternalLogic(
                    "private user resource requires a private role and an assigned user".to_string(),
                ));
            };
            policy.add_member(private_role(role)?.as_str(), assignee);
        }
        ControlledResourceCategory::ApplicationShared => {
            if request.private_role.is_some() || request.assignee.is_some() {
                return Err(OrchestratorError::InternalLogic(
                    "shared application resource cannot have a private role or assigned user".to_string(),
                ));
            }
            policy.add_member(ControlledResourceIamRole::Editor.as_str(), application(request)?);
        }
        ControlledResourceCategory::ApplicationPrivate => {
            policy.add_member(ControlledResourceIamRole::Editor.as_str(), application(request)?);
            if let Some(assignee) = request.assignee {
                let role = request.private_role.ok_or_else(|| {
                    OrchestratorError::InternalLogic("assigned user given without a private role".to_string())
                })?;
                policy.add_member(private_role(role)?.as_str(), assignee);
            }
        }
    }

    Ok(policy)
}

fn private_role(role: ControlledResourceIamRole) -> Result<ControlledResourceIamRole> {
    if role == ControlledResourceIamRole::Owner {
        return Err(OrchestratorError::InternalLogic(
            "OWNER is reserved for the service identity".to_string(),
        ));
    }
    Ok(role)
}

fn application<'a>(request: &ResourcePolicyRequest<'a>) -> Result<&'a str> {
    request
        .application
        .map(|app| app.service_account.as_str())
        .ok_or_else(|| OrchestratorError::InternalLogic("application resource without an application".to_string()))
}

/// Policy for a new workspace: the creator owns it and the service identity manages it.
pub fn workspace_default_policy(service: &ServiceIdentity, owner_email: &str) -> PolicyDocument {
    let mut policy = PolicyDocument::new();
    policy.add_member(WsmIamRole::Owner.as_str(), owner_email);
    policy.add_member(WsmIamRole::Manager.as_str(), service.email());
    for role in [
        WsmIamRole::Writer,
        WsmIamRole::Reader,
        WsmIamRole::Application,
        WsmIamRole::ProjectOwner,
    ] {
        policy.declare(role.as_str());
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::BearerToken;
    use crate::model::ApplicationState;

    fn service() -> ServiceIdentity {
        ServiceIdentity::new("wsm@sa.example.com", BearerToken::new("svc"))
    }

    fn app() -> WsmApplication {
        WsmApplication {
            application_id: "leo".to_string(),
            display_name: "Leo".to_string(),
            service_account: "leo@sa.example.com".to_string(),
            state: ApplicationState::Operating,
        }
    }

    fn request<'a>(
        category: ControlledResourceCategory,
        private_role: Option<ControlledResourceIamRole>,
        assignee: Option<&'a str>,
        application: Option<&'a WsmApplication>,
    ) -> ResourcePolicyRequest<'a> {
        ResourcePolicyRequest {
            category,
            private_role,
            assignee,
            application,
        }
    }

    #[test]
    fn test_declared_roles_depend_only_on_category() {
        use ControlledResourceCategory::*;
        let app = app();
        for category in [UserShared, UserPrivate, ApplicationShared, ApplicationPrivate] {
            let expected: Vec<&str> = {
                let mut roles: Vec<&str> = declared_roles(category).iter().map(|r| r.as_str()).collect();
                roles.sort();
                roles
            };
            let variants = [
                (Some(ControlledResourceIamRole::Reader), Some("a@x")),
                (Some(ControlledResourceIamRole::Writer), Some("b@x")),
                (None, None),
            ];
            for (role, assignee) in variants {
                let Ok(policy) = controlled_resource_policy(&service(), &request(category, role, assignee, Some(&app)))
                else {
                    continue;
                };
                let roles: Vec<&str> = policy.roles().collect();
                assert_eq!(roles, expected, "{:?}", category);
            }
        }
    }

    #[test]
    fn test_user_shared_has_only_service_owner() {
        let policy = controlled_resource_policy(
            &service(),
            &request(ControlledResourceCategory::UserShared, None, None, None),
        )
        .unwrap();
        assert_eq!(policy.roles().collect::<Vec<_>>(), vec!["owner"]);
        assert_eq!(policy.members("owner").into_iter().collect::<Vec<_>>(), vec!["wsm@sa.example.com"]);
    }

    #[test]
    fn test_user_shared_tolerates_stray_assignee() {
        let policy = controlled_resource_policy(
            &service(),
            &request(
                ControlledResourceCategory::UserShared,
                Some(ControlledResourceIamRole::Writer),
                Some("u@x"),
                None,
            ),
        )
        .expect("Config error should only warn");
        assert!(policy.roles_of("u@x").is_empty());
    }

    #[test]
    fn test_user_private_assignee_in_exactly_one_role() {
        let policy = controlled_resource_policy(
            &service(),
            &request(
                ControlledResourceCategory::UserPrivate,
                Some(ControlledResourceIamRole::Writer),
                Some("u@x"),
                None,
            ),
        )
        .unwrap();

        assert_eq!(policy.members("writer").into_iter().collect::<Vec<_>>(), vec!["u@x"]);
        assert_eq!(policy.roles_of("u@x"), vec!["writer"]);
        assert!(policy.members("reader").is_empty());
        assert!(policy.members("editor").is_empty());
    }

    #[test]
    fn test_user_private_requires_role_and_assignee() {
        for (role, assignee) in [
            (None, Some("u@x")),
            (Some(ControlledResourceIamRole::Reader), None),
            (Some(ControlledResourceIamRole::Owner), Some("u@x")),
        ] {
            match controlled_resource_policy(
                &service(),
                &request(ControlledResourceCategory::UserPrivate, role, assignee, None),
            ) {
                Err(OrchestratorError::InternalLogic(_)) => {}
                other => panic!("Expected InternalLogic, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_application_shared() {
        let app = app();
        let policy = controlled_resource_policy(
            &service(),
            &request(ControlledResourceCategory::ApplicationShared, None, None, Some(&app)),
        )
        .unwrap();
        assert_eq!(policy.roles_of("leo@sa.example.com"), vec!["editor"]);

        match controlled_resource_policy(
            &service(),
            &request(ControlledResourceCategory::ApplicationShared, None, Some("u@x"), Some(&app)),
        ) {
            Err(OrchestratorError::InternalLogic(_)) => {}
            other => panic!("Expected InternalLogic, got {:?}", other),
        }
    }

    #[test]
    fn test_application_private_optional_assignee() {
        let app = app();
        let without = controlled_resource_policy(
            &service(),
            &request(ControlledResourceCategory::ApplicationPrivate, None, None, Some(&app)),
        )
        .unwrap();
        assert_eq!(without.roles_of("leo@sa.example.com"), vec!["editor"]);
        assert!(without.members("reader").is_empty());

        let with = controlled_resource_policy(
            &service(),
            &request(
                ControlledResourceCategory::ApplicationPrivate,
                Some(ControlledResourceIamRole::Reader),
                Some("u@x"),
                Some(&app),
            ),
        )
        .unwrap();
        assert_eq!(with.roles_of("u@x"), vec!["reader"]);
    }

    #[test]
    fn test_workspace_default_policy() {
        let policy = workspace_default_policy(&service(), "creator@x");
        assert_eq!(policy.roles_of("creator@x"), vec!["owner"]);
        assert_eq!(policy.roles_of("wsm@sa.example.com"), vec!["manager"]);
        for role in ["writer", "reader", "application", "project-owner"] {
            assert!(policy.has_role(role), "{}", role);
            assert!(policy.members(role).is_empty(), "{}", role);
        }
    }
}
