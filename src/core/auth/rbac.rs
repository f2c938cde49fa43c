// src/core/auth/rbac.rs

//! Role-based access control: maps roles to permission sets and evaluates
//! whether an action is allowed. Permissions support the wildcard `*`, exact
//! matches, and `prefix.*` which matches any sub-action.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RoleSet {
    roles: HashMap<String, Vec<String>>,
}

impl Default for RoleSet {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert("admin".to_string(), vec!["*".to_string()]);
        roles.insert(
            "operator".to_string(),
            vec![
                "robot.move".to_string(),
                "robot.stop".to_string(),
                "robot.status".to_string(),
                "command.view".to_string(),
                "command.create".to_string(),
            ],
        );
        roles.insert(
            "viewer".to_string(),
            vec!["robot.status".to_string(), "command.view".to_string()],
        );
        Self { roles }
    }
}

impl RoleSet {
    /// Adds or replaces a role. Role names beyond the built-in three are
    /// allowed.
    pub fn define_role(&mut self, name: &str, permissions: Vec<String>) {
        self.roles.insert(name.to_string(), permissions);
    }

    pub fn role_exists(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Evaluates whether `role` may perform `action`.
    pub fn permits(&self, role: &str, action: &str) -> bool {
        let Some(permissions) = self.roles.get(role) else {
            return false;
        };

        for permission in permissions {
            if permission == "*" || permission == action {
                return true;
            }
            if let Some(prefix) = permission.strip_suffix(".*") {
                if action
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
                {
                    return true;
                }
            }
        }
        false
    }
}
