use serde::{Deserialize, Serialize};
use std::fmt;

/// CMS roles.
///
/// The order of variants matters: it defines the privilege hierarchy.
/// `Editor` is the least privileged, `Admin` is the most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can create and edit stories.
    Editor = 0,
    /// Can additionally manage CMS users.
    Admin = 1,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Editor => write!(f, "editor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl Role {
    /// Parse a role from a string (case-insensitive).
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "editor" => Some(Role::Editor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Returns `true` if `self` has at least the required role.
    pub fn has_access(&self, required: Role) -> bool {
        *self >= required
    }
}

/// The caller identity recovered from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl AuthenticatedUser {
    /// Fail with `Forbidden` unless the user holds at least `required`.
    pub fn require(&self, required: Role) -> Result<(), crate::error::AppError> {
        if self.role.has_access(required) {
            Ok(())
        } else {
            Err(crate::error::AppError::Forbidden(format!(
                "The {} role is required",
                required
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Editor);
    }

    #[test]
    fn test_has_access() {
        assert!(Role::Admin.has_access(Role::Admin));
        assert!(Role::Admin.has_access(Role::Editor));
        assert!(Role::Editor.has_access(Role::Editor));
        assert!(!Role::Editor.has_access(Role::Admin));
    }

    #[test]
    fn test_from_str_ci() {
        assert_eq!(Role::from_str_ci("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str_ci(" Editor "), Some(Role::Editor));
        assert_eq!(Role::from_str_ci("viewer"), None);
    }

    #[test]
    fn test_serialization_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"editor\"").unwrap();
        assert_eq!(role, Role::Editor);
    }

    #[test]
    fn test_require() {
        let editor = AuthenticatedUser {
            user_id: "user_1".into(),
            username: "ed".into(),
            role: Role::Editor,
        };
        assert!(editor.require(Role::Editor).is_ok());
        assert!(matches!(
            editor.require(Role::Admin),
            Err(crate::error::AppError::Forbidden(_))
        ));
    }
}
