use serde::{Deserialize, Serialize};

/// Identity of the caller, as supplied by the upstream identity provider.
/// This service never authenticates anyone itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub role: Role,
    pub community_id: String,
}

impl Requester {
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Resident,
    Staff,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Staff => "staff",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "staff" => Role::Staff,
            "admin" => Role::Admin,
            "super_admin" => Role::SuperAdmin,
            _ => Role::Resident,
        }
    }

    /// Admins see and may act on every booking in their community.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}
