use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    #[default]
    None,
    Learner,
    Instructor,
    Admin,
}

impl Role {
    /// Indicates whether a user with this role can approve or reject
    /// enrollment requests.
    pub fn can_decide(self) -> bool {
        self >= Role::Instructor
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::None => write!(f, "none"),
            Role::Learner => write!(f, "learner"),
            Role::Instructor => write!(f, "instructor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
