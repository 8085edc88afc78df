//! Access roles restricting which operations a client may perform.
//!
//! A role is a set of three permissions written as letters: `c` (create:
//! send messages, create queues), `r` (read: count, receive, list) and `d`
//! (delete: delete messages, purge, delete queues).

use crate::error::{QueueError, ValidationError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Set of create / read / delete permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role {
    create: bool,
    read: bool,
    delete: bool,
}

impl Role {
    pub const NONE: Role = Role::new(false, false, false);
    pub const CREATE: Role = Role::new(true, false, false);
    pub const READ: Role = Role::new(false, true, false);
    pub const DELETE: Role = Role::new(false, false, true);
    /// Full access (`crd`)
    pub const ADMIN: Role = Role::new(true, true, true);
    /// Sends and inspects (`cr`)
    pub const PRODUCER: Role = Role::new(true, true, false);
    /// Receives and deletes (`rd`)
    pub const CONSUMER: Role = Role::new(false, true, true);

    pub const fn new(create: bool, read: bool, delete: bool) -> Self {
        Self {
            create,
            read,
            delete,
        }
    }

    /// Whether every permission in `required` is granted by this role
    pub fn allows(&self, required: Role) -> bool {
        (!required.create || self.create)
            && (!required.read || self.read)
            && (!required.delete || self.delete)
    }

    /// Return `RoleViolation` unless this role grants `required`
    pub fn check(&self, required: Role, operation: &'static str) -> Result<(), QueueError> {
        if self.allows(required) {
            Ok(())
        } else {
            Err(QueueError::RoleViolation {
                role: *self,
                required,
                operation,
            })
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::ADMIN
    }
}

impl std::ops::BitOr for Role {
    type Output = Role;

    fn bitor(self, rhs: Role) -> Role {
        Role::new(
            self.create || rhs.create,
            self.read || rhs.read,
            self.delete || rhs.delete,
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::NONE {
            return write!(f, "-");
        }
        if self.create {
            write!(f, "c")?;
        }
        if self.read {
            write!(f, "r")?;
        }
        if self.delete {
            write!(f, "d")?;
        }
        Ok(())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => return Ok(Self::ADMIN),
            "producer" => return Ok(Self::PRODUCER),
            "consumer" => return Ok(Self::CONSUMER),
            "" | "-" | "none" => return Ok(Self::NONE),
            _ => {}
        }

        let mut role = Self::NONE;
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'c' => role.create = true,
                'r' => role.read = true,
                'd' => role.delete = true,
                other => {
                    return Err(ValidationError::InvalidFormat {
                        field: "role".to_string(),
                        message: format!("unknown permission '{}', expected c, r or d", other),
                    })
                }
            }
        }
        Ok(role)
    }
}

impl TryFrom<String> for Role {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.to_string()
    }
}

#[cfg(test)]
#[path = "role_tests.rs"]
mod tests;
