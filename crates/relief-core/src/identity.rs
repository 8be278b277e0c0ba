//! Caller identity resolution.
//!
//! Request handling never consults a global user table. The server is
//! handed an [`IdentityResolver`] at startup and every request resolves
//! its actor through it.

use std::collections::BTreeMap;

use relief_types::{Identity, Role};

use crate::config::IdentityConfig;

/// Maps a user handle from a request to an [`Identity`].
pub trait IdentityResolver: Send + Sync {
    /// Resolve `handle` (from a header or query parameter, if any).
    ///
    /// Never fails: unknown or missing handles resolve to a fallback
    /// identity chosen by the implementation.
    fn resolve(&self, handle: Option<&str>) -> Identity;
}

/// A fixed directory of users loaded from configuration.
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    users: BTreeMap<String, Identity>,
    fallback: Identity,
}

impl StaticDirectory {
    /// Build a directory from the `identity` config section.
    ///
    /// If the configured default user is not in the list it is added as
    /// a contributor, so the fallback always exists.
    pub fn from_config(config: &IdentityConfig) -> Self {
        let users: BTreeMap<String, Identity> = config
            .users
            .iter()
            .map(|u| {
                (
                    u.id.clone(),
                    Identity {
                        id: u.id.clone(),
                        role: u.role,
                    },
                )
            })
            .collect();

        let fallback = users.get(&config.default_user).cloned().unwrap_or_else(|| {
            tracing::warn!(
                user = %config.default_user,
                "default user missing from identity directory, treating as contributor"
            );
            Identity {
                id: config.default_user.clone(),
                role: Role::Contributor,
            }
        });

        Self { users, fallback }
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory lists no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::from_config(&IdentityConfig::default())
    }
}

impl IdentityResolver for StaticDirectory {
    fn resolve(&self, handle: Option<&str>) -> Identity {
        handle
            .and_then(|h| self.users.get(h))
            .unwrap_or(&self.fallback)
            .clone()
    }
}
