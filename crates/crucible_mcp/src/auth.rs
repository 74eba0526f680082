//! API-key authentication and role-based authorization.
//!
//! Users live in a JSON document (`users.json`). Keys are stored as
//! SHA-256 digests; the plaintext key exists only at generation time and
//! in the client's hands. Each user carries a role, and each tool maps to
//! the permission its invocation requires.
//!
//! A per-user hourly request counter enforces the account-level quota,
//! independent of the per-connection sliding window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Default hourly request quota for new users.
const DEFAULT_HOURLY_QUOTA: u32 = 100;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid API key")]
    InvalidKey,

    #[error("Rate limit exceeded for user {0}")]
    QuotaExceeded(String),

    #[error("User store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Developer,
    Viewer,
}

/// Permission classes gating tool invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Run code in a workspace.
    Execute,
    /// Read artifacts, history and status.
    Read,
    /// Store or delete artifacts, clean contexts.
    Write,
    /// Server administration (connection stats, user management).
    Admin,
}

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => &[
                Permission::Execute,
                Permission::Read,
                Permission::Write,
                Permission::Admin,
            ],
            Role::Developer => &[Permission::Execute, Permission::Read, Permission::Write],
            Role::Viewer => &[Permission::Read],
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Permission required to invoke a tool, by name.
pub fn permission_for_tool(tool: &str) -> Permission {
    match tool {
        "execute_python" | "execute_shell" | "execute_animation" => Permission::Execute,
        "store_artifact" | "cleanup_artifacts" | "cleanup_context" => Permission::Write,
        "get_connection_stats" => Permission::Admin,
        _ => Permission::Read,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// SHA-256 hex digest of the API key.
    pub api_key_hash: String,
    pub role: Role,
    /// Requests per hour.
    #[serde(default = "default_quota")]
    pub hourly_quota: u32,
    #[serde(default)]
    pub requests_this_hour: u32,
    #[serde(default = "Utc::now")]
    pub quota_resets_at: DateTime<Utc>,
}

fn default_quota() -> u32 {
    DEFAULT_HOURLY_QUOTA
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserStore {
    users: Vec<User>,
}

/// Authentication manager over a persisted user store.
pub struct AuthManager {
    path: PathBuf,
    store: UserStore,
    by_key_hash: HashMap<String, usize>,
}

impl AuthManager {
    /// Load the user store, creating it with a default admin on first run.
    /// The generated admin key is logged once; it is not recoverable later.
    pub fn load_or_init(path: PathBuf) -> Result<Self, AuthError> {
        let store = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| AuthError::Store(format!("unreadable user store: {}", e)))?,
            Err(_) => UserStore::default(),
        };

        let mut manager = Self {
            path,
            store,
            by_key_hash: HashMap::new(),
        };

        if manager.store.users.is_empty() {
            let key = generate_api_key();
            manager.store.users.push(User {
                id: Uuid::new_v4().to_string(),
                name: "admin".to_string(),
                api_key_hash: hash_key(&key),
                role: Role::Admin,
                hourly_quota: DEFAULT_HOURLY_QUOTA,
                requests_this_hour: 0,
                quota_resets_at: Utc::now() + Duration::hours(1),
            });
            manager.save()?;
            warn!(
                "Created default admin user; API key (shown once): {}",
                key
            );
        }

        manager.reindex();
        info!("Auth manager loaded {} users", manager.store.users.len());
        Ok(manager)
    }

    /// Authenticate an API key and charge the hourly quota.
    pub fn authenticate(&mut self, api_key: &str) -> Result<User, AuthError> {
        let hash = hash_key(api_key);
        let idx = *self
            .by_key_hash
            .get(&hash)
            .ok_or(AuthError::InvalidKey)?;
        let now = Utc::now();
        let user = &mut self.store.users[idx];

        if now >= user.quota_resets_at {
            user.requests_this_hour = 0;
            user.quota_resets_at = now + Duration::hours(1);
        }
        if user.requests_this_hour >= user.hourly_quota {
            return Err(AuthError::QuotaExceeded(user.name.clone()));
        }
        user.requests_this_hour += 1;

        Ok(user.clone())
    }

    /// Check whether a user may invoke a tool.
    pub fn authorize(&self, user: &User, tool: &str) -> bool {
        user.role.allows(permission_for_tool(tool))
    }

    /// Add a user with a freshly generated key; returns the plaintext key.
    pub fn add_user(&mut self, name: &str, role: Role) -> Result<String, AuthError> {
        let key = generate_api_key();
        self.store.users.push(User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            api_key_hash: hash_key(&key),
            role,
            hourly_quota: DEFAULT_HOURLY_QUOTA,
            requests_this_hour: 0,
            quota_resets_at: Utc::now() + Duration::hours(1),
        });
        self.reindex();
        self.save()?;
        Ok(key)
    }

    pub fn user_count(&self) -> usize {
        self.store.users.len()
    }

    fn reindex(&mut self) {
        self.by_key_hash = self
            .store
            .users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.api_key_hash.clone(), i))
            .collect();
    }

    fn save(&self) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(&self.store)
            .map_err(|e| AuthError::Store(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Store(e.to_string()))?;
        }
        std::fs::write(&self.path, json).map_err(|e| AuthError::Store(e.to_string()))
    }
}

fn generate_api_key() -> String {
    format!(
        "ck-{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, AuthManager, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let mut m = AuthManager::load_or_init(path).unwrap();
        // A fresh store has exactly the default admin; mint a key we know.
        let key = m.add_user("tester", Role::Developer).unwrap();
        (dir, m, key)
    }

    #[test]
    fn test_first_run_creates_admin() {
        let dir = tempfile::tempdir().unwrap();
        let m = AuthManager::load_or_init(dir.path().join("users.json")).unwrap();
        assert_eq!(m.user_count(), 1);
        assert!(dir.path().join("users.json").exists());
    }

    #[test]
    fn test_authenticate_known_and_unknown_keys() {
        let (_dir, mut m, key) = manager();
        let user = m.authenticate(&key).unwrap();
        assert_eq!(user.name, "tester");
        assert_eq!(user.role, Role::Developer);

        assert!(matches!(
            m.authenticate("ck-bogus"),
            Err(AuthError::InvalidKey)
        ));
    }

    #[test]
    fn test_role_permission_matrix() {
        assert!(Role::Admin.allows(Permission::Admin));
        assert!(Role::Developer.allows(Permission::Execute));
        assert!(!Role::Developer.allows(Permission::Admin));
        assert!(Role::Viewer.allows(Permission::Read));
        assert!(!Role::Viewer.allows(Permission::Execute));
    }

    #[test]
    fn test_tool_permission_table() {
        assert_eq!(permission_for_tool("execute_python"), Permission::Execute);
        assert_eq!(permission_for_tool("store_artifact"), Permission::Write);
        assert_eq!(permission_for_tool("list_artifacts"), Permission::Read);
        assert_eq!(permission_for_tool("get_connection_stats"), Permission::Admin);
    }

    #[test]
    fn test_authorize_by_role() {
        let (_dir, mut m, key) = manager();
        let dev = m.authenticate(&key).unwrap();
        assert!(m.authorize(&dev, "execute_python"));
        assert!(m.authorize(&dev, "store_artifact"));
        assert!(!m.authorize(&dev, "get_connection_stats"));
    }

    #[test]
    fn test_hourly_quota() {
        let (_dir, mut m, key) = manager();
        // Drain the quota.
        for _ in 0..DEFAULT_HOURLY_QUOTA {
            m.authenticate(&key).unwrap();
        }
        assert!(matches!(
            m.authenticate(&key),
            Err(AuthError::QuotaExceeded(_))
        ));
    }

    #[test]
    fn test_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let key = {
            let mut m = AuthManager::load_or_init(path.clone()).unwrap();
            m.add_user("persistent", Role::Viewer).unwrap()
        };

        let mut reloaded = AuthManager::load_or_init(path).unwrap();
        assert_eq!(reloaded.user_count(), 2);
        let user = reloaded.authenticate(&key).unwrap();
        assert_eq!(user.name, "persistent");
    }
}
