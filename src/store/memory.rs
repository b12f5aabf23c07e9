//! In-process store backing the binary and the test suites.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::opaque::{hash_plaintext, OpaqueToken};
use crate::auth::principal::User;
use crate::store::{PermissionStore, Permissions, StoreError, TokenStore, UserStore};

#[derive(Debug, Clone)]
struct TokenRecord {
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: String,
}

/// Seed file layout.
#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    permissions: HashMap<i64, Vec<String>>,
    #[serde(default)]
    tokens: Vec<SeedToken>,
}

#[derive(Debug, Deserialize)]
struct SeedToken {
    plaintext: String,
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: String,
}

/// Thread-safe maps of users, token hashes and permission grants.
#[derive(Debug)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, User>>,
    tokens: RwLock<HashMap<[u8; 32], TokenRecord>>,
    permissions: RwLock<HashMap<i64, HashSet<String>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            permissions: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Load users, grants and tokens from a JSON seed file.
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let seed: Seed = serde_json::from_reader(reader)?;

        let store = Self::new();
        for user in seed.users {
            store.insert_user(user);
        }
        for (user_id, codes) in seed.permissions {
            store.grant(user_id, codes);
        }
        for token in &seed.tokens {
            store.insert_token_hash(
                hash_plaintext(&token.plaintext),
                token.user_id,
                token.expiry,
                &token.scope,
            );
        }

        tracing::info!(
            users = store.users.read().expect("user map poisoned").len(),
            tokens = seed.tokens.len(),
            "Loaded seed data"
        );
        Ok(store)
    }

    pub fn insert_user(&self, user: User) {
        self.users
            .write()
            .expect("user map poisoned")
            .insert(user.id, user);
    }

    /// Add permission codes to a user.
    pub fn grant<I, S>(&self, user_id: i64, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .write()
            .expect("permission map poisoned")
            .entry(user_id)
            .or_default()
            .extend(codes.into_iter().map(Into::into));
    }

    /// Store a minted token. Only its hash is kept.
    pub fn insert_token(&self, token: &OpaqueToken) {
        self.insert_token_hash(token.hash, token.user_id, token.expiry, &token.scope);
    }

    fn insert_token_hash(&self, hash: [u8; 32], user_id: i64, expiry: DateTime<Utc>, scope: &str) {
        self.tokens.write().expect("token map poisoned").insert(
            hash,
            TokenRecord {
                user_id,
                expiry,
                scope: scope.to_string(),
            },
        );
    }

    /// Simulate an outage: every call fails with `Unavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".into()))
        }
    }

    fn user(&self, id: i64) -> Result<User, StoreError> {
        self.users
            .read()
            .expect("user map poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.check_available()?;
        self.user(id)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn user_for_token(&self, hash: &[u8; 32], scope: &str) -> Result<User, StoreError> {
        self.check_available()?;
        let user_id = {
            let tokens = self.tokens.read().expect("token map poisoned");
            match tokens.get(hash) {
                Some(record) if record.scope == scope && record.expiry > Utc::now() => record.user_id,
                _ => return Err(StoreError::NotFound),
            }
        };
        self.user(user_id)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        self.check_available()?;
        Ok(self
            .permissions
            .read()
            .expect("permission map poisoned")
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }
}
