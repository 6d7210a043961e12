//! Process-local identity cache.
//!
//! Filled on successful OAuth callbacks and consulted only when the credential
//! store misses or is unreachable. Entries expire after a fixed TTL and the
//! whole cache is lost on restart; the store stays the source of truth.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::provider::Provider;
use crate::accounts::{Account, AccountType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedIdentity {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub account_type: AccountType,
    pub provider: Provider,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub github_username: Option<String>,
}

impl From<&Account> for CachedIdentity {
    fn from(a: &Account) -> Self {
        Self {
            user_id: a.user_id,
            email: a.email.clone(),
            account_type: a.account_type,
            provider: a.provider,
            full_name: a.full_name.clone(),
            avatar_url: a.avatar_url.clone(),
            github_username: a.github_username.clone(),
        }
    }
}

struct Entry {
    identity: CachedIdentity,
    expires_at: OffsetDateTime,
}

pub struct IdentityCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, user_id: &Uuid) -> Option<CachedIdentity> {
        self.get_at(user_id, OffsetDateTime::now_utc())
    }

    fn get_at(&self, user_id: &Uuid, now: OffsetDateTime) -> Option<CachedIdentity> {
        let entries = self.entries.read().ok()?;
        entries
            .get(user_id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.identity.clone())
    }

    pub fn put(&self, identity: CachedIdentity) {
        self.put_at(identity, OffsetDateTime::now_utc());
    }

    fn put_at(&self, identity: CachedIdentity, now: OffsetDateTime) {
        // A poisoned lock only loses a cache write.
        if let Ok(mut entries) = self.entries.write() {
            let expires_at = now + self.ttl;
            entries.insert(
                identity.user_id,
                Entry {
                    identity,
                    expires_at,
                },
            );
        }
    }

    pub fn invalidate(&self, user_id: &Uuid) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(user_id);
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(OffsetDateTime::now_utc())
    }

    fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
