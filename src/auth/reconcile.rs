//! Maps an external OAuth identity onto exactly one account.
//!
//! Accounts are keyed by email, not by provider: a second provider presenting
//! an email that already exists logs into that account and keeps its original
//! account type. Creation races are settled by the store's unique constraint
//! on `email`; the losing request re-reads the winner's row.

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::provider::{ExternalIdentity, Provider};
use crate::accounts::{
    model::{LoginRefresh, NewAccount},
    Account, AccountStore, StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Existing,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Existing => "existing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub account: Account,
    pub action: ReconcileAction,
    /// Email the lookup was keyed on.
    pub effective_email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The account could not be created and no winning row was found.
    #[error("account creation for {provider} login failed: {reason}")]
    ConcurrentConflict { provider: Provider, reason: String },

    #[error("credential store unavailable")]
    StoreUnavailable,

    #[error("account lookup failed: {0}")]
    Store(#[source] StoreError),
}

fn lookup_error(e: StoreError) -> ReconcileError {
    match e {
        StoreError::Unavailable => ReconcileError::StoreUnavailable,
        other => ReconcileError::Store(other),
    }
}

#[instrument(skip(store, identity), fields(provider = %identity.provider))]
pub async fn reconcile(
    store: &dyn AccountStore,
    identity: &ExternalIdentity,
) -> Result<Reconciliation, ReconcileError> {
    let effective_email = identity.effective_email();

    if let Some(existing) = store
        .find_by_email(&effective_email)
        .await
        .map_err(lookup_error)?
    {
        let account = refresh_existing(store, existing, identity).await;
        info!(user_id = %account.user_id, "login matched existing account");
        return Ok(Reconciliation {
            account,
            action: ReconcileAction::Existing,
            effective_email,
        });
    }

    let new_account = NewAccount {
        user_id: Uuid::new_v4(),
        email: effective_email.clone(),
        account_type: identity.account_type(),
        provider: identity.provider,
        full_name: Some(identity.display_name.clone()),
        avatar_url: identity.avatar_url.clone(),
        github_username: identity.username.clone(),
        github_meta: identity.provider_meta.clone(),
    };

    match store.insert(new_account).await {
        Ok(account) => {
            info!(
                user_id = %account.user_id,
                account_type = %account.account_type,
                "account created"
            );
            Ok(Reconciliation {
                account,
                action: ReconcileAction::Created,
                effective_email,
            })
        }
        Err(StoreError::UniqueViolation(constraint)) => {
            // Another request created the same email between our lookup and insert.
            warn!(%constraint, "duplicate insert race; using the existing row");
            match store.find_by_email(&effective_email).await {
                Ok(Some(winner)) => Ok(Reconciliation {
                    account: winner,
                    action: ReconcileAction::Existing,
                    effective_email,
                }),
                Ok(None) => Err(ReconcileError::ConcurrentConflict {
                    provider: identity.provider,
                    reason: format!("{constraint} violated but no row holds the email"),
                }),
                Err(e) => Err(ReconcileError::ConcurrentConflict {
                    provider: identity.provider,
                    reason: e.to_string(),
                }),
            }
        }
        Err(e) => {
            warn!(error = %e, "account insert failed");
            Err(ReconcileError::ConcurrentConflict {
                provider: identity.provider,
                reason: e.to_string(),
            })
        }
    }
}

// Refresh display fields only; type, provider and id stay as first created.
async fn refresh_existing(
    store: &dyn AccountStore,
    existing: Account,
    identity: &ExternalIdentity,
) -> Account {
    let refresh = match identity.provider {
        Provider::Google => LoginRefresh {
            avatar_url: identity.avatar_url.clone(),
            ..Default::default()
        },
        Provider::GitHub => LoginRefresh {
            avatar_url: identity.avatar_url.clone(),
            github_username: identity.username.clone(),
            github_meta: identity.provider_meta.clone(),
        },
    };
    match store.refresh_login(existing.user_id, refresh).await {
        Ok(updated) => updated,
        Err(e) => {
            warn!(user_id = %existing.user_id, error = %e, "login refresh failed; using stored row");
            existing
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::accounts::{
        memory::MemoryAccountStore,
        model::{AccountType, DirectoryFilter, ProfileUpdate},
    };
    use crate::auth::provider::{fixtures, normalize};

    fn google(id: &str, email: &str) -> ExternalIdentity {
        normalize(fixtures::google(id, Some(email))).unwrap()
    }

    fn github(id: u64, login: &str, email: Option<&str>) -> ExternalIdentity {
        normalize(fixtures::github(id, login, email)).unwrap()
    }

    /// Delegates to an inner store but can hide rows from lookups, fail inserts,
    /// or hand control back to the runtime after every lookup.
    struct Scripted {
        inner: MemoryAccountStore,
        stale_reads: AtomicUsize,
        fail_insert: bool,
        yield_after_lookup: bool,
        insert_attempts: AtomicUsize,
    }

    impl Scripted {
        fn new(inner: MemoryAccountStore) -> Self {
            Self {
                inner,
                stale_reads: Default::default(),
                fail_insert: false,
                yield_after_lookup: false,
                insert_attempts: Default::default(),
            }
        }
    }

    #[async_trait]
    impl AccountStore for Scripted {
        async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_id(user_id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            let remaining = self.stale_reads.load(Ordering::SeqCst);
            if remaining > 0 {
                self.stale_reads.store(remaining - 1, Ordering::SeqCst);
                return Ok(None);
            }
            let found = self.inner.find_by_email(email).await;
            if self.yield_after_lookup {
                tokio::task::yield_now().await;
            }
            found
        }

        async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
            self.insert_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_insert {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.insert(account).await
        }

        async fn refresh_login(
            &self,
            user_id: Uuid,
            refresh: LoginRefresh,
        ) -> Result<Account, StoreError> {
            self.inner.refresh_login(user_id, refresh).await
        }

        async fn update_profile(
            &self,
            user_id: Uuid,
            update: ProfileUpdate,
        ) -> Result<Account, StoreError> {
            self.inner.update_profile(user_id, update).await
        }

        async fn list_by_type(
            &self,
            account_type: AccountType,
            filter: &DirectoryFilter,
        ) -> Result<Vec<Account>, StoreError> {
            self.inner.list_by_type(account_type, filter).await
        }
    }

    #[tokio::test]
    async fn google_login_creates_client_account() {
        let store = MemoryAccountStore::new();
        let r = reconcile(&store, &google("g1", "a@x.com")).await.unwrap();
        assert_eq!(r.action, ReconcileAction::Created);
        assert_eq!(r.account.email.as_deref(), Some("a@x.com"));
        assert_eq!(r.account.account_type, AccountType::Client);
        assert_eq!(r.account.provider, Provider::Google);
    }

    #[tokio::test]
    async fn github_login_without_email_creates_placeholder_account() {
        let store = MemoryAccountStore::new();
        let r = reconcile(&store, &github(1, "bob", None)).await.unwrap();
        assert_eq!(r.action, ReconcileAction::Created);
        assert_eq!(r.account.email.as_deref(), Some("github_1@noemail.local"));
        assert_eq!(r.account.account_type, AccountType::Freelancer);
        assert_eq!(r.account.github_username.as_deref(), Some("bob"));
        assert_eq!(r.account.github_meta.as_ref().map(|m| m.0.public_repos), Some(12));

        let again = reconcile(&store, &github(1, "bob", None)).await.unwrap();
        assert_eq!(again.action, ReconcileAction::Existing);
        assert_eq!(again.account.user_id, r.account.user_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn second_provider_with_same_email_reuses_account() {
        let store = MemoryAccountStore::new();
        let first = reconcile(&store, &google("g1", "a@x.com")).await.unwrap();
        let second = reconcile(&store, &github(9, "alice", Some("A@X.com")))
            .await
            .unwrap();

        assert_eq!(second.action, ReconcileAction::Existing);
        assert_eq!(second.account.user_id, first.account.user_id);
        assert_eq!(second.account.account_type, AccountType::Client);
        assert_eq!(second.account.provider, Provider::Google);
        assert_eq!(second.account.github_username.as_deref(), Some("alice"));
        assert_eq!(store.count_with_email("a@x.com").await, 1);
    }

    #[tokio::test]
    async fn any_login_sequence_leaves_one_row_per_email() {
        let store = MemoryAccountStore::new();
        let logins = [
            github(5, "x", Some("shared@x.com")),
            google("g5", "shared@x.com"),
            github(5, "x", Some("shared@x.com")),
            google("g6", "other@x.com"),
            google("g5", "shared@x.com"),
        ];
        for identity in &logins {
            reconcile(&store, identity).await.unwrap();
        }
        assert_eq!(store.count_with_email("shared@x.com").await, 1);
        assert_eq!(store.count_with_email("other@x.com").await, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_first_logins_create_one_row() {
        let mut store = Scripted::new(MemoryAccountStore::new());
        store.yield_after_lookup = true;
        let a = google("g1", "race@x.com");
        let b = github(2, "racer", Some("race@x.com"));

        // Both lookups miss before either insert runs.
        let (ra, rb) = tokio::join!(reconcile(&store, &a), reconcile(&store, &b));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(store.insert_attempts.load(Ordering::SeqCst), 2);
        let mut actions = [ra.action, rb.action];
        actions.sort_by_key(|a| a.as_str());
        assert_eq!(actions, [ReconcileAction::Created, ReconcileAction::Existing]);
        assert_eq!(ra.account.user_id, rb.account.user_id);
        assert_eq!(ra.account.account_type, rb.account.account_type);
        assert_eq!(store.inner.count_with_email("race@x.com").await, 1);
    }

    #[tokio::test]
    async fn losing_an_insert_race_returns_winner_row() {
        let inner = MemoryAccountStore::new();
        let winner = reconcile(&inner, &google("g1", "race@x.com")).await.unwrap();

        // The lookup misses as if the winner committed just after it ran.
        let store = Scripted::new(inner);
        store
            .stale_reads
            .store(1, Ordering::SeqCst);
        let loser = reconcile(&store, &github(3, "late", Some("race@x.com")))
            .await
            .unwrap();

        assert_eq!(loser.action, ReconcileAction::Existing);
        assert_eq!(loser.account.user_id, winner.account.user_id);
        assert_eq!(loser.account.account_type, AccountType::Client);
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn unique_violation_without_winner_is_a_conflict() {
        let inner = MemoryAccountStore::new();
        reconcile(&inner, &google("g1", "ghost@x.com")).await.unwrap();
        let store = Scripted::new(inner);
        store
            .stale_reads
            .store(2, Ordering::SeqCst);
        let err = reconcile(&store, &google("g2", "ghost@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ConcurrentConflict {
                provider: Provider::Google,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn other_insert_failures_abort_the_login() {
        let mut store = Scripted::new(MemoryAccountStore::new());
        store.fail_insert = true;
        let err = reconcile(&store, &github(4, "dana", None)).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ConcurrentConflict {
                provider: Provider::GitHub,
                ..
            }
        ));
        assert_eq!(store.inner.len().await, 0);
    }
}
