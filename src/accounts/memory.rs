use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{Account, AccountType, DirectoryFilter, LoginRefresh, NewAccount, ProfileUpdate};
use super::repo::{AccountStore, StoreError};

/// In-process [`AccountStore`] that enforces the same unique-email contract as Postgres.
#[derive(Default)]
pub struct MemoryAccountStore {
    rows: Mutex<Vec<Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_with_email(&self, email: &str) -> usize {
        let rows = self.rows.lock().await;
        rows.iter()
            .filter(|a| a.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|a| a.user_id == user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|a| a.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|a| a.user_id == account.user_id) {
            return Err(StoreError::UniqueViolation("user_profiles_pkey".into()));
        }
        if rows.iter().any(|a| {
            a.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(&account.email))
        }) {
            return Err(StoreError::UniqueViolation("user_profiles_email_key".into()));
        }
        let row = account.into_account(OffsetDateTime::now_utc());
        rows.push(row.clone());
        Ok(row)
    }

    async fn refresh_login(
        &self,
        user_id: Uuid,
        refresh: LoginRefresh,
    ) -> Result<Account, StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|a| a.user_id == user_id)
            .ok_or(StoreError::NotFound)?;
        if let Some(avatar) = refresh.avatar_url {
            row.avatar_url = Some(avatar);
        }
        if let Some(username) = refresh.github_username {
            row.github_username = Some(username);
        }
        if let Some(meta) = refresh.github_meta {
            row.github_meta = Some(Json(meta));
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Account, StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|a| a.user_id == user_id)
            .ok_or(StoreError::NotFound)?;
        let ProfileUpdate {
            full_name,
            bio,
            skills,
            hourly_rate,
            location,
            company_name,
            website,
            avatar_url,
        } = update;
        row.full_name = full_name.or(row.full_name.take());
        row.bio = bio.or(row.bio.take());
        if let Some(skills) = skills {
            row.skills = skills;
        }
        row.hourly_rate = hourly_rate.or(row.hourly_rate);
        row.location = location.or(row.location.take());
        row.company_name = company_name.or(row.company_name.take());
        row.website = website.or(row.website.take());
        row.avatar_url = avatar_url.or(row.avatar_url.take());
        row.profile_completed = true;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn list_by_type(
        &self,
        account_type: AccountType,
        filter: &DirectoryFilter,
    ) -> Result<Vec<Account>, StoreError> {
        let rows = self.rows.lock().await;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let contains = |field: &Option<String>, needle: &str| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(needle))
        };
        let mut matched: Vec<Account> = rows
            .iter()
            .filter(|a| a.account_type == account_type)
            .filter(|a| match &needle {
                Some(n) => {
                    contains(&a.full_name, n)
                        || contains(&a.bio, n)
                        || contains(&a.github_username, n)
                        || contains(&a.company_name, n)
                }
                None => true,
            })
            .filter(|a| match &filter.skill {
                Some(skill) => a.skills.iter().any(|s| s == skill),
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.profile_completed
                .cmp(&a.profile_completed)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::Provider;

    fn new_account(email: &str, account_type: AccountType) -> NewAccount {
        NewAccount {
            user_id: Uuid::new_v4(),
            email: email.into(),
            account_type,
            provider: Provider::Google,
            full_name: None,
            avatar_url: None,
            github_username: None,
            github_meta: None,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email_case_insensitively() {
        let store = MemoryAccountStore::new();
        store
            .insert(new_account("a@x.com", AccountType::Client))
            .await
            .unwrap();
        let err = store
            .insert(new_account("A@X.com", AccountType::Freelancer))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_profile_keeps_unset_fields() {
        let store = MemoryAccountStore::new();
        let row = store
            .insert(new_account("f@x.com", AccountType::Freelancer))
            .await
            .unwrap();
        store
            .update_profile(
                row.user_id,
                ProfileUpdate {
                    full_name: Some("Fay".into()),
                    skills: Some(vec!["rust".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = store
            .update_profile(
                row.user_id,
                ProfileUpdate {
                    bio: Some("systems".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Fay"));
        assert_eq!(updated.bio.as_deref(), Some("systems"));
        assert_eq!(updated.skills, vec!["rust".to_string()]);
        assert!(updated.profile_completed);
    }

    #[tokio::test]
    async fn list_by_type_filters_by_skill_and_search() {
        let store = MemoryAccountStore::new();
        for (email, name, skill) in [
            ("a@x.com", "Alice", "rust"),
            ("b@x.com", "Bob", "go"),
            ("c@x.com", "Carol", "rust"),
        ] {
            let row = store
                .insert(new_account(email, AccountType::Freelancer))
                .await
                .unwrap();
            store
                .update_profile(
                    row.user_id,
                    ProfileUpdate {
                        full_name: Some(name.into()),
                        skills: Some(vec![skill.into()]),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        store
            .insert(new_account("client@x.com", AccountType::Client))
            .await
            .unwrap();

        let rust = store
            .list_by_type(
                AccountType::Freelancer,
                &DirectoryFilter {
                    skill: Some("rust".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rust.len(), 2);

        let carol = store
            .list_by_type(
                AccountType::Freelancer,
                &DirectoryFilter {
                    search: Some("car".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(carol.len(), 1);
        assert_eq!(carol[0].full_name.as_deref(), Some("Carol"));

        let clients = store
            .list_by_type(AccountType::Client, &DirectoryFilter::default())
            .await
            .unwrap();
        assert_eq!(clients.len(), 1);
    }
}
