use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provider::Provider;
use crate::accounts::{Account, AccountType};

/// JWT payload of a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: Uuid,                 // account user_id
    pub email: String,             // effective email at login
    pub account_type: AccountType, // client | freelancer
    pub provider: Provider,        // provider used for this login
    pub iat: usize,                // issued at (unix timestamp)
    pub exp: usize,                // expires at (unix timestamp)
    pub iss: String,               // issuer
    pub aud: String,               // audience
}

/// Who a session token is issued for.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSubject {
    pub user_id: Uuid,
    pub email: String,
    pub account_type: AccountType,
    pub provider: Provider,
}

impl SessionSubject {
    /// `login_email` is used when the stored row has no email.
    pub fn for_account(account: &Account, provider: Provider, login_email: &str) -> Self {
        Self {
            user_id: account.user_id,
            email: account
                .email
                .clone()
                .unwrap_or_else(|| login_email.to_string()),
            account_type: account.account_type,
            provider,
        }
    }
}

impl From<&Claims> for SessionSubject {
    fn from(c: &Claims) -> Self {
        Self {
            user_id: c.sub,
            email: c.email.clone(),
            account_type: c.account_type,
            provider: c.provider,
        }
    }
}
