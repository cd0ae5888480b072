//! Registry of accounts: Firebase principals that exchanged an assertion,
//! and password accounts registered directly with the server.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::auth::VerifiedIdentity;
use crate::error::AppError;
use crate::models::UserProfile;

/// Provider recorded for password accounts.
pub const PASSWORD_PROVIDER: &str = "email";

struct Account {
    profile: UserProfile,
    /// Argon2 PHC string; `None` for Firebase accounts.
    password_hash: Option<String>,
}

#[derive(Default)]
struct Registry {
    by_uid: HashMap<String, Account>,
    /// Normalized email of password accounts to uid.
    password_emails: HashMap<String, String>,
}

/// In-memory account registry keyed by uid.
#[derive(Default)]
pub struct AccountStore {
    inner: RwLock<Registry>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a Firebase sign-in. The first sign-in of a uid creates its
    /// account; later ones refresh the profile fields and `last_login_at`.
    pub async fn record_login(&self, identity: &VerifiedIdentity) -> UserProfile {
        let now = Utc::now();
        let mut registry = self.inner.write().await;
        let account = registry
            .by_uid
            .entry(identity.uid.clone())
            .and_modify(|account| {
                let profile = &mut account.profile;
                profile.email = identity.email.clone();
                if identity.name.is_some() {
                    profile.display_name = identity.name.clone();
                }
                profile.auth_provider = identity.sign_in_provider.clone();
                profile.last_login_at = now;
            })
            .or_insert_with(|| {
                info!(uid = %identity.uid, provider = %identity.sign_in_provider, "created account");
                Account {
                    profile: UserProfile {
                        uid: identity.uid.clone(),
                        email: identity.email.clone(),
                        display_name: identity.name.clone(),
                        auth_provider: identity.sign_in_provider.clone(),
                        created_at: now,
                        last_login_at: now,
                    },
                    password_hash: None,
                }
            });
        account.profile.clone()
    }

    /// Creates a password account. Fails when `email` already has one.
    pub async fn register_password(
        &self,
        email: &str,
        display_name: Option<String>,
        password_hash: String,
    ) -> Result<UserProfile, AppError> {
        let key = normalize_email(email);
        let mut registry = self.inner.write().await;
        if registry.password_emails.contains_key(&key) {
            return Err(AppError::invalid_request(
                "email already registered",
                Some("email"),
                Some("email_taken"),
            ));
        }

        let now = Utc::now();
        let profile = UserProfile {
            uid: Uuid::new_v4().to_string(),
            email: Some(key.clone()),
            display_name,
            auth_provider: PASSWORD_PROVIDER.to_string(),
            created_at: now,
            last_login_at: now,
        };
        registry.password_emails.insert(key, profile.uid.clone());
        registry.by_uid.insert(
            profile.uid.clone(),
            Account {
                profile: profile.clone(),
                password_hash: Some(password_hash),
            },
        );
        info!(uid = %profile.uid, provider = PASSWORD_PROVIDER, "created account");
        Ok(profile)
    }

    /// Returns the uid and stored hash of the password account for `email`.
    pub async fn password_credentials(&self, email: &str) -> Option<(String, String)> {
        let registry = self.inner.read().await;
        let uid = registry.password_emails.get(&normalize_email(email))?;
        let hash = registry.by_uid.get(uid)?.password_hash.clone()?;
        Some((uid.clone(), hash))
    }

    /// Stamps `last_login_at` after a successful password check.
    pub async fn touch_login(&self, uid: &str) -> Option<UserProfile> {
        let mut registry = self.inner.write().await;
        let account = registry.by_uid.get_mut(uid)?;
        account.profile.last_login_at = Utc::now();
        Some(account.profile.clone())
    }

    pub async fn get(&self, uid: &str) -> Option<UserProfile> {
        self.inner
            .read()
            .await
            .by_uid
            .get(uid)
            .map(|account| account.profile.clone())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{AccountStore, PASSWORD_PROVIDER};
    use crate::auth::VerifiedIdentity;
    use crate::error::AppError;

    fn identity(name: Option<&str>) -> VerifiedIdentity {
        VerifiedIdentity {
            uid: "uid-1".to_string(),
            email: Some("asha@example.com".to_string()),
            name: name.map(str::to_string),
            email_verified: true,
            sign_in_provider: "google.com".to_string(),
        }
    }

    #[tokio::test]
    async fn first_login_creates_later_logins_update() {
        let store = AccountStore::new();
        assert!(store.get("uid-1").await.is_none());

        let created = store.record_login(&identity(Some("Asha"))).await;
        assert_eq!(created.created_at, created.last_login_at);
        assert_eq!(created.display_name.as_deref(), Some("Asha"));

        let updated = store.record_login(&identity(None)).await;
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.last_login_at >= created.last_login_at);
        assert_eq!(updated.display_name.as_deref(), Some("Asha"));
        assert_eq!(store.get("uid-1").await.unwrap().auth_provider, "google.com");
        assert!(store.password_credentials("asha@example.com").await.is_none());
    }

    #[tokio::test]
    async fn password_accounts_are_unique_by_email() {
        let store = AccountStore::new();
        let profile = store
            .register_password(" Ravi@Example.com ", None, "$argon2id$fake".to_string())
            .await
            .unwrap();
        assert_eq!(profile.email.as_deref(), Some("ravi@example.com"));
        assert_eq!(profile.auth_provider, PASSWORD_PROVIDER);

        let err = store
            .register_password("ravi@example.com", None, "$argon2id$other".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { ref code, .. } if code.as_deref() == Some("email_taken")));

        let (uid, hash) = store.password_credentials("RAVI@example.com").await.unwrap();
        assert_eq!(uid, profile.uid);
        assert_eq!(hash, "$argon2id$fake");

        let touched = store.touch_login(&uid).await.unwrap();
        assert!(touched.last_login_at >= profile.last_login_at);
        assert!(store.touch_login("missing").await.is_none());
    }
}
