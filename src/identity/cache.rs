//! Token cache with session or local scope.
//!
//! Session scope keeps everything in memory for the life of the process.
//! Local scope additionally writes the cache to a JSON file after every change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::oauth::OIDC_SCOPES;
use super::secure::SecureString;
use super::Account;
use crate::error::StoreError;

/// Access tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 300;

/// Resource prefix Azure AD may put in front of Graph scopes.
const GRAPH_RESOURCE_PREFIX: &str = "https://graph.microsoft.com/";

/// A cached access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAccessToken {
    pub secret: SecureString,
    pub scopes: Vec<String>,
    pub expires_on: DateTime<Utc>,
}

impl CachedAccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(EXPIRY_SKEW_SECONDS) > now
    }

    /// True if every requested resource scope was granted to this token.
    fn covers(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .filter(|s| !is_oidc_scope(s))
            .all(|wanted| {
                self.scopes
                    .iter()
                    .any(|have| normalize_scope(have) == normalize_scope(wanted))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    account: Account,
    refresh_token: Option<SecureString>,
    #[serde(default)]
    access_tokens: Vec<CachedAccessToken>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

/// Token cache shared by one identity client.
#[derive(Debug)]
pub struct TokenCache {
    data: Mutex<CacheData>,
    persist_path: Option<PathBuf>,
}

impl TokenCache {
    /// Create an in-memory cache.
    pub fn session() -> Self {
        Self {
            data: Mutex::new(CacheData::default()),
            persist_path: None,
        }
    }

    /// Create a cache backed by `path`. A missing or corrupt file starts empty.
    pub fn local(path: PathBuf) -> Self {
        let data = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Discarding unreadable token cache {:?}: {}", path, e);
                CacheData::default()
            }),
            Err(_) => {
                debug!("No token cache at {:?}, starting empty", path);
                CacheData::default()
            }
        };

        Self {
            data: Mutex::new(data),
            persist_path: Some(path),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accounts in the order they first signed in.
    pub fn accounts(&self) -> Vec<Account> {
        self.lock().entries.iter().map(|e| e.account.clone()).collect()
    }

    /// Find a fresh access token for `home_account_id` covering `scopes`.
    pub fn find_access_token(
        &self,
        home_account_id: &str,
        scopes: &[String],
    ) -> Option<CachedAccessToken> {
        let now = Utc::now();
        self.lock()
            .entries
            .iter()
            .find(|e| e.account.home_account_id == home_account_id)?
            .access_tokens
            .iter()
            .find(|t| t.is_fresh(now) && t.covers(scopes))
            .cloned()
    }

    pub fn refresh_token(&self, home_account_id: &str) -> Option<SecureString> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.account.home_account_id == home_account_id)
            .and_then(|e| e.refresh_token.clone())
    }

    /// Insert or update the entry for `account`.
    ///
    /// A `None` refresh token keeps the previous one. Expired access tokens
    /// and tokens with the same scope set are replaced.
    pub fn save(
        &self,
        account: Account,
        refresh_token: Option<SecureString>,
        access_token: CachedAccessToken,
    ) {
        {
            let mut data = self.lock();
            let now = Utc::now();

            let index = match data
                .entries
                .iter()
                .position(|e| e.account.home_account_id == account.home_account_id)
            {
                Some(i) => i,
                None => {
                    data.entries.push(CacheEntry {
                        account: account.clone(),
                        refresh_token: None,
                        access_tokens: Vec::new(),
                    });
                    data.entries.len() - 1
                }
            };

            let entry = &mut data.entries[index];
            entry.account = account;
            if refresh_token.is_some() {
                entry.refresh_token = refresh_token;
            }
            entry
                .access_tokens
                .retain(|t| t.is_fresh(now) && !same_scopes(&t.scopes, &access_token.scopes));
            entry.access_tokens.push(access_token);
        }

        self.persist();
    }

    /// Remove an account and all of its tokens.
    pub fn remove_account(&self, home_account_id: &str) {
        self.lock()
            .entries
            .retain(|e| e.account.home_account_id != home_account_id);
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };

        if let Err(e) = self.write_to(path) {
            error!("Failed to persist token cache to {:?}: {}", path, e);
        }
    }

    fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(&*self.lock())?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn is_oidc_scope(scope: &str) -> bool {
    OIDC_SCOPES.iter().any(|s| s.eq_ignore_ascii_case(scope)) || scope.eq_ignore_ascii_case("email")
}

fn normalize_scope(scope: &str) -> String {
    let lower = scope.to_ascii_lowercase();
    lower
        .strip_prefix(GRAPH_RESOURCE_PREFIX)
        .map(str::to_string)
        .unwrap_or(lower)
}

fn same_scopes(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<String> = a.iter().map(|s| normalize_scope(s)).collect();
    let mut b: Vec<String> = b.iter().map(|s| normalize_scope(s)).collect();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account {
            home_account_id: id.into(),
            name: Some("Test User".into()),
            username: format!("{}@contoso.com", id),
        }
    }

    fn token(secret: &str, scopes: &[&str], expires_in_minutes: i64) -> CachedAccessToken {
        CachedAccessToken {
            secret: SecureString::new(secret.into()),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_on: Utc::now() + Duration::minutes(expires_in_minutes),
        }
    }

    #[test]
    fn test_cache_empty() {
        let cache = TokenCache::session();
        assert!(cache.accounts().is_empty());
        assert!(cache.find_access_token("a", &["User.Read".into()]).is_none());
        assert!(cache.refresh_token("a").is_none());
    }

    #[test]
    fn test_cache_scope_matching() {
        let cache = TokenCache::session();
        cache.save(
            account("a"),
            Some(SecureString::new("rt".into())),
            token("at", &["https://graph.microsoft.com/User.Read", "openid", "profile"], 60),
        );

        let hit = cache.find_access_token("a", &["user.read".into()]);
        assert_eq!(hit.unwrap().secret.as_str(), "at");

        assert!(cache.find_access_token("a", &["Files.ReadWrite".into()]).is_none());
        assert!(cache.find_access_token("b", &["User.Read".into()]).is_none());
        assert_eq!(cache.refresh_token("a").unwrap().as_str(), "rt");
    }

    #[test]
    fn test_cache_expiry_skew() {
        let cache = TokenCache::session();
        // Expires in 4 minutes, inside the 5 minute skew
        cache.save(account("a"), None, token("at", &["User.Read"], 4));

        assert!(cache.find_access_token("a", &["User.Read".into()]).is_none());
    }

    #[test]
    fn test_cache_keeps_refresh_token_and_order() {
        let cache = TokenCache::session();
        cache.save(account("a"), Some(SecureString::new("rt".into())), token("at1", &["User.Read"], 60));
        cache.save(account("b"), None, token("bt", &["User.Read"], 60));
        cache.save(account("a"), None, token("at2", &["User.Read"], 60));

        assert_eq!(cache.refresh_token("a").unwrap().as_str(), "rt");
        assert_eq!(
            cache.find_access_token("a", &["User.Read".into()]).unwrap().secret.as_str(),
            "at2"
        );

        let ids: Vec<_> = cache.accounts().into_iter().map(|a| a.home_account_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_cache_remove_account() {
        let cache = TokenCache::session();
        cache.save(account("a"), None, token("at", &["User.Read"], 60));

        cache.remove_account("a");

        assert!(cache.accounts().is_empty());
    }

    #[test]
    fn test_local_cache_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("token_cache.json");

        let cache = TokenCache::local(path.clone());
        cache.save(account("a"), Some(SecureString::new("rt".into())), token("at", &["User.Read"], 60));

        let reloaded = TokenCache::local(path);
        assert_eq!(reloaded.accounts(), vec![account("a")]);
        assert_eq!(reloaded.refresh_token("a").unwrap().as_str(), "rt");
    }

    #[test]
    fn test_local_cache_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache.json");
        fs::write(&path, "garbage").unwrap();

        let cache = TokenCache::local(path);
        assert!(cache.accounts().is_empty());
    }
}
