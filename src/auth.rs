//! User accounts, password hashing and session token generation.

use crate::error::{DbError, DbResult};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static USERNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]{1}([_]{0,1}[a-zA-Z0-9]{1,})+$").expect("valid username regex")
});

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub active: bool,
    pub databases: Vec<String>,
    pub root: bool,
}

impl User {
    pub fn can_access(&self, db: &str) -> bool {
        self.root || self.databases.iter().any(|name| name == db)
    }
}

/// Account store consulted by the engine.
pub trait Authentication: Send + Sync {
    /// True only for an active user whose password matches.
    fn authenticate(&self, username: &str, password: &str) -> bool;
    fn new_user(&self, username: &str, password: &str, root: bool) -> DbResult<()>;
    fn user_info(&self, username: &str) -> DbResult<User>;
    fn list_users(&self, regex: &Regex) -> DbResult<Vec<String>>;
    fn remove_user(&self, username: &str) -> DbResult<()>;
    fn change_password(&self, username: &str, password: &str) -> DbResult<()>;
    fn change_status(&self, username: &str, active: bool) -> DbResult<()>;
    fn change_db_access(&self, username: &str, db: &str, grant: bool) -> DbResult<()>;
    fn has_db_access(&self, username: &str, db: &str) -> bool;
    fn clear_all(&self) -> DbResult<()>;
}

pub fn check_username(username: &str) -> DbResult<()> {
    if username == "guest" {
        return Err(DbError::validation("username guest already taken"));
    }
    if USERNAME.is_match(username) {
        Ok(())
    } else {
        Err(DbError::validation("username isn't valid."))
    }
}

pub fn check_password(password: &str) -> DbResult<()> {
    if password.chars().any(char::is_whitespace) {
        return Err(DbError::validation("password cannot contain whitespace"));
    }
    if password.len() < 8 {
        return Err(DbError::validation("password must be at least 8 chars"));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::backend(format!("Hashing error: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Hex encoding of 16 random bytes; used for session tokens and upload tickets.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Stored account: the public view plus its argon2 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user: User,
    pub password_hash: String,
}

fn user_missing(username: &str) -> DbError {
    DbError::not_found(format!("user {} doesn't exist", username))
}

/// Persistence seam for accounts. Every type implementing it is an
/// [`Authentication`] backend.
pub trait AccountStore: Send + Sync {
    fn account(&self, username: &str) -> DbResult<Option<Account>>;
    /// Stores a new account; `false` when the name is already taken.
    fn insert_account(&self, account: Account) -> DbResult<bool>;
    /// Applies `change` atomically; `false` when the account doesn't exist.
    fn modify_account(
        &self,
        username: &str,
        change: &mut dyn FnMut(&mut Account),
    ) -> DbResult<bool>;
    fn remove_account(&self, username: &str) -> DbResult<bool>;
    /// Every username, sorted.
    fn account_names(&self) -> DbResult<Vec<String>>;
    fn clear_accounts(&self) -> DbResult<()>;
}

fn modify_existing(
    store: &(impl AccountStore + ?Sized),
    username: &str,
    mut change: impl FnMut(&mut Account),
) -> DbResult<()> {
    if store.modify_account(username, &mut change)? {
        Ok(())
    } else {
        Err(user_missing(username))
    }
}

impl<S: AccountStore + ?Sized> Authentication for S {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        // Verify outside any store lock; argon2 is slow.
        match self.account(username) {
            Ok(Some(account)) if account.user.active => {
                verify_password(password, &account.password_hash)
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Account lookup for {} failed: {}", username, e);
                false
            }
        }
    }

    fn new_user(&self, username: &str, password: &str, root: bool) -> DbResult<()> {
        let username = username.to_lowercase();
        check_username(&username)?;
        check_password(password)?;
        let taken = || DbError::validation(format!("user {} already exists", username));
        if self.account(&username)?.is_some() {
            return Err(taken());
        }

        let account = Account {
            user: User {
                username: username.clone(),
                active: true,
                databases: Vec::new(),
                root,
            },
            password_hash: hash_password(password)?,
        };
        if self.insert_account(account)? {
            Ok(())
        } else {
            Err(taken())
        }
    }

    fn user_info(&self, username: &str) -> DbResult<User> {
        self.account(username)?
            .map(|account| account.user)
            .ok_or_else(|| DbError::not_found(format!("couldn't get info for user {}", username)))
    }

    fn list_users(&self, regex: &Regex) -> DbResult<Vec<String>> {
        Ok(self
            .account_names()?
            .into_iter()
            .filter(|name| regex.is_match(name))
            .collect())
    }

    fn remove_user(&self, username: &str) -> DbResult<()> {
        if self.remove_account(username)? {
            Ok(())
        } else {
            Err(user_missing(username))
        }
    }

    fn change_password(&self, username: &str, password: &str) -> DbResult<()> {
        check_password(password)?;
        let password_hash = hash_password(password)?;
        modify_existing(self, username, |account| {
            account.password_hash = password_hash.clone()
        })
    }

    fn change_status(&self, username: &str, active: bool) -> DbResult<()> {
        modify_existing(self, username, |account| account.user.active = active)
    }

    fn change_db_access(&self, username: &str, db: &str, grant: bool) -> DbResult<()> {
        modify_existing(self, username, |account| {
            let databases = &mut account.user.databases;
            if grant {
                if !databases.iter().any(|name| name == db) {
                    databases.push(db.to_string());
                }
            } else {
                databases.retain(|name| name != db);
            }
        })
    }

    fn has_db_access(&self, username: &str, db: &str) -> bool {
        matches!(
            self.account(username),
            Ok(Some(account)) if account.user.databases.iter().any(|name| name == db)
        )
    }

    fn clear_all(&self) -> DbResult<()> {
        self.clear_accounts()
    }
}

/// In-process account store.
#[derive(Debug, Default)]
pub struct MemoryAuth {
    accounts: RwLock<BTreeMap<String, Account>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAuth {
    fn account(&self, username: &str) -> DbResult<Option<Account>> {
        Ok(self.accounts.read().get(username).cloned())
    }

    fn insert_account(&self, account: Account) -> DbResult<bool> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.user.username) {
            return Ok(false);
        }
        accounts.insert(account.user.username.clone(), account);
        Ok(true)
    }

    fn modify_account(
        &self,
        username: &str,
        change: &mut dyn FnMut(&mut Account),
    ) -> DbResult<bool> {
        Ok(self.accounts.write().get_mut(username).map(change).is_some())
    }

    fn remove_account(&self, username: &str) -> DbResult<bool> {
        Ok(self.accounts.write().remove(username).is_some())
    }

    fn account_names(&self) -> DbResult<Vec<String>> {
        Ok(self.accounts.read().keys().cloned().collect())
    }

    fn clear_accounts(&self) -> DbResult<()> {
        self.accounts.write().clear();
        Ok(())
    }
}
