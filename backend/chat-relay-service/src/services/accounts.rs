use crate::config::Account;
use crate::error::{AppError, AppResult};

/// The fixed set of accounts allowed to log in.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    accounts: Vec<Account>,
}

impl Accounts {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Returns the canonical username on a credential match.
    pub fn verify(&self, username: &str, password: &str) -> AppResult<&str> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AppError::BadRequest(
                "Username and password are required".into(),
            ));
        }
        self.accounts
            .iter()
            .find(|a| a.username == username && a.password == password)
            .map(|a| a.username.as_str())
            .ok_or(AppError::Unauthorized)
    }
}
