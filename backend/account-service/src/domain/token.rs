use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Token length (alphanumeric characters)
pub const TOKEN_LENGTH: usize = 32;

/// What a pending verification key unlocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    NewAccount,
    PasswordReset,
    EmailChange,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::NewAccount => "new_account",
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::EmailChange => "email_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_account" => Some(TokenPurpose::NewAccount),
            "password_reset" => Some(TokenPurpose::PasswordReset),
            "email_change" => Some(TokenPurpose::EmailChange),
            _ => None,
        }
    }
}

/// Single-use key held in the account's one token slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    pub value: String,
    pub purpose: TokenPurpose,
    pub issued_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn issue(purpose: TokenPurpose, now: DateTime<Utc>) -> Self {
        Self {
            value: generate_token(),
            purpose,
            issued_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        now - self.issued_at > lifetime
    }
}

/// Why a presented key was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    AccountClosed,
    Missing,
    Mismatch,
    WrongPurpose,
    Expired,
}

/// Generate a secure random token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
