/// Security module for account credentials
///
/// - **password**: Argon2id password hashing behind the `PasswordHasher` trait
/// - **policy**: pluggable password strength rules
pub mod password;
pub mod policy;

pub use password::{Argon2Hasher, PasswordHasher};
pub use policy::{PasswordPolicy, StrengthPolicy};
