pub mod account;
pub mod token;

// Re-export commonly used types
pub use account::{
    deletion_disposition, Account, AuthOutcome, Disposition, LifecycleStage, LockoutPolicy,
};
pub use token::{TokenPurpose, TokenRejection, VerificationToken};
