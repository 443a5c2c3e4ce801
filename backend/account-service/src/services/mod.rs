/// Business logic services
pub mod accounts;
pub mod email;
pub mod notification;

pub use accounts::AccountService;
pub use email::EmailNotifier;
pub use notification::{NoopNotifier, NotificationGateway};
