//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the dispatcher.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Durations and expiry use `tokio`-compatible monotonic instants inside components
//! - Wall-clock timestamps (`chrono::DateTime<Utc>`) are used only for reporting

mod alert;
mod backoff;
mod blueprint;
mod channel;
mod error;
mod health;
mod priority;
mod request;
mod response;
mod secret;
mod transport;

pub use alert::*;
pub use backoff::BackoffPolicy;
pub use blueprint::*;
pub use channel::{LocalNotificationChannel, NotificationChannel};
pub use error::*;
pub use health::*;
pub use priority::Priority;
pub use request::RequestDescriptor;
pub use response::{ApiResponse, QuotaSnapshot};
pub use secret::SecretHandle;
pub use transport::*;
