//! # Dispatcher
//!
//! Rate-limit-aware request dispatcher. A submission is answered from the
//! response cache when possible, rejected when it repeats a request seen
//! within the dedup window, and otherwise queued by priority and executed
//! with the healthiest credential.
//!
//! Pool and queue health changes travel over a channel to the notifier;
//! a periodic maintenance task expires cache entries, resets quota windows
//! and recovers disabled credentials.
//!
//! ## Usage
//!
//! ```ignore
//! let dispatcher = DispatcherBuilder::new(blueprint, transport).build().await?;
//! let served = dispatcher
//!     .submit(RequestDescriptor::get("/rate_limit"), Priority::High)
//!     .await?;
//! dispatcher.shutdown().await;
//! ```

mod alerts;
mod dispatcher;
mod error;
mod maintenance;
mod mock;
mod outcome;

pub use alerts::{alert_for, HealthEvent};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherStatus};
pub use error::{AttemptError, DispatcherError};
pub use maintenance::MaintenanceReport;
pub use mock::{CallRecord, MockConfig, MockTransport, Scripted};
pub use outcome::{ResponseSource, Served, SubmitError, SubmitResult};
