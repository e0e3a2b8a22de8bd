//! Deposit and withdrawal requests for the Number Round Ledger (NRL).
//!
//! Users file requests; administrators approve or reject them. Every
//! request moves `Pending → Approved | Rejected` exactly once and is then
//! removed from the queue.
//!
//! # Money flow
//!
//! - **Deposits** move nothing on submit. Approval credits the amount and
//!   rejection just drops the request.
//! - **Withdrawals** are debited on submit. Approval only confirms
//!   the payout and rejection credits it back.
//!
//! # Trust boundary
//!
//! Resolving a request needs an [`AdminCapability`], which only
//! [`AdminGate::authorize`] hands out, and only to configured admins.

pub mod capability;
pub mod config;
pub mod error;
pub mod queue;
pub mod request;

pub use capability::{AdminCapability, AdminGate, Identity};
pub use config::PaymentConfig;
pub use error::{PaymentError, PaymentResult};
pub use queue::{PaymentQueue, Resolution};
pub use request::{ExternalRef, PaymentKind, PaymentRequest, PaymentStatus};
