use serde::{Deserialize, Serialize};

use nrl_types::AccountId;

use crate::error::{PaymentError, PaymentResult};

/// Payment queue parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Shortest accepted UPI id (which must also contain `@`).
    pub min_upi_len: usize,
    /// Shortest accepted deposit transaction reference (UTR).
    pub min_reference_len: usize,
    /// Accounts allowed to approve and reject requests.
    pub admin_accounts: Vec<AccountId>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            min_upi_len: 5,
            min_reference_len: 6,
            admin_accounts: Vec::new(),
        }
    }
}

impl PaymentConfig {
    /// Trim and check a UPI id such as `user@bank`.
    pub fn check_upi(&self, upi: &str) -> PaymentResult<String> {
        let upi = upi.trim();
        if !upi.contains('@') {
            return Err(PaymentError::InvalidReference {
                field: "UPI id",
                reason: format!("{upi:?} must look like user@bank"),
            });
        }
        if upi.chars().count() < self.min_upi_len {
            return Err(PaymentError::InvalidReference {
                field: "UPI id",
                reason: format!("{upi:?} is shorter than {} characters", self.min_upi_len),
            });
        }
        Ok(upi.to_string())
    }

    /// Trim and check a transaction reference.
    pub fn check_transaction_ref(&self, reference: &str) -> PaymentResult<String> {
        let reference = reference.trim();
        if reference.chars().count() < self.min_reference_len {
            return Err(PaymentError::InvalidReference {
                field: "transaction reference",
                reason: format!(
                    "{reference:?} is shorter than {} characters",
                    self.min_reference_len
                ),
            });
        }
        Ok(reference.to_string())
    }
}
