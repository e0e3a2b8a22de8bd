use std::fmt;

use serde::{Deserialize, Serialize};

use nrl_types::{keys, AccountId, Coins, RequestId, Timestamp};

/// Deposit or withdrawal. Shared with the account's pending flags.
pub use nrl_ledger::PendingKind as PaymentKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Approved => write!(f, "Approved"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Reference to the money movement outside the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalRef {
    /// The user paid in from `payer_upi`; `transaction_ref` is the UTR.
    Deposit {
        payer_upi: String,
        transaction_ref: String,
    },
    /// The admin pays out to `payout_upi`.
    Withdrawal { payout_upi: String },
}

/// One deposit or withdrawal request.
///
/// Stored at `payments/deposits/{id}` or `payments/withdrawals/{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: RequestId,
    pub account: AccountId,
    pub display_name: String,
    pub kind: PaymentKind,
    pub amount: Coins,
    pub status: PaymentStatus,
    pub reference: ExternalRef,
    pub created_at: Timestamp,
}

impl PaymentRequest {
    pub fn key(&self) -> String {
        key_for(self.kind, &self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

pub(crate) fn key_for(kind: PaymentKind, id: &RequestId) -> String {
    match kind {
        PaymentKind::Deposit => keys::deposit(id),
        PaymentKind::Withdrawal => keys::withdrawal(id),
    }
}

pub(crate) fn prefix_for(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::Deposit => keys::DEPOSITS_PREFIX,
        PaymentKind::Withdrawal => keys::WITHDRAWALS_PREFIX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_follows_kind() {
        let req = PaymentRequest {
            id: RequestId::new(),
            account: AccountId::new("alice").unwrap(),
            display_name: "Alice".into(),
            kind: PaymentKind::Withdrawal,
            amount: 50,
            status: PaymentStatus::Pending,
            reference: ExternalRef::Withdrawal {
                payout_upi: "alice@bank".into(),
            },
            created_at: Timestamp::from_millis(1),
        };
        assert!(req.key().starts_with(keys::WITHDRAWALS_PREFIX));
        assert!(req.is_pending());

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["reference"]["type"], "withdrawal");
        assert_eq!(json["status"], "Pending");
    }
}
