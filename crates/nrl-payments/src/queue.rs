use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use nrl_ledger::{BalanceLedger, LedgerError};
use nrl_store::{KvStore, KvStoreExt, Mutation, RetryPolicy, TxnOutcome};
use nrl_types::{AccountId, Coins, RequestId, Timestamp};

use crate::capability::AdminCapability;
use crate::config::PaymentConfig;
use crate::error::{PaymentError, PaymentResult};
use crate::request::{key_for, prefix_for, ExternalRef, PaymentKind, PaymentRequest, PaymentStatus};

/// Result of approving or rejecting a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The request was resolved by this call.
    Resolved {
        request: PaymentRequest,
        /// Account balance after the ledger effect, if there was one.
        balance: Option<Coins>,
    },
    /// No pending request with that id; someone else resolved it first.
    NotFound { id: RequestId },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// Durable queue of pending deposit and withdrawal requests.
pub struct PaymentQueue<S> {
    ledger: BalanceLedger<S>,
    config: PaymentConfig,
    retry: RetryPolicy,
}

impl<S: KvStore> PaymentQueue<S> {
    pub fn new(ledger: BalanceLedger<S>, config: PaymentConfig) -> Self {
        let retry = ledger.config().retry;
        Self {
            ledger,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    pub fn ledger(&self) -> &BalanceLedger<S> {
        &self.ledger
    }

    fn store(&self) -> &S {
        self.ledger.store()
    }

    /// File a deposit the user says they have paid.
    ///
    /// Nothing is credited until an admin approves.
    pub fn submit_deposit(
        &self,
        account: &AccountId,
        amount: Coins,
        payer_upi: &str,
        transaction_ref: &str,
        now: Timestamp,
    ) -> PaymentResult<PaymentRequest> {
        require_positive(amount)?;
        let reference = ExternalRef::Deposit {
            payer_upi: self.config.check_upi(payer_upi)?,
            transaction_ref: self.config.check_transaction_ref(transaction_ref)?,
        };
        let holder = self.ledger.account(account)?;
        let request = new_request(account, holder.display_name, PaymentKind::Deposit, amount, reference, now);

        self.store().put_as(&request.key(), &request)?;
        self.ledger.set_pending_flag(account, PaymentKind::Deposit, true)?;
        info!(account = %account, amount, request = %request.id.short_id(), "deposit requested");
        Ok(request)
    }

    /// File a withdrawal, debiting the amount immediately.
    ///
    /// Fails with insufficient funds before anything is queued. If the
    /// request cannot be stored after the debit, the amount is credited
    /// back and the store error is returned. If that credit fails too, both
    /// errors come back as [`PaymentError::RefundFailed`] and the amount
    /// stays debited with no request behind it.
    pub fn submit_withdrawal(
        &self,
        account: &AccountId,
        amount: Coins,
        payout_upi: &str,
        now: Timestamp,
    ) -> PaymentResult<PaymentRequest> {
        require_positive(amount)?;
        let reference = ExternalRef::Withdrawal {
            payout_upi: self.config.check_upi(payout_upi)?,
        };
        let holder = self.ledger.account(account)?;
        let request = new_request(account, holder.display_name, PaymentKind::Withdrawal, amount, reference, now);

        let balance = self.ledger.debit(account, amount)?;
        if let Err(queue) = self.store().put_as(&request.key(), &request) {
            warn!(account = %account, amount, error = %queue, "withdrawal not queued, refunding");
            if let Err(refund) = self.ledger.credit(account, amount) {
                error!(account = %account, amount, %queue, %refund, "withdrawal refund failed, funds held");
                return Err(PaymentError::RefundFailed {
                    account: account.clone(),
                    amount,
                    queue,
                    refund,
                });
            }
            return Err(queue.into());
        }
        self.ledger.set_pending_flag(account, PaymentKind::Withdrawal, true)?;
        info!(account = %account, amount, balance, request = %request.id.short_id(), "withdrawal requested");
        Ok(request)
    }

    /// Credit the deposit and drop the request.
    pub fn approve_deposit(&self, cap: &AdminCapability, id: &RequestId) -> PaymentResult<Resolution> {
        self.resolve(cap, PaymentKind::Deposit, id, PaymentStatus::Approved)
    }

    /// Confirm a paid-out withdrawal and drop the request. The money left
    /// the balance at submission.
    pub fn approve_withdrawal(&self, cap: &AdminCapability, id: &RequestId) -> PaymentResult<Resolution> {
        self.resolve(cap, PaymentKind::Withdrawal, id, PaymentStatus::Approved)
    }

    /// Drop a request; a withdrawal's amount is credited back.
    pub fn reject(&self, cap: &AdminCapability, id: &RequestId) -> PaymentResult<Resolution> {
        let kind = match self.find(id)? {
            Some(request) => request.kind,
            None => {
                warn!(request = %id, "reject: no such pending request");
                return Ok(Resolution::NotFound { id: *id });
            }
        };
        self.resolve(cap, kind, id, PaymentStatus::Rejected)
    }

    /// Claim, apply, remove.
    ///
    /// The claim is a conditional `Pending → status` change, so of several
    /// admins racing on one request exactly one proceeds. If the ledger
    /// step fails the claim is released again.
    fn resolve(
        &self,
        cap: &AdminCapability,
        kind: PaymentKind,
        id: &RequestId,
        status: PaymentStatus,
    ) -> PaymentResult<Resolution> {
        let key = key_for(kind, id);
        let out = self
            .store()
            .transact(&key, self.retry, |cur: Option<PaymentRequest>| match cur {
                Some(mut request) if request.is_pending() => {
                    request.status = status;
                    Mutation::Set(request)
                }
                _ => Mutation::Abort,
            })?;
        let TxnOutcome::Committed { value: Some(request), .. } = out else {
            warn!(request = %id, %kind, "no such pending request");
            return Ok(Resolution::NotFound { id: *id });
        };

        let effect = match (kind, status) {
            (PaymentKind::Deposit, PaymentStatus::Approved)
            | (PaymentKind::Withdrawal, PaymentStatus::Rejected) => {
                self.ledger.credit(&request.account, request.amount).map(Some)
            }
            _ => Ok(None),
        };
        let balance = match effect {
            Ok(balance) => balance,
            Err(e) => {
                self.release_claim(&key, status);
                return Err(e.into());
            }
        };

        self.store().delete(&key)?;
        self.clear_flag_if_idle(&request.account, kind)?;
        info!(
            admin = %cap.admin(),
            account = %request.account,
            %kind,
            %status,
            amount = request.amount,
            request = %id.short_id(),
            "payment resolved"
        );
        Ok(Resolution::Resolved { request, balance })
    }

    fn release_claim(&self, key: &str, claimed: PaymentStatus) {
        let released = self
            .store()
            .transact(key, self.retry, |cur: Option<PaymentRequest>| match cur {
                Some(mut request) if request.status == claimed => {
                    request.status = PaymentStatus::Pending;
                    Mutation::Set(request)
                }
                _ => Mutation::Abort,
            });
        if let Err(e) = released {
            warn!(key, error = %e, "could not release payment claim");
        }
    }

    fn clear_flag_if_idle(&self, account: &AccountId, kind: PaymentKind) -> PaymentResult<()> {
        let others = self
            .store()
            .list_as::<PaymentRequest>(prefix_for(kind))?
            .into_iter()
            .any(|(_, r)| &r.account == account);
        if !others {
            match self.ledger.set_pending_flag(account, kind, false) {
                Ok(()) | Err(LedgerError::AccountNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// A request by id, of either kind, whatever its status.
    pub fn find(&self, id: &RequestId) -> PaymentResult<Option<PaymentRequest>> {
        for kind in [PaymentKind::Deposit, PaymentKind::Withdrawal] {
            if let Some(request) = self.store().get_as::<PaymentRequest>(&key_for(kind, id))? {
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    /// Pending requests of one kind, oldest first, for the admin.
    pub fn pending(&self, _cap: &AdminCapability, kind: PaymentKind) -> PaymentResult<Vec<PaymentRequest>> {
        let mut requests = self.list(kind)?;
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    /// One account's pending requests of both kinds, newest first.
    pub fn pending_for(&self, account: &AccountId) -> PaymentResult<Vec<PaymentRequest>> {
        let mut requests: Vec<PaymentRequest> = [PaymentKind::Deposit, PaymentKind::Withdrawal]
            .into_iter()
            .map(|kind| self.list(kind))
            .collect::<PaymentResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .filter(|r| &r.account == account)
            .collect();
        requests.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id)));
        Ok(requests)
    }

    fn list(&self, kind: PaymentKind) -> PaymentResult<Vec<PaymentRequest>> {
        Ok(self
            .store()
            .list_as::<PaymentRequest>(prefix_for(kind))?
            .into_iter()
            .map(|(_, r)| r)
            .filter(PaymentRequest::is_pending)
            .collect())
    }
}

fn require_positive(amount: Coins) -> PaymentResult<()> {
    if amount == 0 {
        return Err(PaymentError::InvalidAmount("amount must be positive".into()));
    }
    Ok(())
}

fn new_request(
    account: &AccountId,
    display_name: String,
    kind: PaymentKind,
    amount: Coins,
    reference: ExternalRef,
    now: Timestamp,
) -> PaymentRequest {
    PaymentRequest {
        id: RequestId::new(),
        account: account.clone(),
        display_name,
        kind,
        amount,
        status: PaymentStatus::Pending,
        reference,
        created_at: now,
    }
}
