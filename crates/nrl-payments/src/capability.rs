use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use nrl_types::AccountId;

use crate::config::PaymentConfig;
use crate::error::{PaymentError, PaymentResult};

/// Who is calling, as vouched for by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account: AccountId,
    pub display_name: String,
}

impl Identity {
    pub fn new(account: AccountId, display_name: impl Into<String>) -> Self {
        Self {
            account,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.account)
    }
}

/// Proof that the holder passed [`AdminGate::authorize`].
///
/// Cannot be constructed outside this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCapability {
    admin: AccountId,
}

impl AdminCapability {
    pub fn admin(&self) -> &AccountId {
        &self.admin
    }
}

/// Issues [`AdminCapability`]s to configured administrators.
#[derive(Clone, Debug, Default)]
pub struct AdminGate {
    admins: BTreeSet<AccountId>,
}

impl AdminGate {
    pub fn new(admins: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(config.admin_accounts.iter().cloned())
    }

    pub fn is_admin(&self, account: &AccountId) -> bool {
        self.admins.contains(account)
    }

    pub fn authorize(&self, identity: &Identity) -> PaymentResult<AdminCapability> {
        if !self.is_admin(&identity.account) {
            warn!(identity = %identity, "payment admin access denied");
            return Err(PaymentError::CapabilityDenied {
                account: identity.account.clone(),
            });
        }
        Ok(AdminCapability {
            admin: identity.account.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn who(id: &str) -> Identity {
        Identity::new(AccountId::new(id).unwrap(), id.to_uppercase())
    }

    #[test]
    fn configured_admin_is_authorized() {
        let gate = AdminGate::new([AccountId::new("root").unwrap()]);
        let cap = gate.authorize(&who("root")).unwrap();
        assert_eq!(cap.admin().as_str(), "root");
    }

    #[test]
    fn everyone_else_is_denied() {
        let gate = AdminGate::new([AccountId::new("root").unwrap()]);
        let err = gate.authorize(&who("mallory")).unwrap_err();
        assert_eq!(
            err,
            PaymentError::CapabilityDenied {
                account: AccountId::new("mallory").unwrap()
            }
        );
    }

    #[test]
    fn empty_gate_denies_all() {
        assert!(AdminGate::default().authorize(&who("root")).is_err());
    }

    #[test]
    fn identity_display() {
        assert_eq!(who("bob").to_string(), "BOB (bob)");
    }
}
