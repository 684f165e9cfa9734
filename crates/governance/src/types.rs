//! Value types shared by every registry

use std::collections::BTreeSet;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::{GovernanceError, GovernanceResult};

/// Name of the threshold every unlinked operation falls back to
pub const DEFAULT_THRESHOLD: &str = "default";

/// Authority custodians act with unless told otherwise
pub const DEFAULT_AUTHORITY: &str = "active";

/// An account known to the hosting platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Wrap a non-empty identifier
    pub fn new(id: impl Into<String>) -> GovernanceResult<Self> {
        let id = id.into();
        validate_identifier("account", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = GovernanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AccountId {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// One call the group wants made on its behalf.
///
/// The engine only looks at `target` and `operation` to pick a threshold;
/// the payload travels untouched to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub target: String,
    pub operation: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Operation {
    pub fn new(target: impl Into<String>, operation: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            payload,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.target, self.operation)
    }
}

/// Identities the external authentication layer has verified for one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    signers: BTreeSet<AccountId>,
}

impl AuthContext {
    /// A call signed by a single identity
    pub fn signed_by(account: &AccountId) -> Self {
        Self {
            signers: BTreeSet::from([account.clone()]),
        }
    }

    /// A call signed by several identities
    pub fn from_signers<I: IntoIterator<Item = AccountId>>(signers: I) -> Self {
        Self {
            signers: signers.into_iter().collect(),
        }
    }

    /// A call nobody vouched for
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_signed(&self, account: &AccountId) -> bool {
        self.signers.contains(account)
    }

    /// Fail unless `account` authenticated this call
    pub fn require(&self, account: &AccountId) -> GovernanceResult<()> {
        if self.has_signed(account) {
            Ok(())
        } else {
            Err(GovernanceError::AuthorizationDenied(format!(
                "missing authority of {}",
                account
            )))
        }
    }
}

/// Identifiers must be non-empty and free of whitespace
pub(crate) fn validate_identifier(kind: &str, value: &str) -> GovernanceResult<()> {
    if value.is_empty() {
        return Err(GovernanceError::InvalidInput(format!("{} can't be empty", kind)));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(GovernanceError::InvalidInput(format!(
            "{} '{}' contains whitespace",
            kind, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_validation() {
        assert!(AccountId::new("alice").is_ok());
        assert!(matches!(AccountId::new(""), Err(GovernanceError::InvalidInput(_))));
        assert!(matches!(AccountId::new("al ice"), Err(GovernanceError::InvalidInput(_))));
        let parsed: AccountId = "bob".parse().unwrap();
        assert_eq!(parsed.as_str(), "bob");
    }

    #[test]
    fn test_auth_context_require() {
        let alice = AccountId::new("alice").unwrap();
        let bob = AccountId::new("bob").unwrap();

        let ctx = AuthContext::signed_by(&alice);
        assert!(ctx.require(&alice).is_ok());
        assert!(matches!(ctx.require(&bob), Err(GovernanceError::AuthorizationDenied(_))));
        assert!(AuthContext::anonymous().require(&alice).is_err());

        let both = AuthContext::from_signers([alice.clone(), bob.clone()]);
        assert!(both.require(&alice).is_ok() && both.require(&bob).is_ok());
    }

    #[test]
    fn test_account_id_serializes_as_plain_string() {
        let alice = AccountId::new("alice").unwrap();
        assert_eq!(serde_json::to_string(&alice).unwrap(), "\"alice\"");
        assert!(serde_json::from_str::<AccountId>("\"\"").is_err());
    }
}
