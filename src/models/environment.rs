//! Target environment and bootstrap resources.

use std::fmt;

/// Default name of the bootstrap stack.
pub const DEFAULT_BOOTSTRAP_STACK_NAME: &str = "CDKToolkit";

/// An account/region pair to collect garbage in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Environment {
    /// Display name of the environment.
    pub name: String,
    /// Account id.
    pub account: String,
    /// Region.
    pub region: String,
}

impl Environment {
    /// Creates a new environment.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aws://{}/{}", self.account, self.region)
    }
}

/// Resources provisioned by the bootstrap stack of an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapInfo {
    /// Bucket holding file assets.
    pub bucket_name: String,
    /// Repository holding image assets.
    pub repository_name: String,
    /// Bootstrap qualifier, when the stack declares one.
    pub qualifier: Option<String>,
}

impl BootstrapInfo {
    /// Creates bootstrap info.
    #[must_use]
    pub fn new(
        bucket_name: impl Into<String>,
        repository_name: impl Into<String>,
        qualifier: Option<String>,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            repository_name: repository_name.into(),
            qualifier,
        }
    }
}
