//! Control-plane and bootstrap lookup traits.

use crate::Result;
use crate::models::{BootstrapInfo, Environment, StackPage, TemplateSummary};
use async_trait::async_trait;

/// Client for the infrastructure control plane.
#[async_trait]
pub trait StackClient: Send + Sync {
    /// Lists one page of stacks, in any status.
    async fn list_stacks(&self, next_token: Option<&str>) -> Result<StackPage>;

    /// Returns the template summary (parameters) of a stack.
    async fn get_template_summary(&self, stack: &str) -> Result<TemplateSummary>;

    /// Returns the deployed template body of a stack.
    async fn get_template(&self, stack: &str) -> Result<String>;
}

/// Resolves the bootstrap resources of an environment.
#[async_trait]
pub trait BootstrapLookup: Send + Sync {
    /// Looks up the bootstrap stack `stack_name` in `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BootstrapNotFound`] if the stack does not exist.
    async fn lookup(&self, environment: &Environment, stack_name: &str) -> Result<BootstrapInfo>;
}
