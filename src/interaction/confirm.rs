//! Deletion confirmation.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// An operator's answer to a deletion prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResponse {
    /// Delete this batch.
    Yes,
    /// Delete this batch and every later one without asking again.
    YesToAll,
    /// Abort.
    No,
}

impl ConfirmationResponse {
    /// Parses a typed answer.
    ///
    /// `yes` and `y` confirm, `delete-all` confirms for the rest of the run.
    /// Anything else, including an empty line, is a refusal.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "yes" | "y" => Self::Yes,
            "delete-all" => Self::YesToAll,
            _ => Self::No,
        }
    }

    /// Returns `true` for either confirming answer.
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Yes | Self::YesToAll)
    }
}

/// Asks the operator before a batch is deleted.
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Shows `prompt` and returns the answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be read.
    async fn confirm(&self, prompt: &str) -> Result<ConfirmationResponse>;
}

/// Prompts on stderr and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmation;

#[async_trait]
impl Confirmation for TerminalConfirmation {
    async fn confirm(&self, prompt: &str) -> Result<ConfirmationResponse> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("{prompt} ").as_bytes())
            .await
            .map_err(|e| Error::operation("confirmation_prompt", e))?;
        stderr
            .flush()
            .await
            .map_err(|e| Error::operation("confirmation_prompt", e))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| Error::operation("confirmation_read", e))?;
        Ok(ConfirmationResponse::parse(&line))
    }
}

/// Confirms everything without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> Result<ConfirmationResponse> {
        Ok(ConfirmationResponse::Yes)
    }
}

/// Answers prompts from a fixed list and records them.
///
/// Once the list runs out every further prompt is refused.
#[derive(Debug, Default)]
pub struct ScriptedConfirmation {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    /// Creates a confirmation that gives `answers` in order.
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Confirmation for ScriptedConfirmation {
    async fn confirm(&self, prompt: &str) -> Result<ConfirmationResponse> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        Ok(ConfirmationResponse::parse(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("yes", ConfirmationResponse::Yes)]
    #[test_case("Y", ConfirmationResponse::Yes)]
    #[test_case("  yes\n", ConfirmationResponse::Yes)]
    #[test_case("DELETE-ALL", ConfirmationResponse::YesToAll)]
    #[test_case("no", ConfirmationResponse::No)]
    #[test_case("", ConfirmationResponse::No)]
    #[test_case("sure", ConfirmationResponse::No)]
    fn test_parse(input: &str, expected: ConfirmationResponse) {
        assert_eq!(ConfirmationResponse::parse(input), expected);
    }

    #[tokio::test]
    async fn test_scripted_runs_out_to_no() {
        let confirm = ScriptedConfirmation::new(["y"]);
        assert_eq!(confirm.confirm("first").await.ok(), Some(ConfirmationResponse::Yes));
        assert_eq!(confirm.confirm("second").await.ok(), Some(ConfirmationResponse::No));
        assert_eq!(confirm.prompts(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_auto_confirm() {
        let response = AutoConfirm.confirm("anything").await.ok();
        assert!(response.is_some_and(ConfirmationResponse::is_confirmed));
    }
}
