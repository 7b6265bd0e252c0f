//! Credential types
//!
//! Runners hold two kinds of credentials with non-overlapping scopes:
//! a long-lived [`RunnerToken`] that identifies the runner itself, and a
//! per-job [`JobToken`] minted when a job is claimed. Neither converts into
//! the other.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const MAX_TOKEN_LEN: usize = 255;
const JOB_TOKEN_PREFIX: &str = "kjt_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("token is too long (max {MAX_TOKEN_LEN} characters)")]
    TooLong,

    #[error("token contains invalid characters")]
    InvalidCharacters,
}

fn validate(raw: &str) -> Result<(), TokenError> {
    if raw.is_empty() {
        return Err(TokenError::Empty);
    }
    if raw.len() > MAX_TOKEN_LEN {
        return Err(TokenError::TooLong);
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(TokenError::InvalidCharacters);
    }
    Ok(())
}

/// Runner-scoped credential (pre-provisioned)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunnerToken(String);

impl RunnerToken {
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let raw = raw.trim();
        validate(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Job-scoped credential, valid only for the job it was minted for
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobToken(String);

impl JobToken {
    /// Mints a fresh token for a newly claimed job
    pub fn generate() -> Self {
        Self(format!("{}{}", JOB_TOKEN_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let raw = raw.trim();
        validate(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! token_impls {
    ($ty:ident) => {
        impl TryFrom<String> for $ty {
            type Error = TokenError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(token: $ty) -> Self {
                token.0
            }
        }

        // Credentials never show up in logs
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "(***)"))
            }
        }
    };
}

token_impls!(RunnerToken);
token_impls!(JobToken);
