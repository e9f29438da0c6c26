//! Compiler error types.

use thiserror::Error;

/// Errors raised while compiling an expression tree into SQL.
///
/// Every error is raised synchronously at the point of detection; a failed
/// clause never leaves a partial statement behind.
#[derive(Debug, Error)]
pub enum Error {
    /// The expression shape has no SQL translation.
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// The method is not translatable by the active dialect.
    #[error("method '{method}' is not supported by the {dialect} dialect")]
    UnsupportedMethod {
        /// The method name as written at the call site.
        method: String,
        /// The active dialect name.
        dialect: &'static str,
    },

    /// An entity-typed member was used without registering its navigation.
    #[error("navigation '{path}' is not included; register it with include/include_many before use")]
    NavigationNotIncluded {
        /// The full dotted navigation path.
        path: String,
    },

    /// No entity map is registered under this name.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// The member does not exist on the entity map.
    #[error("unknown member '{member}' on entity '{entity}'")]
    UnknownMember {
        /// The owning entity.
        entity: String,
        /// The missing member.
        member: String,
    },

    /// The member is not a navigation.
    #[error("member '{member}' on entity '{entity}' is not a navigation")]
    NotANavigation {
        /// The owning entity.
        entity: String,
        /// The non-navigation member.
        member: String,
    },

    /// The operation requires a single-column key.
    #[error("entity '{entity}' has a composite key; one-to-many fetches require a single key column")]
    CompositeKey {
        /// The offending entity.
        entity: String,
    },

    /// A nullable member was used as a bare boolean condition.
    #[error("nullable member '{member}' cannot stand alone as a condition; compare it or test is_some()")]
    NullableCondition {
        /// The offending member.
        member: String,
    },

    /// A builder operation arrived in the wrong statement state.
    #[error("invalid builder state: {0}")]
    InvalidState(String),

    /// A row cursor failed or was read out of range.
    #[error("cursor error: {0}")]
    Cursor(String),
}

impl Error {
    /// Create an unsupported-expression error.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Error::UnsupportedExpression(detail.into())
    }

    /// Create an unknown-member error.
    pub fn unknown_member(entity: &str, member: &str) -> Self {
        Error::UnknownMember {
            entity: entity.to_string(),
            member: member.to_string(),
        }
    }

    /// Create a not-included navigation error for a dotted path.
    pub fn not_included(path: impl Into<String>) -> Self {
        Error::NavigationNotIncluded { path: path.into() }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Error::InvalidState(detail.into())
    }

    /// Create a cursor error.
    pub fn cursor(detail: impl Into<String>) -> Self {
        Error::Cursor(detail.into())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
