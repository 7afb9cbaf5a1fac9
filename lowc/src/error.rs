use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

/// Prefix an error message with context for consistent diagnostics.
pub fn format_with_context(context: impl AsRef<str>, message: impl AsRef<str>) -> String {
    let prefix = context.as_ref();
    let message = message.as_ref();
    if prefix.is_empty() {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}

/// Every way an extraction run can fail. All of them are fatal: the run
/// produces no output files.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("naming collision in `{file}`: `{first}` and `{second}` both flatten to `{flat}`")]
    #[diagnostic(
        code(lowc::naming::collision),
        help("add a bundling rule that separates them or rename one declaration")
    )]
    NamingCollision {
        file: String,
        flat: String,
        first: String,
        second: String,
    },

    #[error("cannot monomorphize `{definition}` (used at {site}): {reason}")]
    #[diagnostic(code(lowc::mono::non_monomorphizable))]
    NonMonomorphizable {
        definition: String,
        site: Span,
        reason: String,
    },

    #[error("type `{ty}` is not representable: {reason}")]
    #[diagnostic(code(lowc::layout::non_representable))]
    NonRepresentableType {
        ty: String,
        reason: String,
        span: Span,
    },

    #[error("internal invariant violated in {pass}: {message}")]
    #[diagnostic(
        code(lowc::internal),
        help("this is a defect in the extraction pipeline, not in the input program")
    )]
    InternalInvariant { pass: &'static str, message: String },

    #[error("invalid option `{input}`: {message}")]
    #[diagnostic(code(lowc::options::invalid))]
    InvalidOption { input: String, message: String },

    #[error("invalid input AST: {message}")]
    #[diagnostic(code(lowc::input::invalid))]
    InvalidInput { message: String },
}

impl ExtractError {
    pub fn internal(pass: &'static str, message: impl Into<String>) -> Self {
        ExtractError::InternalInvariant {
            pass,
            message: message.into(),
        }
    }

    pub fn non_representable(ty: impl ToString, reason: impl Into<String>, span: &Span) -> Self {
        ExtractError::NonRepresentableType {
            ty: ty.to_string(),
            reason: reason.into(),
            span: span.clone(),
        }
    }

    pub fn non_monomorphizable(
        definition: impl ToString,
        reason: impl Into<String>,
        site: &Span,
    ) -> Self {
        ExtractError::NonMonomorphizable {
            definition: definition.to_string(),
            site: site.clone(),
            reason: reason.into(),
        }
    }

    pub fn invalid_option(input: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::InvalidOption {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Pipeline defects, as opposed to problems with the input program or
    /// the configuration.
    pub fn is_internal(&self) -> bool {
        matches!(self, ExtractError::InternalInvariant { .. })
    }

    pub fn with_context(self, context: impl AsRef<str>) -> Self {
        match self {
            ExtractError::InternalInvariant { pass, message } => ExtractError::InternalInvariant {
                pass,
                message: format_with_context(context, message),
            },
            ExtractError::NonRepresentableType { ty, reason, span } => {
                ExtractError::NonRepresentableType {
                    ty,
                    reason: format_with_context(context, reason),
                    span,
                }
            }
            other => other,
        }
    }
}
