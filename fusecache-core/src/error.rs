use std::fmt::Display;

use crate::GraphId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An input could not be described by the signature encoder.
    #[error("input {index} cannot be encoded: {reason}")]
    InvalidInputKind { index: usize, reason: String },

    /// No existing or newly built runtime can schedule the inputs.
    #[error("no applicable schedule for {graph} (unit {unit})")]
    NoApplicableSchedule { graph: GraphId, unit: usize },

    /// The compiler collaborator failed to build an artifact.
    #[error(transparent)]
    CompilationFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("unknown graph {0}")]
    UnknownGraph(GraphId),

    #[error("cycle detected between segments of {graph}")]
    CyclicSegments { graph: String },

    #[error("expected {expected} inputs, got {got}")]
    InputArity { expected: usize, got: usize },

    #[error("Message: {0}")]
    Msg(String),

    #[error("{inner}\n{backtrace}")]
    WithBacktrace {
        inner: Box<Self>,
        backtrace: Box<std::backtrace::Backtrace>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new error based on a printable error message.
    pub fn msg<M: Display>(msg: M) -> Self {
        Self::Msg(msg.to_string()).bt()
    }

    /// Wrap an error reported by a compiler collaborator.
    pub fn compilation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CompilationFailure(Box::new(err))
    }

    pub fn bt(self) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        match backtrace.status() {
            std::backtrace::BacktraceStatus::Disabled
            | std::backtrace::BacktraceStatus::Unsupported => self,
            _ => Self::WithBacktrace {
                inner: Box::new(self),
                backtrace: Box::new(backtrace),
            },
        }
    }

    /// Strip a captured backtrace, if any.
    pub fn inner(&self) -> &Self {
        match self {
            Self::WithBacktrace { inner, .. } => inner.inner(),
            other => other,
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::Error::Msg(format!($msg).into()).bt())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($fmt, $($arg)*).into()).bt())
    };
}
