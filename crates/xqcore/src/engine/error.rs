use core::fmt;
use std::sync::Arc;

use crate::compiler::ir::Location;
use crate::consts::{ERR_NS, XQCORE_ERR_NS};
use crate::xdm::ExpandedName;

/// Strongly typed error codes used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FOAR0001, // division by zero
    FOAR0002, // numeric overflow / underflow
    FOCH0002, // collation does not exist
    FOER0000, // unidentified error
    FORG0001, // invalid value for cast
    FORG0003, // zero-or-one called with more than one item
    FORG0004, // one-or-more called with the empty sequence
    FORG0005, // exactly-one violated
    FORG0006, // invalid argument type (effective boolean value)
    XPDY0002, // context item / variable value absent
    XPST0008, // undeclared variable
    XPST0017, // unknown function or wrong arity
    XPTY0004, // type error
    Internal, // broken invariant inside the engine
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            FOAR0001 => "err:FOAR0001",
            FOAR0002 => "err:FOAR0002",
            FOCH0002 => "err:FOCH0002",
            FOER0000 => "err:FOER0000",
            FORG0001 => "err:FORG0001",
            FORG0003 => "err:FORG0003",
            FORG0004 => "err:FORG0004",
            FORG0005 => "err:FORG0005",
            FORG0006 => "err:FORG0006",
            XPDY0002 => "err:XPDY0002",
            XPST0008 => "err:XPST0008",
            XPST0017 => "err:XPST0017",
            XPTY0004 => "err:XPTY0004",
            Internal => "xq:INTERNAL",
            Unknown => "err:UNKNOWN",
        }
    }

    pub fn qname(&self) -> ExpandedName {
        match self {
            ErrorCode::Internal => ExpandedName::new(Some(XQCORE_ERR_NS.to_string()), "INTERNAL"),
            other => {
                let local = other.as_str().trim_start_matches("err:");
                ExpandedName::new(Some(ERR_NS.to_string()), local)
            }
        }
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "err:FOAR0001" => FOAR0001,
            "err:FOAR0002" => FOAR0002,
            "err:FOCH0002" => FOCH0002,
            "err:FOER0000" => FOER0000,
            "err:FORG0001" => FORG0001,
            "err:FORG0003" => FORG0003,
            "err:FORG0004" => FORG0004,
            "err:FORG0005" => FORG0005,
            "err:FORG0006" => FORG0006,
            "err:XPDY0002" => XPDY0002,
            "err:XPST0008" => XPST0008,
            "err:XPST0017" => XPST0017,
            "err:XPTY0004" => XPTY0004,
            "xq:INTERNAL" => Internal,
            _ => Unknown,
        }
    }

    fn default_kind(self) -> ErrorKind {
        match self {
            ErrorCode::XPST0008 | ErrorCode::XPST0017 => ErrorKind::Static,
            ErrorCode::XPTY0004 => ErrorKind::Type,
            _ => ErrorKind::Dynamic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Reported during compilation; the expression cannot run.
    Static,
    /// Type error, raised either at compile time or during evaluation.
    Type,
    Dynamic,
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    /// Focus at the point of failure.
    pub context: Option<ContextSnapshot>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { code, kind, message: msg.into(), location: None, context: None, source: None }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), code.default_kind(), msg)
    }

    pub fn static_error(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), ErrorKind::Static, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Internal, msg)
    }

    pub fn code_enum(&self) -> ErrorCode {
        match self.code.ns_uri.as_deref() {
            Some(ERR_NS) => ErrorCode::from_code(&format!("err:{}", self.code.local)),
            Some(XQCORE_ERR_NS) if self.code.local == "INTERNAL" => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn format_code(&self) -> String {
        match self.code.ns_uri.as_deref() {
            Some(ERR_NS) => format!("err:{}", self.code.local),
            Some(ns) => format!("Q{{{}}}{}", ns, self.code.local),
            None => self.code.local.clone(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.kind == ErrorKind::Static
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    /// Attaches `loc` unless a more precise location was recorded closer to the failure.
    #[must_use]
    pub fn maybe_set_location(mut self, loc: Location) -> Self {
        if self.location.is_none() && !loc.is_unknown() {
            self.location = Some(loc);
        }
        self
    }

    /// Attaches a snapshot of the focus, keeping the innermost one.
    #[must_use]
    pub fn maybe_set_context(mut self, context: impl FnOnce() -> ContextSnapshot) -> Self {
        if self.context.is_none() {
            self.context = Some(context());
        }
        self
    }

    /// Reclassifies an error detected while folding constants at compile time.
    #[must_use]
    pub fn make_static(mut self) -> Self {
        self.kind = ErrorKind::Static;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())?;
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

/// The focus (context item, position, size) an error was raised under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextSnapshot {
    pub item: Option<String>,
    pub position: Option<usize>,
    pub last: Option<usize>,
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "context item {item}")?,
            None => f.write_str("no context item")?,
        }
        if let Some(p) = self.position {
            write!(f, ", position {p}")?;
        }
        if let Some(l) = self.last {
            write!(f, " of {l}")?;
        }
        Ok(())
    }
}

/// Non-fatal diagnostic produced during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub location: Location,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_unknown() {
            write!(f, "warning: {}", self.message)
        } else {
            write!(f, "warning: {} at {}", self.message, self.location)
        }
    }
}
