//! Well-known namespace and collation URIs.

/// XML Schema namespace (built-in atomic types).
pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
/// Default function namespace.
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
/// Namespace of the W3C error codes (`err:` prefix).
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
/// Namespace used for engine specific error codes.
pub const XQCORE_ERR_NS: &str = "urn:xqcore:errors";
/// Namespace of the variables the optimizer introduces when it hoists subexpressions.
pub const PROMOTED_NS: &str = "urn:xqcore:promoted";
/// Namespace of the engine's own functions, which rewrites may synthesize.
pub const XQCORE_FNS: &str = "urn:xqcore:functions";

pub const CODEPOINT_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";
pub const ASCII_CASE_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/html-ascii-case-insensitive";
