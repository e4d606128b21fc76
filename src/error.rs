//! Error types for the magkit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when registry configuration parameters are
//!   invalid (e.g. zero cpu slots, non-power-of-two hash sizing).
//! - [`InvariantError`]: Returned by debug-only `check_invariants` methods
//!   when internal data-structure invariants are violated.
//! - [`CtorError`]: Returned by a client-supplied object constructor to
//!   signal that an object could not be initialized; the allocator unwinds
//!   the partial work and reports a short count.
//!
//! Contract violations (misaligned sizes, destroying a non-empty cache,
//! looking up a foreign pointer) are *not* errors — they panic, since they
//! indicate a programming defect in the caller that cannot be continued
//! past.
//!
//! ## Example Usage
//!
//! ```
//! use magkit::registry::{CacheRegistry, RegistryConfig};
//!
//! // Fallible construction for host-tunable parameters
//! let cfg = RegistryConfig {
//!     cpus: 0,
//!     ..RegistryConfig::default()
//! };
//! assert!(CacheRegistry::new(cfg).is_err());
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when registry configuration parameters are invalid.
///
/// Produced by [`CacheRegistry::new`](crate::registry::CacheRegistry::new)
/// when validating a [`RegistryConfig`](crate::registry::RegistryConfig).
/// Carries a human-readable description of which parameter failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by [`ObjCache::check_invariants`](crate::cache::ObjCache::check_invariants),
/// which walks the per-CPU and depot layers verifying round counts and
/// working-set bookkeeping. Intended for tests and debug assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// CtorError
// ---------------------------------------------------------------------------

/// Error returned by a client constructor callback.
///
/// A failing constructor is a recoverable resource condition, not a bug:
/// the allocator releases the raw object back to the slab layer and the
/// batch result reports fewer objects than requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtorError(String);

impl CtorError {
    /// Creates a new `CtorError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CtorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CtorError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("cpus must be > 0");
        assert_eq!(err.to_string(), "cpus must be > 0");
    }

    #[test]
    fn config_debug_includes_message() {
        let err = ConfigError::new("bad bucket count");
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("bad bucket count"));
    }

    #[test]
    fn config_message_accessor() {
        let err = ConfigError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- InvariantError ---------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("rounds exceed magsize");
        assert_eq!(err.to_string(), "rounds exceed magsize");
    }

    #[test]
    fn invariant_clone_and_eq() {
        let a = InvariantError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn invariant_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<InvariantError>();
    }

    // -- CtorError --------------------------------------------------------

    #[test]
    fn ctor_display_shows_message() {
        let err = CtorError::new("backing buffer exhausted");
        assert_eq!(err.to_string(), "backing buffer exhausted");
    }

    #[test]
    fn ctor_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<CtorError>();
    }
}
