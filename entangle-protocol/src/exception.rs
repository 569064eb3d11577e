//! Remote exceptions as plain values.
//!
//! An exception carries a namespace, a name and a human-readable
//! description. Peers match exceptions by the (namespace, name) pair, not
//! by any language-level exception machinery.

use std::error::Error;
use std::fmt;

/// A remote exception value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    namespace: String,
    name: String,
    description: String,
}

impl Exception {
    /// Creates an exception value.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Exception {
        Exception {
            namespace: namespace.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// Namespace the exception is defined under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the exception within its namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns whether this exception matches a definition, comparing the
    /// (namespace, name) pair.
    pub fn is(&self, definition: &ExceptionDefinition) -> bool {
        self.namespace == definition.namespace && self.name == definition.name
    }

    /// Adapts an arbitrary error for the wire.
    ///
    /// An error that already is an [`Exception`] passes through unchanged;
    /// anything else becomes an `entangle.InternalServerError` carrying the
    /// error's textual description.
    pub fn from_error(error: &(dyn Error + Send + Sync + 'static)) -> Exception {
        match error.downcast_ref::<Exception>() {
            Some(exception) => exception.clone(),
            None => INTERNAL_SERVER_ERROR.raise(error.to_string()),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl Error for Exception {}

/// A definition that constructs exception values of a specific kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionDefinition {
    namespace: &'static str,
    name: &'static str,
}

impl ExceptionDefinition {
    /// Creates an exception definition.
    pub const fn new(namespace: &'static str, name: &'static str) -> ExceptionDefinition {
        ExceptionDefinition { namespace, name }
    }

    /// Namespace the definition lives under.
    pub fn namespace(&self) -> &str {
        self.namespace
    }

    /// Name of the defined exception.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Constructs an exception value with the given description. Formatted
    /// descriptions go through `raise(format!(…))`.
    pub fn raise(&self, description: impl Into<String>) -> Exception {
        Exception::new(self.namespace, self.name, description)
    }
}

/// A received message was structurally valid but semantically unusable.
pub const BAD_MESSAGE: ExceptionDefinition = ExceptionDefinition::new("entangle", "BadMessage");

/// The server failed in a way it does not care to elaborate on.
pub const INTERNAL_SERVER_ERROR: ExceptionDefinition =
    ExceptionDefinition::new("entangle", "InternalServerError");

/// The requested method is not provided by the server.
pub const UNKNOWN_METHOD: ExceptionDefinition =
    ExceptionDefinition::new("entangle", "UnknownMethod");

/// The server raised an exception the client has no definition for.
pub const UNKNOWN_EXCEPTION: ExceptionDefinition =
    ExceptionDefinition::new("entangle", "UnknownException");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_equality() {
        let a = Exception::new("entangle", "BadMessage", "broken");
        let b = Exception::new("entangle", "BadMessage", "broken");
        assert_eq!(a, b);

        // Any differing component breaks equality.
        assert_ne!(a, Exception::new("other", "BadMessage", "broken"));
        assert_ne!(a, Exception::new("entangle", "Other", "broken"));
        assert_ne!(a, Exception::new("entangle", "BadMessage", "other"));
    }

    #[test]
    fn test_definition_matching() {
        let exception = BAD_MESSAGE.raise("three elements expected");

        assert!(exception.is(&BAD_MESSAGE));
        assert!(!exception.is(&INTERNAL_SERVER_ERROR));
        assert_eq!(exception.namespace(), "entangle");
        assert_eq!(exception.name(), "BadMessage");
        assert_eq!(exception.description(), "three elements expected");
    }

    #[test]
    fn test_builtin_definitions() {
        for (definition, name) in [
            (BAD_MESSAGE, "BadMessage"),
            (INTERNAL_SERVER_ERROR, "InternalServerError"),
            (UNKNOWN_METHOD, "UnknownMethod"),
            (UNKNOWN_EXCEPTION, "UnknownException"),
        ] {
            assert_eq!(definition.namespace(), "entangle");
            assert_eq!(definition.name(), name);
        }
    }

    #[test]
    fn test_from_error_passthrough() {
        let exception = UNKNOWN_METHOD.raise("no method named Echo");
        let adapted = Exception::from_error(&exception);
        assert_eq!(adapted, exception);
    }

    #[test]
    fn test_from_error_adapts_foreign_errors() {
        let error = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let adapted = Exception::from_error(&error);

        assert!(adapted.is(&INTERNAL_SERVER_ERROR));
        assert_eq!(adapted.description(), "disk on fire");
    }

    #[test]
    fn test_display() {
        let exception = INTERNAL_SERVER_ERROR.raise("out of frogs");
        assert_eq!(exception.to_string(), "out of frogs");
    }
}
