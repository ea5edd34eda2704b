//! Redaction wrapper for values that may end up in logs
//!
//! Entity field values are application data. The Unit of Work logs change
//! sets at debug level, and those values pass through `Sensitive<T>` so that
//! nothing leaks unless the scope is configured to reveal them.

use std::fmt;

const REDACTED: &str = "***REDACTED***";

/// Wrapper that redacts its content in `Debug` and `Display`
///
/// A wrapper built with [`Sensitive::revealed`] prints the inner value
/// instead. This lets call sites keep a single formatting path and decide
/// at runtime whether values are shown.
///
/// # Example
///
/// ```
/// use unitas_core_types::Sensitive;
///
/// let email = Sensitive::new("ada@example.com");
/// assert_eq!(format!("{:?}", email), "***REDACTED***");
///
/// let shown = Sensitive::revealed("ada@example.com");
/// assert_eq!(format!("{}", shown), "ada@example.com");
/// assert_eq!(email.expose(), &"ada@example.com");
/// ```
pub struct Sensitive<T> {
    value: T,
    reveal: bool,
}

impl<T> Sensitive<T> {
    /// Wrap a value that must be redacted when formatted
    pub fn new(value: T) -> Self {
        Self {
            value,
            reveal: false,
        }
    }

    /// Wrap a value that is formatted as-is
    pub fn revealed(value: T) -> Self {
        Self {
            value,
            reveal: true,
        }
    }

    /// Wrap a value, revealing it only when `reveal` is true
    pub fn with_reveal(value: T, reveal: bool) -> Self {
        Self { value, reveal }
    }

    /// Whether formatting prints the inner value
    pub fn is_revealed(&self) -> bool {
        self.reveal
    }

    /// Borrow the wrapped value
    pub fn expose(&self) -> &T {
        &self.value
    }

    /// Consume the wrapper and return the inner value
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reveal {
            fmt::Debug::fmt(&self.value, f)
        } else {
            f.write_str(REDACTED)
        }
    }
}

impl<T: fmt::Display> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reveal {
            fmt::Display::fmt(&self.value, f)
        } else {
            f.write_str(REDACTED)
        }
    }
}

impl<T: Clone> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            reveal: self.reveal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_by_default() {
        let secret = Sensitive::new("card-4111");
        assert_eq!(format!("{:?}", secret), REDACTED);
        assert_eq!(format!("{}", secret), REDACTED);
        assert!(!secret.is_revealed());
    }

    #[test]
    fn test_revealed_prints_value() {
        let shown = Sensitive::revealed(42);
        assert_eq!(format!("{:?}", shown), "42");
        assert_eq!(format!("{}", shown), "42");
    }

    #[test]
    fn test_with_reveal_switch() {
        assert_eq!(format!("{}", Sensitive::with_reveal("x", false)), REDACTED);
        assert_eq!(format!("{}", Sensitive::with_reveal("x", true)), "x");
    }

    #[test]
    fn test_nested_in_struct_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Change {
            field: &'static str,
            new: Sensitive<String>,
        }

        let change = Change {
            field: "email",
            new: Sensitive::new("ada@example.com".to_string()),
        };

        let debug_str = format!("{:?}", change);
        assert!(debug_str.contains("email"));
        assert!(debug_str.contains(REDACTED));
        assert!(!debug_str.contains("ada@example.com"));
    }

    #[test]
    fn test_clone_keeps_reveal_flag() {
        let original = Sensitive::revealed(String::from("v"));
        let cloned = original.clone();
        assert!(cloned.is_revealed());
        assert_eq!(cloned.into_inner(), "v");
    }
}
