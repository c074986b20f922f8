//! Redaction of user data in log events.

/// Replaces user data with `?` when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Redactor {
    enabled: bool,
}

impl Redactor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Returns `s`, or `?` when redaction is enabled.
    pub fn string<'a>(&self, s: &'a str) -> &'a str {
        if self.enabled {
            "?"
        } else {
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_toggle() {
        assert_eq!(Redactor::new(false).string("secret row"), "secret row");
        assert_eq!(Redactor::new(true).string("secret row"), "?");
    }
}
