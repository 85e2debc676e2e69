//! Status code descriptions.
//!
//! Drivers often report completion as a raw status code. Translating codes
//! into messages belongs to the transport layer, so the executor only needs
//! a [`StatusDescriber`] to put a readable message into the synthesized
//! failure. Closures implement the trait directly.

/// Turns a raw status code into a human-readable message.
pub trait StatusDescriber: Send + Sync + 'static {
    /// Describes `status`.
    fn describe(&self, status: i32) -> String;
}

impl<F> StatusDescriber for F
where
    F: Fn(i32) -> String + Send + Sync + 'static,
{
    fn describe(&self, status: i32) -> String {
        self(status)
    }
}

/// Describer that knows no codes and renders them in hex and decimal.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericStatusDescriber;

impl StatusDescriber for GenericStatusDescriber {
    fn describe(&self, status: i32) -> String {
        format!("status 0x{:02X} ({})", status, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_describer_formats_hex_and_decimal() {
        assert_eq!(GenericStatusDescriber.describe(133), "status 0x85 (133)");
        assert_eq!(GenericStatusDescriber.describe(0), "status 0x00 (0)");
    }

    #[test]
    fn test_closure_describer() {
        let describer = |status: i32| match status {
            8 => "connection timeout".to_string(),
            other => format!("unknown {}", other),
        };
        assert_eq!(describer.describe(8), "connection timeout");
        assert_eq!(StatusDescriber::describe(&describer, 9), "unknown 9");
    }
}
