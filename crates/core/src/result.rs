//! Result alias and the swallow-and-log combinator used on teardown paths.
//!
//! Deleting a controller object is best effort: a failure is logged and the
//! caller moves on.

use std::fmt::Display;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub trait ResultExt<T> {
    /// Keep the value, or log the error at `warn` under `context` and drop it.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        self.map_err(|e| tracing::warn!(context, error = %e, "ignoring failure"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_value_is_kept() {
        let result: Result<&str> = Ok("net-1");
        assert_eq!(result.into_option_logged("delete network"), Some("net-1"));
    }

    #[test]
    fn test_error_is_swallowed() {
        let result: Result<()> = Err(Error::record_not_found("network", 7));
        assert!(result.into_option_logged("delete network").is_none());
    }

    #[test]
    fn test_foreign_error_types_are_accepted() {
        let result: std::result::Result<u8, String> = Err("connection reset".into());
        assert_eq!(result.into_option_logged("delete interface"), None);
    }
}
