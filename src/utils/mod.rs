//! Shared utilities: the error types used at process level and logging setup.

pub mod error;
pub mod logging;

pub use error::GatewayError;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warning");
        logging::init("nonsense");
    }

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(logging::normalize_level("WARNING"), "warn");
        assert_eq!(logging::normalize_level("trace"), "trace");
        assert_eq!(logging::normalize_level("loud"), "info");
    }
}
