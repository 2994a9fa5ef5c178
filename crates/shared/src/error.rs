/// Shared error type used across the Convoy client crates.
#[derive(Debug, thiserror::Error)]
pub enum ConvoyError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(ConvoyError::NotFound.to_string(), "not found");
    }

    #[test]
    fn validation_contains_message() {
        let err = ConvoyError::Validation("bad input".into());
        assert_eq!(err.to_string(), "validation error: bad input");
    }

    #[test]
    fn crypto_contains_message() {
        let err = ConvoyError::Crypto("wrap failed".into());
        assert_eq!(err.to_string(), "crypto error: wrap failed");
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ConvoyError::NotFound),
            Box::new(ConvoyError::Unauthorized),
            Box::new(ConvoyError::Validation("x".into())),
            Box::new(ConvoyError::Internal("y".into())),
            Box::new(ConvoyError::Crypto("z".into())),
            Box::new(ConvoyError::ServiceUnavailable("directory down".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
