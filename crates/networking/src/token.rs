//! Session token access

/// Supplies the current bearer token for the WebSocket handshake and REST
/// calls.
///
/// The token is re-read on every (re)connection attempt and every request,
/// never cached at connect time, so a session refresh is honored mid-flight
/// without a full reload. Returning `None` means the session is logged out:
/// fatal-for-now, no transport retries until a token is observed again.
pub trait TokenSupplier: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenSupplier for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        (self)()
    }
}

/// Fixed token supplier for tests and short-lived tools
pub struct StaticToken(pub String);

impl TokenSupplier for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_supplier() {
        let supplier = || Some("tok-1".to_string());
        assert_eq!(supplier.token(), Some("tok-1".to_string()));
    }

    #[test]
    fn test_static_supplier() {
        let supplier = StaticToken("tok-2".into());
        assert_eq!(supplier.token(), Some("tok-2".to_string()));
    }
}
