//! Liveness probe.

/// Handler for GET /v1/health
///
/// Does not check the identity service or the cache: a Flex outage must not
/// restart the pod.
pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }
}
