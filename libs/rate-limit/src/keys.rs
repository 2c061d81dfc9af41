//! Namespaced rate-limit keys
//!
//! Every limiter class lives under its own namespace so per-user, per-IP and
//! per-downstream limits never collide. Format:
//! `ratelimit:{class}:{subject}:{resource}`.

/// Per-authenticated-user limit for a route class
pub fn user(user_id: &str, route_class: &str) -> String {
    format!("ratelimit:user:{user_id}:{route_class}")
}

/// Per-client-IP limit for a route class (unauthenticated fallback)
pub fn ip(addr: &str, route_class: &str) -> String {
    format!("ratelimit:ip:{addr}:{route_class}")
}

/// Per-downstream-service limit applied by the service client
pub fn service(service_name: &str) -> String {
    format!("ratelimit:service:{service_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_disjoint() {
        assert_eq!(user("42", "search"), "ratelimit:user:42:search");
        assert_eq!(ip("10.0.0.1", "search"), "ratelimit:ip:10.0.0.1:search");
        assert_eq!(service("graph-search"), "ratelimit:service:graph-search");
        assert_ne!(user("x", "a"), ip("x", "a"));
    }
}
