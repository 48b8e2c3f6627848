//! Per-request identity used for tier selection and bucket keys.

use axum::extract::ConnectInfo;
use axum::http::{HeaderName, Method, Request};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use crate::settings::rate_limiting::{KeyRule, RateLimitingConfig, RouteSettings};

/// Identity attached to the request by the authentication layer, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Everything the gate knows about a request. Built once, never mutated.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct RequestContext {
    /// User id when authenticated, client IP otherwise
    pub identity: String,
    pub ip: Option<IpAddr>,
    pub user_id: Option<String>,
    pub method: Method,
    pub path: String,
    pub resource_type: String,
    /// Captured subset of the request headers, names lowercased
    pub headers: HashMap<String, String>,
    pub timestamp: Instant,
}

impl RequestContext {
    pub fn new(
        identity: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        RequestContext {
            identity: identity.into(),
            ip: None,
            user_id: None,
            method,
            path: path.into(),
            resource_type: resource_type.into(),
            headers: HashMap::new(),
            timestamp: Instant::now(),
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.identity = user_id.clone();
        self.user_id = Some(user_id);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Client IP as text, `"unknown"` if it could not be determined.
    pub fn ip_or_unknown(&self) -> String {
        self.ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }

    pub fn is_read(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Ordered path-prefix table; the longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct ResourceRoutes {
    entries: Vec<RouteSettings>,
    default_resource: String,
}

impl ResourceRoutes {
    pub fn new(routes: &[RouteSettings], default_resource: &str) -> Self {
        let mut entries = routes.to_vec();
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        ResourceRoutes {
            entries,
            default_resource: default_resource.to_string(),
        }
    }

    pub fn resolve(&self, path: &str) -> &str {
        self.entries
            .iter()
            .find(|route| path.starts_with(&route.prefix))
            .map(|route| route.tier.as_str())
            .unwrap_or(&self.default_resource)
    }
}

const DEFAULT_CAPTURED_HEADERS: [&str; 3] = ["user-agent", "x-request-id", "referer"];

/// Derives a [`RequestContext`] from an inbound request without I/O.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    routes: ResourceRoutes,
    trust_proxy: bool,
    captured_headers: Vec<HeaderName>,
}

impl ContextBuilder {
    pub fn new(routes: ResourceRoutes, trust_proxy: bool) -> Self {
        ContextBuilder {
            routes,
            trust_proxy,
            captured_headers: DEFAULT_CAPTURED_HEADERS
                .into_iter()
                .map(HeaderName::from_static)
                .collect(),
        }
    }

    /// Builder for the configured route table. Headers used by `header` key
    /// rules are captured in addition to the defaults.
    pub fn from_settings(config: &RateLimitingConfig) -> Self {
        let routes = ResourceRoutes::new(&config.routes, &config.default_tier);
        let mut builder = ContextBuilder::new(routes, config.trust_proxy);
        for tier in config.tiers.values() {
            if let KeyRule::Header(name) = &tier.key {
                if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                    builder = builder.with_captured_header(name);
                }
            }
        }
        builder
    }

    pub fn with_captured_header(mut self, name: HeaderName) -> Self {
        if !self.captured_headers.contains(&name) {
            self.captured_headers.push(name);
        }
        self
    }

    pub fn build<B>(&self, req: &Request<B>) -> RequestContext {
        let ip = self.client_ip(req);
        let user_id = req
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.id.clone());
        let identity = match (&user_id, ip) {
            (Some(user_id), _) => user_id.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => UNKNOWN_IDENTITY.to_string(),
        };

        let headers = self
            .captured_headers
            .iter()
            .filter_map(|name| {
                req.headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let path = req.uri().path().to_string();
        let resource_type = self.routes.resolve(&path).to_string();

        RequestContext {
            identity,
            ip,
            user_id,
            method: req.method().clone(),
            path,
            resource_type,
            headers,
            timestamp: Instant::now(),
        }
    }

    // Proxy headers are only honoured when explicitly trusted, otherwise any
    // client could pick its own bucket.
    fn client_ip<B>(&self, req: &Request<B>) -> Option<IpAddr> {
        let connected = || {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        };

        if !self.trust_proxy {
            return connected();
        }

        req.headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse().ok())
            .or_else(|| {
                req.headers()
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse().ok())
            })
            .or_else(connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn builder(trust_proxy: bool) -> ContextBuilder {
        let routes = ResourceRoutes::new(
            &[
                RouteSettings::new("/api/login", "auth"),
                RouteSettings::new("/api/admin", "admin"),
                RouteSettings::new("/api/admin/security", "security"),
            ],
            "api",
        );
        ContextBuilder::new(routes, trust_proxy)
    }

    fn request(path: &str) -> axum::http::request::Builder {
        Request::builder().uri(path)
    }

    #[test]
    fn test_resource_type_from_prefix() {
        let builder = builder(false);
        let ctx = builder.build(&request("/api/login").body(Body::empty()).unwrap());
        assert_eq!(ctx.resource_type, "auth");

        let ctx = builder.build(&request("/api/login/otp").body(Body::empty()).unwrap());
        assert_eq!(ctx.resource_type, "auth");

        let ctx = builder.build(&request("/api/items").body(Body::empty()).unwrap());
        assert_eq!(ctx.resource_type, "api");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let builder = builder(false);
        let ctx = builder.build(
            &request("/api/admin/security/keys")
                .body(Body::empty())
                .unwrap(),
        );
        assert_eq!(ctx.resource_type, "security");
    }

    #[test]
    fn test_identity_from_connect_info() {
        let builder = builder(false);
        let mut req = request("/api/items").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4711))));

        let ctx = builder.build(&req);
        assert_eq!(ctx.identity, "10.0.0.7");
        assert_eq!(ctx.ip, Some(IpAddr::from([10, 0, 0, 7])));
        assert!(ctx.user_id.is_none());
    }

    #[test]
    fn test_authenticated_user_takes_precedence() {
        let builder = builder(false);
        let mut req = request("/api/items").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4711))));
        req.extensions_mut().insert(AuthenticatedUser::new("alice"));

        let ctx = builder.build(&req);
        assert_eq!(ctx.identity, "alice");
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));
        assert_eq!(ctx.ip_or_unknown(), "10.0.0.7");
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let req = request("/api/items")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        let ctx = builder(false).build(&req);
        assert_eq!(ctx.identity, UNKNOWN_IDENTITY);

        let ctx = builder(true).build(&req);
        assert_eq!(ctx.identity, "203.0.113.9");
    }

    #[test]
    fn test_real_ip_fallback_when_trusted() {
        let req = request("/api/items")
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();

        let ctx = builder(true).build(&req);
        assert_eq!(ctx.identity, "198.51.100.4");
    }

    #[test]
    fn test_captured_headers() {
        let builder = builder(false).with_captured_header(HeaderName::from_static("x-api-key"));
        let req = request("/api/items")
            .method(Method::POST)
            .header("user-agent", "curl/8.0")
            .header("x-api-key", "k-123")
            .header("cookie", "secret")
            .body(Body::empty())
            .unwrap();

        let ctx = builder.build(&req);
        assert_eq!(ctx.header("User-Agent"), Some("curl/8.0"));
        assert_eq!(ctx.header("x-api-key"), Some("k-123"));
        assert_eq!(ctx.header("cookie"), None);
        assert_eq!(ctx.method, Method::POST);
        assert!(!ctx.is_read());
    }

    #[test]
    fn test_from_settings_captures_key_headers() {
        let mut config = RateLimitingConfig::default();
        config.tiers.get_mut("api").unwrap().key = KeyRule::Header("x-tenant".to_string());

        let req = request("/api/items")
            .header("x-tenant", "acme")
            .body(Body::empty())
            .unwrap();
        let ctx = ContextBuilder::from_settings(&config).build(&req);
        assert_eq!(ctx.header("x-tenant"), Some("acme"));
    }
}
