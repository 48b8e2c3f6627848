use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
#[readonly::make]
pub struct ApiServer {
    pub bind_address: String,
    /// User id -> bearer token. Requests carrying one of these tokens are
    /// treated as authenticated and rate limited per user instead of per IP.
    #[serde(default)]
    pub bearer_tokens: HashMap<String, String>,
    /// Username -> password for the demo login endpoint.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl Default for ApiServer {
    fn default() -> Self {
        ApiServer {
            bind_address: "0.0.0.0:21380".to_string(),
            bearer_tokens: HashMap::new(),
            users: HashMap::new(),
        }
    }
}
