use std::sync::Arc;

use toolbridge_core::dev_endpoint::DevEndpointCipher;
use toolbridge_core::error::BridgeError;
use toolbridge_mcp_runtime::ToolBridge;
use toolbridge_mcp_runtime::util::{non_empty_env, parse_env_bool_flag};

use crate::auth::{AuthGateway, DEFAULT_SESSION_COOKIE};

pub const TOKEN_SECRET_ENV: &str = "TOOLBRIDGE_TOKEN_SECRET";
pub const SESSION_COOKIE_ENV: &str = "TOOLBRIDGE_SESSION_COOKIE";
pub const DEV_MODE_ENV: &str = "TOOLBRIDGE_DEV_MODE";
pub const DEV_ENDPOINT_KEY_ENV: &str = "TOOLBRIDGE_DEV_ENDPOINT_KEY";

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<ToolBridge>,
    pub auth: Arc<AuthGateway>,
    /// Present only in development mode.
    pub dev_endpoint: Option<Arc<DevEndpointCipher>>,
}

impl AppState {
    pub fn from_env(bridge: Arc<ToolBridge>) -> Result<Self, BridgeError> {
        let secret = non_empty_env(TOKEN_SECRET_ENV);
        let cookie_name =
            non_empty_env(SESSION_COOKIE_ENV).unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
        let auth = AuthGateway::new(secret.as_deref(), cookie_name);
        if auth.is_open() {
            tracing::warn!(
                event = "auth_open_mode",
                "{TOKEN_SECRET_ENV} is not set; token signatures are not verified"
            );
        }

        let dev_mode = parse_env_bool_flag(std::env::var(DEV_MODE_ENV).ok(), false);
        let dev_endpoint = if dev_mode {
            let key = non_empty_env(DEV_ENDPOINT_KEY_ENV).ok_or_else(|| {
                BridgeError::Configuration(format!(
                    "{DEV_ENDPOINT_KEY_ENV} must be set when {DEV_MODE_ENV} is on"
                ))
            })?;
            Some(Arc::new(DevEndpointCipher::from_base64(&key)?))
        } else {
            None
        };

        Ok(Self {
            bridge,
            auth: Arc::new(auth),
            dev_endpoint,
        })
    }
}
