use serde_json::{Value, json};
use toolbridge_core::dev_endpoint::DevEndpointCipher;
use toolbridge_core::error::BridgeError;

use crate::util::{exit_error, print_json};

pub fn run(api_url: &str, key: Option<&str>, subject: &str, raw: bool) -> i32 {
    let Some(key) = key else {
        exit_error(
            "a dev endpoint key is required",
            Some("Pass --key or set TOOLBRIDGE_DEV_ENDPOINT_KEY (base64, 32 bytes)"),
        );
    };
    match dev_url(api_url, key, subject) {
        Ok(output) => {
            print_json(&output, raw);
            0
        }
        Err(e) => exit_error(&e.to_string(), None),
    }
}

/// Encrypt `subject` into a dev endpoint path. Each call yields a fresh
/// segment; all of them resolve to the same subject.
pub fn dev_url(api_url: &str, key: &str, subject: &str) -> Result<Value, BridgeError> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(BridgeError::Configuration(
            "subject must not be empty".to_string(),
        ));
    }
    let cipher = DevEndpointCipher::from_base64(key)?;
    let path = format!("/mcp/dev/{}", cipher.encrypt_subject(subject)?);
    Ok(json!({
        "subject": subject,
        "path": path,
        "url": format!("{}{path}", api_url.trim_end_matches('/')),
    }))
}
