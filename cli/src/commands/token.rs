use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use serde_json::{Value, json};
use toolbridge_core::auth::{TokenClaims, sign_token};
use toolbridge_core::error::BridgeError;

use crate::util::{exit_error, print_json};

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Sign a development bearer token for a subject
    Mint {
        /// Subject the token authenticates
        #[arg(long)]
        subject: String,
        /// Lifetime in seconds (0 = no expiry)
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
        /// Signing secret (otherwise TOOLBRIDGE_TOKEN_SECRET)
        #[arg(long, env = "TOOLBRIDGE_TOKEN_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
}

pub fn run(raw: bool, command: TokenCommands) -> i32 {
    match command {
        TokenCommands::Mint {
            subject,
            ttl,
            secret,
        } => {
            let Some(secret) = secret.filter(|s| !s.trim().is_empty()) else {
                exit_error(
                    "a signing secret is required",
                    Some("Pass --secret or set TOOLBRIDGE_TOKEN_SECRET to the API's secret"),
                );
            };
            match mint(&secret, &subject, ttl, Utc::now()) {
                Ok(output) => {
                    print_json(&output, raw);
                    0
                }
                Err(e) => exit_error(&e.to_string(), None),
            }
        }
    }
}

pub fn mint(secret: &str, subject: &str, ttl: u64, now: DateTime<Utc>) -> Result<Value, BridgeError> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(BridgeError::Configuration(
            "subject must not be empty".to_string(),
        ));
    }
    let expires_at = if ttl == 0 {
        None
    } else {
        let ttl = i64::try_from(ttl)
            .map_err(|_| BridgeError::Configuration("ttl is too large".to_string()))?;
        Some(now + Duration::seconds(ttl))
    };
    let claims = TokenClaims {
        sub: subject.to_string(),
        exp: expires_at.map(|at| at.timestamp()),
    };
    // The verifier trims its secret; sign with the same bytes.
    let token = sign_token(secret.trim(), &claims)?;

    Ok(json!({
        "token": token,
        "subject": claims.sub,
        "expires_at": expires_at.map(|at| at.to_rfc3339()),
    }))
}

#[cfg(test)]
mod tests {
    use toolbridge_core::auth::TokenVerifier;

    use super::*;

    #[test]
    fn minted_token_verifies_until_expiry() {
        let now = Utc::now();
        let output = mint(" s3cret ", "user-17", 60, now).unwrap();
        let token = output["token"].as_str().unwrap();

        let verifier = TokenVerifier::new(Some("s3cret"));
        assert_eq!(verifier.verify(token, now).unwrap().sub, "user-17");
        assert!(verifier.verify(token, now + Duration::seconds(61)).is_err());
        assert!(TokenVerifier::new(Some("other")).verify(token, now).is_err());
    }

    #[test]
    fn zero_ttl_mints_a_token_without_expiry() {
        let output = mint("s3cret", "user-17", 0, Utc::now()).unwrap();
        assert!(output["expires_at"].is_null());
    }
}
