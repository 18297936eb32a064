use crate::config::Config;
use crate::models::ApiToken;
use crate::utils::auth::create_jwt;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rand::RngCore;

/// Issues a signed token and registers its id in `config`.
///
/// A missing signing secret is generated and stored in the configuration. The
/// caller persists `config` afterwards.
pub fn issue_token(config: &mut Config, name: &str, ttl: Duration) -> Result<String> {
    let secret = match signing_secret(config) {
        Some(secret) => secret,
        None => {
            tracing::info!("No secret key configured, generating one");
            config.secret_key = generate_secret();
            config.secret_key.clone()
        }
    };

    let (token, claims) = create_jwt(name, &secret, ttl).context("failed to sign token")?;

    config.tokens.push(ApiToken {
        id: claims.jti,
        name: name.to_string(),
        created_at: Utc::now(),
    });

    tracing::info!("Token \"{}\" issued, valid for {} days", name, ttl.num_days());
    Ok(token)
}

/// The secret the server will verify with: `JWT_SECRET` wins over the file.
fn signing_secret(config: &Config) -> Option<String> {
    std::env::var("JWT_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| Some(config.secret_key.clone()).filter(|s| !s.is_empty()))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
