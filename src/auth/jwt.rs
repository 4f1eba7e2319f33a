use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::extractors::Principal;
use crate::{
    config::{JwtConfig, ProviderConfig},
    state::AppState,
};

/// Payload of tokens we issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>, // session row created at login
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Payload of tokens issued by the third-party provider. `sub` is opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct ProviderKeys {
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    pub provider: Option<ProviderKeys>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt, state.config.provider.as_ref())
    }
}

fn validation(issuer: &str, audience: &str) -> Validation {
    let mut validation = Validation::default();
    validation.set_audience(&[audience]);
    validation.set_issuer(&[issuer]);
    validation
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig, provider: Option<&ProviderConfig>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            provider: provider.map(|p| ProviderKeys {
                decoding: DecodingKey::from_secret(p.secret.as_bytes()),
                issuer: p.issuer.clone(),
                audience: p.audience.clone(),
            }),
        }
    }

    pub fn sign(&self, user_id: Uuid, session_id: Option<Uuid>) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            sid: session_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &validation(&self.issuer, &self.audience))?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_provider(&self, token: &str) -> anyhow::Result<ProviderClaims> {
        let Some(provider) = &self.provider else {
            anyhow::bail!("no identity provider configured");
        };
        let data = decode::<ProviderClaims>(
            token,
            &provider.decoding,
            &validation(&provider.issuer, &provider.audience),
        )?;
        debug!(subject = %data.claims.sub, "provider jwt verified");
        Ok(data.claims)
    }

    /// Our own tokens first, then the provider's.
    pub fn authenticate(&self, token: &str) -> anyhow::Result<Principal> {
        match self.verify(token) {
            Ok(claims) => Ok(Principal::Local {
                user_id: claims.sub,
                session_id: claims.sid,
            }),
            Err(local_err) if self.provider.is_some() => {
                let claims = self
                    .verify_provider(token)
                    .map_err(|e| e.context(format!("local: {local_err}")))?;
                Ok(Principal::External {
                    subject: claims.sub,
                    email: claims.email,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use serde_json::json;

    fn make_keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    fn provider_token(secret: &str, sub: &str) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = json!({
            "sub": sub,
            "email": "ext@example.com",
            "iat": now,
            "exp": now + 300,
            "iss": "https://idp.example",
            "aud": "tessellate",
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sign_and_verify() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let token = keys.sign(user_id, Some(sid)).expect("sign");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, Some(sid));
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[tokio::test]
    async fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys();
        let mut cfg = AppState::fake().config.jwt.clone();
        cfg.issuer = "other-issuer".into();
        let bad = JwtKeys::new(&cfg, None);
        let token = good.sign(Uuid::new_v4(), None).unwrap();
        assert!(bad.verify(&token).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let mut token = keys.sign(Uuid::new_v4(), None).unwrap();
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }

    #[tokio::test]
    async fn authenticate_local_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id, None).unwrap();
        assert_eq!(
            keys.authenticate(&token).unwrap(),
            Principal::Local {
                user_id,
                session_id: None
            }
        );
    }

    #[tokio::test]
    async fn authenticate_falls_back_to_provider() {
        let keys = make_keys();
        let token = provider_token("provider-secret", "auth0|abc");
        let principal = keys.authenticate(&token).unwrap();
        assert_eq!(
            principal,
            Principal::External {
                subject: "auth0|abc".into(),
                email: Some("ext@example.com".into()),
            }
        );
        assert_eq!(principal.user_id(), None);
    }

    #[tokio::test]
    async fn provider_token_with_wrong_secret_is_rejected() {
        let keys = make_keys();
        let token = provider_token("not-the-secret", "auth0|abc");
        assert!(keys.authenticate(&token).is_err());
    }

    #[tokio::test]
    async fn provider_tokens_rejected_without_provider() {
        let cfg = AppState::fake().config.jwt.clone();
        let keys = JwtKeys::new(&cfg, None);
        let token = provider_token("provider-secret", "auth0|abc");
        assert!(keys.authenticate(&token).is_err());
    }
}
