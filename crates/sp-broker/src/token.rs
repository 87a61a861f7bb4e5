//! Access-token lifecycle for the live gateway.
//!
//! Tokens are cached in memory, mirrored to a persistent row so a restart
//! inside the validity window reuses the token, and refreshed
//! `refresh_lead` before expiry. A failed refresh is an AUTHENTICATION
//! error: it surfaces to the operator and must not trip the kill switch.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{BrokerError, BrokerErrorKind};
use crate::retry::RetryPolicy;

const BROKER_NAME: &str = "gateway";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Usable iff it outlives the refresh lead from `now`.
    fn is_fresh(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        self.expires_at - lead > now
    }
}

#[derive(Debug, Clone)]
pub struct TokenCredentials {
    pub app_key: String,
    pub app_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds until expiry.
    expires_in: i64,
}

pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    creds: TokenCredentials,
    refresh_lead: Duration,
    cached: RwLock<Option<AccessToken>>,
    /// Persistent fallback; `None` in tests without a database.
    pool: Option<PgPool>,
}

impl TokenManager {
    pub fn new(
        token_url: impl Into<String>,
        creds: TokenCredentials,
        refresh_lead_ms: i64,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("http client"),
            token_url: token_url.into(),
            creds,
            refresh_lead: Duration::milliseconds(refresh_lead_ms),
            cached: RwLock::new(None),
            pool,
        }
    }

    /// Current access token, refreshing when inside the lead window.
    pub async fn current(&self) -> Result<AccessToken, BrokerError> {
        let now = Utc::now();

        if let Some(tok) = self.cached.read().await.as_ref() {
            if tok.is_fresh(now, self.refresh_lead) {
                return Ok(tok.clone());
            }
        }

        // Single refresher at a time; re-check under the write lock.
        let mut cached = self.cached.write().await;
        if let Some(tok) = cached.as_ref() {
            if tok.is_fresh(now, self.refresh_lead) {
                return Ok(tok.clone());
            }
        }

        // Persisted fallback (a previous process may have issued one).
        if cached.is_none() {
            if let Some(stored) = self.load_persisted().await {
                let tok = AccessToken {
                    token: stored.access_token,
                    expires_at: stored.expires_at,
                };
                if tok.is_fresh(now, self.refresh_lead) {
                    info!("reusing persisted broker token");
                    *cached = Some(tok.clone());
                    return Ok(tok);
                }
            }
        }

        let tok = self.issue().await?;
        self.persist(&tok).await;
        *cached = Some(tok.clone());
        Ok(tok)
    }

    async fn load_persisted(&self) -> Option<sp_db::tokens::StoredToken> {
        let pool = self.pool.as_ref()?;
        match sp_db::tokens::load(pool, BROKER_NAME).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "persisted token load failed, issuing fresh");
                None
            }
        }
    }

    async fn persist(&self, tok: &AccessToken) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let stored = sp_db::tokens::StoredToken {
            broker: BROKER_NAME.to_string(),
            access_token: tok.token.clone(),
            expires_at: tok.expires_at,
        };
        if let Err(e) = sp_db::tokens::upsert(pool, &stored).await {
            // Cache still holds the token; only the restart fallback is lost.
            warn!(error = %e, "persisting broker token failed");
        }
    }

    /// Exchange credentials for a token. Retries transport faults on the
    /// query policy; anything else maps to AUTHENTICATION.
    async fn issue(&self) -> Result<AccessToken, BrokerError> {
        let resp: TokenResponse = RetryPolicy::QUERY
            .run(|| async {
                let resp = self
                    .http
                    .post(&self.token_url)
                    .json(&serde_json::json!({
                        "grant_type": "client_credentials",
                        "appkey": self.creds.app_key,
                        "appsecret": self.creds.app_secret,
                    }))
                    .send()
                    .await
                    .map_err(|e| BrokerError::network(e.to_string()))?;

                let status = resp.status();
                if status.is_server_error() {
                    return Err(BrokerError::new(
                        BrokerErrorKind::ServerError,
                        format!("token endpoint returned {status}"),
                    ));
                }
                if !status.is_success() {
                    return Err(BrokerError::authentication(format!(
                        "token issue rejected with {status}"
                    )));
                }
                resp.json::<TokenResponse>()
                    .await
                    .map_err(|e| BrokerError::authentication(format!("token decode failed: {e}")))
            })
            .await
            .map_err(|e| match e.kind {
                BrokerErrorKind::Authentication => e,
                // Exhausted transport retries on the auth endpoint still
                // surface as an authentication problem to the operator.
                _ => BrokerError::authentication(e.to_string()),
            })?;

        Ok(AccessToken {
            token: resp.access_token,
            expires_at: Utc::now() + Duration::seconds(resp.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_respects_lead() {
        let now = Utc::now();
        let tok = AccessToken {
            token: "t".into(),
            expires_at: now + Duration::minutes(10),
        };
        assert!(tok.is_fresh(now, Duration::minutes(5)));
        assert!(!tok.is_fresh(now, Duration::minutes(10)));
        assert!(!tok.is_fresh(now + Duration::minutes(6), Duration::minutes(5)));
    }
}
