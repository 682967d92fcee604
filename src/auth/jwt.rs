use anyhow::Context;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{Claims, TokenKind};
use crate::{
    config::JwtConfig,
    error::{AppError, AppResult},
};

/// Signing material and default lifetime for one token class.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub ttl: Duration,
}

impl TokenKeys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Keys for the three token classes.
#[derive(Clone)]
pub struct JwtKeys {
    pub access: TokenKeys,
    pub refresh: TokenKeys,
    pub reset: TokenKeys,
    pub issuer: String,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access: TokenKeys::new(&cfg.access_secret, Duration::minutes(cfg.access_ttl_minutes)),
            refresh: TokenKeys::new(&cfg.refresh_secret, Duration::days(cfg.refresh_ttl_days)),
            reset: TokenKeys::new(&cfg.reset_secret, Duration::minutes(cfg.reset_ttl_minutes)),
            issuer: cfg.issuer.clone(),
        }
    }

    fn keys(&self, kind: TokenKind) -> &TokenKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::Reset => &self.reset,
        }
    }

    /// Signs a token for `subject`. `lifetime` falls back to the class default.
    pub fn issue_token(
        &self,
        subject: &str,
        lifetime: Option<Duration>,
        kind: TokenKind,
    ) -> AppResult<String> {
        self.issue_token_at(subject, lifetime, kind, OffsetDateTime::now_utc())
    }

    pub fn issue_token_at(
        &self,
        subject: &str,
        lifetime: Option<Duration>,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> AppResult<String> {
        let keys = self.keys(kind);
        let exp = now + lifetime.unwrap_or(keys.ttl);
        let claims = Claims {
            sub: subject.to_string(),
            exp: exp.unix_timestamp(),
            iat: now.unix_timestamp(),
            iss: self.issuer.clone(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .context("jwt encode failed")?;
        debug!(kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Access and refresh token for one user, in that order.
    pub fn generate_tokens(&self, user_id: i64) -> AppResult<(String, String)> {
        let subject = user_id.to_string();
        Ok((
            self.issue_token(&subject, None, TokenKind::Access)?,
            self.issue_token(&subject, None, TokenKind::Refresh)?,
        ))
    }

    pub fn decode_access_token(&self, token: &str) -> AppResult<Claims> {
        self.decode_access_token_at(token, OffsetDateTime::now_utc())
    }

    pub fn decode_access_token_at(&self, token: &str, now: OffsetDateTime) -> AppResult<Claims> {
        self.verify(token, TokenKind::Access, now)
            .ok_or_else(|| AppError::Authentication("Could not validate credentials".into()))
    }

    /// Returns the subject of a valid refresh token.
    pub fn decode_refresh_token(&self, token: &str) -> AppResult<String> {
        self.decode_refresh_token_at(token, OffsetDateTime::now_utc())
    }

    pub fn decode_refresh_token_at(&self, token: &str, now: OffsetDateTime) -> AppResult<String> {
        self.verify(token, TokenKind::Refresh, now)
            .map(|claims| claims.sub)
            .ok_or_else(|| AppError::Authentication("Invalid refresh token".into()))
    }

    pub fn issue_reset_token(&self, email: &str) -> AppResult<String> {
        self.issue_token(email, None, TokenKind::Reset)
    }

    /// The email a reset token was issued for, or `None` for anything invalid.
    pub fn verify_reset_token(&self, token: &str) -> Option<String> {
        self.verify_reset_token_at(token, OffsetDateTime::now_utc())
    }

    pub fn verify_reset_token_at(&self, token: &str, now: OffsetDateTime) -> Option<String> {
        self.verify(token, TokenKind::Reset, now).map(|claims| claims.sub)
    }

    // Expiry is checked here rather than by jsonwebtoken so the clock can be
    // injected. `exp` is compared against `now` at full precision: a token is
    // valid at the instant of `exp` and rejected any time after it.
    fn verify(&self, token: &str, kind: TokenKind, now: OffsetDateTime) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let claims = match decode::<Claims>(token, &self.keys(kind).decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, kind = ?kind, "jwt rejected");
                return None;
            }
        };
        if claims.kind != kind {
            debug!(expected = ?kind, got = ?claims.kind, "jwt of the wrong class");
            return None;
        }
        let expired = match OffsetDateTime::from_unix_timestamp(claims.exp) {
            Ok(expires_at) => now > expires_at,
            Err(_) => true,
        };
        if expired {
            debug!(kind = ?kind, "jwt expired");
            return None;
        }
        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(access: &str, refresh: &str, reset: &str, issuer: &str) -> JwtConfig {
        JwtConfig {
            access_secret: access.into(),
            refresh_secret: refresh.into(),
            reset_secret: reset.into(),
            issuer: issuer.into(),
            access_ttl_minutes: 60,
            refresh_ttl_days: 7,
            reset_ttl_minutes: 15,
        }
    }

    fn make_keys() -> JwtKeys {
        JwtKeys::from_config(&config("access-secret", "refresh-secret", "reset-secret", "test-issuer"))
    }

    fn t0() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn generated_pair_decodes_per_class() {
        let keys = make_keys();
        let (access, refresh) = keys.generate_tokens(42).expect("sign pair");

        let claims = keys.decode_access_token(&access).expect("access decodes");
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 60 * 60);

        assert_eq!(keys.decode_refresh_token(&refresh).expect("refresh decodes"), "42");
    }

    #[test]
    fn classes_are_not_interchangeable() {
        let keys = make_keys();
        let (access, refresh) = keys.generate_tokens(7).unwrap();

        let err = keys.decode_access_token(&refresh).unwrap_err();
        assert!(matches!(err, AppError::Authentication(ref m) if m == "Could not validate credentials"));
        assert!(keys.decode_refresh_token(&access).is_err());
        assert!(keys.verify_reset_token(&access).is_none());
    }

    #[test]
    fn kind_claim_is_checked_even_with_shared_secret() {
        let keys = JwtKeys::from_config(&config("same", "same", "same", "iss"));
        let (access, refresh) = keys.generate_tokens(1).unwrap();
        assert!(keys.decode_access_token(&refresh).is_err());
        assert!(keys.decode_refresh_token(&access).is_err());
    }

    #[test]
    fn expiry_boundary_has_no_leeway() {
        let keys = make_keys();
        let now = OffsetDateTime::from_unix_timestamp(t0().unix_timestamp()).unwrap();
        let token = keys
            .issue_token_at("5", Some(Duration::seconds(60)), TokenKind::Access, now)
            .unwrap();

        assert!(keys.decode_access_token_at(&token, now + Duration::seconds(59)).is_ok());
        assert!(keys.decode_access_token_at(&token, now + Duration::seconds(60)).is_ok());
        assert!(keys
            .decode_access_token_at(&token, now + Duration::seconds(60) + Duration::milliseconds(1))
            .is_err());
        assert!(keys.decode_access_token_at(&token, now + Duration::seconds(61)).is_err());
    }

    #[test]
    fn expiry_is_compared_below_the_second() {
        let keys = make_keys();
        // 1_000_000.1 s; `exp` is stored in whole seconds as 1_000_060
        let issued = OffsetDateTime::from_unix_timestamp_nanos(1_000_000_100_000_000).unwrap();
        let token = keys
            .issue_token_at("5", Some(Duration::seconds(60)), TokenKind::Access, issued)
            .unwrap();

        let at_exp = OffsetDateTime::from_unix_timestamp(1_000_060).unwrap();
        assert!(keys.decode_access_token_at(&token, at_exp).is_ok());
        assert!(keys
            .decode_access_token_at(&token, issued + Duration::milliseconds(60_800))
            .is_err());
    }

    #[test]
    fn reset_token_lives_fifteen_minutes() {
        let keys = make_keys();
        let now = t0();
        let token = keys
            .issue_token_at("ann@example.com", None, TokenKind::Reset, now)
            .unwrap();

        assert_eq!(
            keys.verify_reset_token_at(&token, now + Duration::minutes(14)).as_deref(),
            Some("ann@example.com")
        );
        assert!(keys.verify_reset_token_at(&token, now + Duration::minutes(16)).is_none());
        assert!(keys.verify_reset_token("garbage").is_none());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let ours = make_keys();
        let theirs = JwtKeys::from_config(&config("access-secret", "refresh-secret", "reset-secret", "other"));
        let (access, _) = theirs.generate_tokens(3).unwrap();
        assert!(ours.decode_access_token(&access).is_err());
    }
}
