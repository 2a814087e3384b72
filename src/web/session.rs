//! Signed bearer tokens. The signature proves the payload; the `sessions`
//! table decides whether the session is still alive.

use crate::domain::models::UserRole;
use axum::http::HeaderMap;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: UserRole,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
    #[error("bad role")]
    Role,
}

pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
    pub expires_at: DateTime<Utc>,
}

pub fn sign_session(
    user_id: Uuid,
    role: UserRole,
    key: &[u8],
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<IssuedToken, SessionError> {
    let expires_at = now + ttl;
    let claims = SessionClaims {
        session_id: Uuid::new_v4(),
        user_id,
        role,
        exp: expires_at.timestamp(),
    };
    let payload = format!(
        "{}|{}|{}|{}",
        claims.session_id,
        claims.user_id,
        claims.role.as_str(),
        claims.exp
    );
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    let token = format!(
        "{}.{}",
        general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        general_purpose::URL_SAFE_NO_PAD.encode(sig)
    );
    Ok(IssuedToken {
        token,
        claims,
        expires_at,
    })
}

pub fn verify_session(token: &str, key: &[u8], now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes).map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    let [session_id, user_id, role, exp] = pieces.as_slice() else {
        return Err(SessionError::Invalid);
    };
    let session_id = Uuid::parse_str(session_id).map_err(|_| SessionError::Invalid)?;
    let user_id = Uuid::parse_str(user_id).map_err(|_| SessionError::Invalid)?;
    let role = UserRole::try_from(*role).map_err(|_| SessionError::Role)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if now.timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims {
        session_id,
        user_id,
        role,
        exp,
    })
}

/// Bearer header first, then the `session` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Ok(value)) = headers.get(axum::http::header::AUTHORIZATION).map(|v| v.to_str()) {
        if let Some(bearer) = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
            let bearer = bearer.trim();
            if !bearer.is_empty() {
                return Some(bearer.to_string());
            }
        }
    }
    let cookie = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookie
        .split(';')
        .filter_map(|pair| pair.trim().strip_prefix("session="))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure_flag}",
        max_age.num_seconds().max(0)
    )
}

pub fn clear_session_cookie() -> &'static str {
    "session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn signed_token_verifies() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let issued = sign_session(user, UserRole::Inspector, KEY, Duration::hours(1), now).unwrap();
        let claims = verify_session(&issued.token, KEY, now).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.role, UserRole::Inspector);
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let now = Utc::now();
        let issued = sign_session(Uuid::new_v4(), UserRole::Teacher, KEY, Duration::hours(1), now).unwrap();

        let other_key = b"ffffffffffffffffffffffffffffffff";
        assert_eq!(verify_session(&issued.token, other_key, now), Err(SessionError::Signature));

        let forged_payload = general_purpose::URL_SAFE_NO_PAD.encode(format!(
            "{}|{}|admin|{}",
            issued.claims.session_id, issued.claims.user_id, issued.claims.exp
        ));
        let (_, sig) = issued.token.split_once('.').unwrap();
        assert_eq!(
            verify_session(&format!("{forged_payload}.{sig}"), KEY, now),
            Err(SessionError::Signature)
        );
        assert_eq!(verify_session("garbage", KEY, now), Err(SessionError::Invalid));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let issued = sign_session(Uuid::new_v4(), UserRole::Sg, KEY, Duration::minutes(5), now).unwrap();
        let later = now + Duration::minutes(6);
        assert_eq!(verify_session(&issued.token, KEY, later), Err(SessionError::Expired));
    }

    #[test]
    fn bearer_header_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def"));
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn session_cookie_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; session=tok.sig"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("tok.sig"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from.header"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("from.header"));
    }

    #[test]
    fn cookie_carries_max_age() {
        let cookie = session_cookie("abc", Duration::hours(12), true);
        assert!(cookie.starts_with("session=abc;"));
        assert!(cookie.contains("Max-Age=43200"));
        assert!(cookie.ends_with("; Secure"));
        assert!(!session_cookie("abc", Duration::hours(1), false).contains("Secure"));
    }
}
