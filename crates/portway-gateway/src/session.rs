//! Client-held session artifact.
//!
//! The gateway is stateless: no server-side session table exists. The
//! only durable form of a session is the `session_profile` cookie, whose
//! value is the verified profile JSON itself. Client-side code reads it to
//! render identity state immediately, which is why the cookie is
//! deliberately not HTTP-only — an explicit confidentiality/usability
//! tradeoff. Expiry rides on `Max-Age`; the browser drops the cookie when
//! it lapses.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{GatewayError, Result};
use crate::profile::VerifiedProfile;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session_profile";

/// Session lifetime, mirrored in the cookie `Max-Age`.
pub const SESSION_TTL_SECS: i64 = 86_400;

/// Time-bounded artifact derived from a verified profile.
///
/// Created only after a verification call has returned success; there is
/// no update operation — a new token always issues a fresh session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub profile: VerifiedProfile,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Issue a fresh session expiring 24 hours from now.
    pub fn issue(profile: VerifiedProfile) -> Self {
        let issued_at = Utc::now();
        Self {
            expires_at: issued_at + TimeDelta::seconds(SESSION_TTL_SECS),
            issued_at,
            profile,
        }
    }

    /// Render the session as its cookie form.
    ///
    /// `Secure` outside local development, `SameSite=Lax`, readable by
    /// client-side code. The profile JSON is percent-encoded so it
    /// survives cookie value syntax.
    pub fn to_cookie(&self, production: bool) -> Result<Cookie<'static>> {
        let json = serde_json::to_string(&self.profile)
            .map_err(|e| GatewayError::Internal(format!("failed to serialize profile: {e}")))?;
        let value = urlencoding::encode(&json).into_owned();

        Ok(Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .max_age(time::Duration::seconds(SESSION_TTL_SECS))
            .same_site(SameSite::Lax)
            .secure(production)
            .http_only(false)
            .build())
    }

    /// Read the verified profile back from a request's cookie jar.
    ///
    /// An unreadable cookie, or one without a subject identifier, reads
    /// the same as an absent one.
    pub fn read(jar: &CookieJar) -> Option<VerifiedProfile> {
        let cookie = jar.get(SESSION_COOKIE)?;
        let json = urlencoding::decode(cookie.value()).ok()?;
        match serde_json::from_str::<VerifiedProfile>(&json) {
            Ok(profile) if !profile.id.is_empty() => Some(profile),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> VerifiedProfile {
        VerifiedProfile {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            permissions: vec!["read".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_sets_24h_window() {
        let session = Session::issue(profile());
        assert_eq!(
            session.expires_at - session.issued_at,
            TimeDelta::seconds(SESSION_TTL_SECS)
        );
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = Session::issue(profile()).to_cookie(true).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::seconds(SESSION_TTL_SECS))
        );
    }

    #[test]
    fn test_cookie_not_secure_in_development() {
        let cookie = Session::issue(profile()).to_cookie(false).unwrap();
        assert_eq!(cookie.secure(), Some(false));
    }

    #[test]
    fn test_read_round_trips_profile() {
        let original = profile();
        let cookie = Session::issue(original.clone()).to_cookie(false).unwrap();
        let jar = CookieJar::new().add(cookie);
        assert_eq!(Session::read(&jar), Some(original));
    }

    #[test]
    fn test_read_rejects_garbage_and_identity_less_values() {
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "not json"));
        assert_eq!(Session::read(&jar), None);

        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "{}"));
        assert_eq!(Session::read(&jar), None);

        assert_eq!(Session::read(&CookieJar::new()), None);
    }
}
