//! Opaque token transport format.
//!
//! The platform hands the client a credential of the form
//! `<verifyURL>~<signature>`, percent-encoded in transit. The verification
//! URL may itself contain `~`, so the rightmost separator is authoritative.

use crate::error::GatewayError;

/// Separator between the verification URL and the signature.
pub const TOKEN_SEPARATOR: char = '~';

/// Canonical query parameter carrying the token.
pub const TOKEN_PARAM: &str = "openplatform";

/// Legacy parameter name still accepted on inbound requests, carrying the
/// same encoded value.
pub const TOKEN_PARAM_LEGACY: &str = "op";

/// A decoded token: where to verify, and the signature to verify with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub verify_url: String,
    pub signature: String,
}

impl ParsedToken {
    /// Reassemble the transport form (not re-encoded).
    pub fn to_raw(&self) -> String {
        format!("{}{}{}", self.verify_url, TOKEN_SEPARATOR, self.signature)
    }
}

/// Parse a transport-form token.
///
/// Percent-decodes exactly once, then splits on the rightmost separator.
/// A bare URL without a separator is a distinct, rejected shape — not an
/// unsigned token.
pub fn parse(raw: &str) -> Result<ParsedToken, GatewayError> {
    let decoded = urlencoding::decode(raw).map_err(|_| {
        GatewayError::MalformedToken("token is not valid percent-encoded UTF-8".to_string())
    })?;

    let Some(idx) = decoded.rfind(TOKEN_SEPARATOR) else {
        return Err(GatewayError::MalformedToken(
            "token has no '~' separator".to_string(),
        ));
    };

    let verify_url = &decoded[..idx];
    let signature = &decoded[idx + TOKEN_SEPARATOR.len_utf8()..];

    if verify_url.is_empty() {
        return Err(GatewayError::MalformedToken(
            "token has an empty verification URL".to_string(),
        ));
    }
    if signature.is_empty() {
        return Err(GatewayError::MalformedToken(
            "token has an empty signature".to_string(),
        ));
    }

    Ok(ParsedToken {
        verify_url: verify_url.to_string(),
        signature: signature.to_string(),
    })
}

/// Extract the raw — still percent-encoded — token value from a query
/// string. The canonical parameter wins over the legacy alias.
///
/// Values are deliberately not decoded here: [`parse`] performs the single
/// percent-decode, so tokens containing literal `%` survive intact.
pub fn token_from_query(query: &str) -> Option<&str> {
    let mut legacy = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if value.is_empty() {
            continue;
        }
        match key {
            TOKEN_PARAM => return Some(value),
            TOKEN_PARAM_LEGACY => legacy = legacy.or(Some(value)),
            _ => {}
        }
    }
    legacy
}
