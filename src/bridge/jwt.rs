//! Best-effort JWT payload decode (§4.4): the bridge's bearer token is
//! opaque as far as the upstream contract goes, but in practice is
//! JWT-shaped. No signature is verified — there is no local key
//! material to verify against — this is purely a diagnostic/secondary
//! expiry cross-check, never the source of truth.

use base64::Engine;
use serde_json::Value;
use tracing::debug;

/// Best-effort extraction of the `exp` claim from a JWT's payload
/// segment. Returns `None` on anything that doesn't parse — a decode
/// failure here is never fatal (§4.4).
pub fn decode_exp_claim(token: &str) -> Option<i64> {
    let payload_segment = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_segment).ok().or_else(|| {
        base64::engine::general_purpose::STANDARD_NO_PAD.decode(payload_segment).ok()
    })?;
    let value: Value = serde_json::from_slice(&decoded)
        .inspect_err(|e| debug!(error = %e, "jwt payload decode failed"))
        .ok()?;
    value.get("exp").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn fake_jwt(exp: i64) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_exp_from_well_formed_jwt() {
        assert_eq!(decode_exp_claim(&fake_jwt(1_700_000_000)), Some(1_700_000_000));
    }

    #[test]
    fn returns_none_for_garbage() {
        assert_eq!(decode_exp_claim("not-a-jwt"), None);
        assert_eq!(decode_exp_claim("a.b"), None);
    }
}
