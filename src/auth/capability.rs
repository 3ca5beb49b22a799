use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of a minted capability.
pub fn default_ttl() -> Duration {
    Duration::hours(24)
}

/// Longest lifetime a capability may carry; longer requests clamp silently.
pub fn max_ttl() -> Duration {
    Duration::days(7)
}

/// Access level encoded in a capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityRole {
    /// Readonly participation in a room.
    View,
    /// Mutating operations within a room.
    Edit,
}

impl CapabilityRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityRole::View => "view",
            CapabilityRole::Edit => "edit",
        }
    }

    /// Role strings are matched case-sensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view" => Some(CapabilityRole::View),
            "edit" => Some(CapabilityRole::Edit),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The room-scoped capability granted by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityClaims {
    pub room_id: String,
    pub role: CapabilityRole,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("malformed capability token")]
    Malformed,
    #[error("invalid capability signature")]
    InvalidSignature,
    #[error("invalid capability role")]
    InvalidRole,
    #[error("capability token expired")]
    Expired,
    #[error("invalid capability claims: {0}")]
    InvalidClaims(&'static str),
}

/// Creates a signed token embedding the provided claims.
///
/// The token is `<b64url(payload)>.<b64url(signature)>` where the payload is
/// the pipe-joined claims and the signature is HMAC-SHA256 over the exact
/// payload bytes.
pub fn generate_capability_token(
    secret: &[u8],
    claims: &CapabilityClaims,
) -> Result<String, CapabilityError> {
    validate_claims(claims)?;

    let payload = serialize_claims(claims);
    let signature = sign_payload(secret, payload.as_bytes());
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verifies the signature and decodes the claims payload.
///
/// `now` is supplied by the caller so expiry is checked against a single
/// consistent instant.
pub fn parse_capability_token(
    secret: &[u8],
    token: &str,
    now: DateTime<Utc>,
) -> Result<CapabilityClaims, CapabilityError> {
    let mut parts = token.split('.');
    let (payload_segment, signature_segment) = match (parts.next(), parts.next(), parts.next()) {
        (Some(payload), Some(signature), None) => (payload, signature),
        _ => return Err(CapabilityError::Malformed),
    };

    let payload = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|_| CapabilityError::Malformed)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_segment)
        .map_err(|_| CapabilityError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| CapabilityError::InvalidSignature)?;
    mac.update(&payload);
    mac.verify_slice(&signature)
        .map_err(|_| CapabilityError::InvalidSignature)?;

    let claims = deserialize_claims(&payload)?;
    validate_claims(&claims)?;

    if now > claims.expires_at {
        return Err(CapabilityError::Expired);
    }

    Ok(claims)
}

/// Clamps a requested TTL into the issuing policy window.
pub fn clamp_ttl(ttl: Duration) -> Duration {
    if ttl <= Duration::zero() {
        default_ttl()
    } else if ttl > max_ttl() {
        max_ttl()
    } else {
        ttl
    }
}

fn validate_claims(claims: &CapabilityClaims) -> Result<(), CapabilityError> {
    if claims.room_id.is_empty() {
        return Err(CapabilityError::InvalidClaims("room id required"));
    }
    if claims.expires_at < claims.issued_at {
        return Err(CapabilityError::InvalidClaims("expires before issued"));
    }
    Ok(())
}

fn serialize_claims(claims: &CapabilityClaims) -> String {
    format!(
        "{}|{}|{}|{}",
        claims.room_id,
        claims.role,
        claims.issued_at.timestamp(),
        claims.expires_at.timestamp()
    )
}

fn deserialize_claims(payload: &[u8]) -> Result<CapabilityClaims, CapabilityError> {
    let payload = std::str::from_utf8(payload).map_err(|_| CapabilityError::Malformed)?;
    let fields: Vec<&str> = payload.split('|').collect();
    if fields.len() != 4 {
        return Err(CapabilityError::Malformed);
    }

    let role = CapabilityRole::parse(fields[1]).ok_or(CapabilityError::InvalidRole)?;
    let issued_at = parse_unix(fields[2])?;
    let expires_at = parse_unix(fields[3])?;

    Ok(CapabilityClaims {
        room_id: fields[0].to_string(),
        role,
        issued_at,
        expires_at,
    })
}

fn parse_unix(value: &str) -> Result<DateTime<Utc>, CapabilityError> {
    let seconds: i64 = value.parse().map_err(|_| CapabilityError::Malformed)?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(CapabilityError::Malformed)
}

fn sign_payload(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}
