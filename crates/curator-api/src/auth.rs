//! Basic authentication and password digests
//!
//! Requests carry `Authorization: Basic`; the credential is checked against
//! the users table. Passwords are stored as `salt$hex(sha256(salt:password))`
//! and never in the clear.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

use curator_core::domain::User;
use curator_core::ports::IMetadataRepository;

use crate::types::ApiError;

/// Extracts (user, password) from a basic-auth header value
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Produces the storable digest of a password under a fresh salt
pub fn digest_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{salt}${}", digest_with_salt(&salt, password))
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verifies a password against a stored digest
pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    digest_with_salt(salt, password) == digest
}

/// Resolves the authenticated user from an optional Authorization header
///
/// `None` (no header, malformed header, unknown user, wrong password) is
/// uniformly `AuthenticationFailed`; callers cannot distinguish the cases.
pub async fn authenticate(
    repository: &dyn IMetadataRepository,
    header: Option<&str>,
) -> Result<User, ApiError> {
    let header = header.ok_or(ApiError::AuthenticationFailed)?;
    let (name, password) = parse_basic(header).ok_or(ApiError::AuthenticationFailed)?;

    let user = repository
        .get_user(&name)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::AuthenticationFailed)?;
    if !verify_password(&user.password_digest, &password) {
        return Err(ApiError::AuthenticationFailed);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let header = format!("Basic {}", BASE64.encode("obs:secret"));
        assert_eq!(
            parse_basic(&header),
            Some(("obs".to_string(), "secret".to_string()))
        );
        assert_eq!(parse_basic("Bearer token"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
    }

    #[test]
    fn test_password_digest_roundtrip() {
        let stored = digest_password("hunter2");
        assert!(verify_password(&stored, "hunter2"));
        assert!(!verify_password(&stored, "hunter3"));
        assert!(!verify_password("malformed", "hunter2"));
    }

    #[test]
    fn test_digests_are_salted() {
        assert_ne!(digest_password("same"), digest_password("same"));
    }
}
