use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use tokio::task;

use crate::error::{Error, Result};

/// Hash a room password with Argon2id (64 MB, 3 iterations, 4 lanes,
/// 32-byte output). CPU-bound, so it runs on a blocking thread.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();

    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = argon2id()?;
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("Failed to hash room password: {e}")))?
            .to_string();
        Ok(hash)
    })
    .await
    .map_err(|e| Error::Internal(format!("Password hashing task failed: {e}")))?
}

/// Verify a join password against the room's stored PHC string.
/// CPU-bound, so it runs on a blocking thread.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();

    task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&hash)
            .map_err(|e| Error::Internal(format!("Invalid password hash format: {e}")))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Internal(format!("Password verification failed: {e}"))),
        }
    })
    .await
    .map_err(|e| Error::Internal(format!("Password verification task failed: {e}")))?
}

fn argon2id() -> Result<Argon2<'static>> {
    let params = ParamsBuilder::new()
        .m_cost(65536)
        .t_cost(3)
        .p_cost(4)
        .output_len(32)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build Argon2 params: {e}")))?;
    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify_roundtrip() {
        let hash = hash_password("movie-night-secret").await.unwrap();
        // PHC format: $argon2id$v=19$m=65536,t=3,p=4$...
        assert!(hash.starts_with("$argon2id$"));

        assert!(verify_password("movie-night-secret", &hash).await.unwrap());
        assert!(!verify_password("wrong-password", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_salts_differ_per_hash() {
        let hash1 = hash_password("same-password").await.unwrap();
        let hash2 = hash_password("same-password").await.unwrap();
        assert_ne!(hash1, hash2);
        assert!(verify_password("same-password", &hash2).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_hash_is_internal_error() {
        let err = verify_password("pw", "not-a-phc-string").await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
