use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ApiError;
use crate::routes::AppState;

pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

/// 只保存运维凭据的摘要
#[derive(Clone)]
pub struct OperatorKey {
    digest: [u8; 32],
}

impl OperatorKey {
    pub fn new(key: &str) -> Self {
        Self {
            digest: hash_key(key),
        }
    }

    /// 按摘要逐字节比较
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate = hash_key(candidate);
        self.digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OperatorKey(***)")
    }
}

fn hash_key(key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// 运维身份。作为处理器参数出现即要求请求携带有效的 `X-Operator-Key`
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(OPERATOR_KEY_HEADER) else {
            warn!(path = %parts.uri.path(), "缺少运维凭据");
            return Err(ApiError::MissingOperatorKey);
        };
        let candidate = value.to_str().map_err(|_| ApiError::InvalidOperatorKey)?;
        if state.operator_key.verify(candidate) {
            Ok(Operator)
        } else {
            warn!(path = %parts.uri.path(), "运维凭据校验失败");
            Err(ApiError::InvalidOperatorKey)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_operator_key() {
        let key = OperatorKey::new("s3cret");
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cret "));
        assert!(!key.verify(""));
    }

    #[test]
    fn test_debug_hides_digest() {
        let key = OperatorKey::new("s3cret");
        assert_eq!(format!("{key:?}"), "OperatorKey(***)");
    }
}
