use serde::Serialize;
use thiserror::Error;

use crate::{
    jwk::Jwk,
    key_pair::{KeyError, KeyPair},
    util::base64url,
};

/// 定義保護頭產生過程中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 金鑰相關錯誤
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 目前唯一支援的簽章演算法。
pub const ALG_RS256: &str = "RS256";

/// 表示 JWS 保護頭部的資料結構。
///
/// draft 時代的 CA 以 `jwk` 辨識帳戶，因此每個請求都內嵌完整公鑰，不使用 `kid` 與 `url`。
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    alg: &'static str,
    /// 簽署者的公鑰
    jwk: Jwk,
    /// 用於防止重放攻擊的隨機數
    nonce: String,
}

impl ProtectedHeader {
    /// 以金鑰對與呼叫端取得的 nonce 建立保護頭。
    pub fn new(key_pair: &KeyPair, nonce: impl Into<String>) -> Result<Self> {
        Ok(Self {
            alg: ALG_RS256,
            jwk: key_pair.jwk()?,
            nonce: nonce.into(),
        })
    }

    /// 將 [`ProtectedHeader`] 序列化後轉換為 base64url 字串。
    pub fn to_base64(&self) -> Result<String> {
        let json_str = serde_json::to_string(self)?;
        Ok(base64url(json_str.as_bytes()))
    }

    /// 此保護頭攜帶的 nonce。
    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::test::test_key;
    use crate::util::base64url_decode;

    #[test]
    fn test_header_fields() -> Result<()> {
        let key = test_key();
        let header = ProtectedHeader::new(&key, "test-nonce")?;
        assert_eq!(header.nonce(), "test-nonce");

        let decoded = base64url_decode(&header.to_base64()?).unwrap();
        let value: Value = serde_json::from_slice(&decoded)?;

        assert_eq!(value["alg"], "RS256");
        assert_eq!(value["nonce"], "test-nonce");
        assert_eq!(value["jwk"]["kty"], "RSA");
        assert_eq!(value["jwk"]["e"], "AQAB");
        assert!(value.get("url").is_none());
        assert!(value.get("kid").is_none());
        Ok(())
    }
}
