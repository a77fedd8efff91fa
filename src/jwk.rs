use openssl::{
    pkey::HasPublic,
    rsa::Rsa,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::base64url;

/// JWK相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(#[from] openssl::error::ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，目前僅支援 RSA 格式。
///
/// 此列舉序列化後即為 JWS protected header 中的 `jwk` 欄位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
}

/// RSA 格式的 JWK 結構，`n`、`e` 為大端序、無前導零的 base64url 字串。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    n: String,
    e: String,
}

impl RsaJwk {
    /// 產生 RFC 7638 規定的正規化 JSON 表示。
    ///
    /// 成員依字典序排列（`e`、`kty`、`n`），且不含多餘空白。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據 RSA 公鑰參數建立 JWK。
    pub fn from_rsa<T: HasPublic>(rsa: &Rsa<T>) -> Self {
        Jwk::Rsa(RsaJwk {
            n: base64url(&rsa.n().to_vec()),
            e: base64url(&rsa.e().to_vec()),
        })
    }

    /// 將 JWK 轉換為符合 RFC 7638 的正規化 JSON 字串。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Rsa(jwk) => jwk.to_acme_json(),
        }
    }

    /// 計算 RFC 7638 JWK thumbprint：正規化 JSON 的 SHA-256 摘要，以 base64url 編碼。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let hash = sha256(self.to_acme_json()?.as_bytes());
        Ok(base64url(&hash))
    }
}
