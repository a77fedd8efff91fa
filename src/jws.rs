//! 此模組提供用於處理 JSON Web Signature (JWS) 的基本結構與操作，
//! 例如對載荷簽名並序列化成 flattened JSON 字串，可直接作為 HTTP 請求內容。

use std::result;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    key_pair::KeyPair,
    payload::PayloadT,
    protection::{ProtectedHeader, ProtectionError},
    signature::{create_signature, SignatureError},
    util::base64url,
};

/// 表示一個 JSON Web Signature (JWS) 物件。
///
/// 此物件包含三個部分：
/// - `header`：保護資料，經 Base64 URL 安全編碼後的字串。
/// - `payload`：負載資料，經 Base64 URL 安全編碼後的字串。
/// - `signature`：簽名，經 Base64 URL 安全編碼後的字串。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的 header 資訊。
    #[serde(rename = "protected")]
    header: String,
    /// JWS 中的 payload 部分，經 Base64 URL 安全編碼。
    payload: String,
    /// JWS 中的簽名部分，經 Base64 URL 安全編碼。
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    /// 當 JSON 序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// 建立保護頭失敗。
    #[error("Protected header error: {0}")]
    Protection(#[from] ProtectionError),
    /// 簽名失敗。
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = result::Result<T, JwsError>;

impl Jws {
    /// 以 RS256 對載荷簽名，保護頭內嵌公鑰與給定的 nonce。
    ///
    /// 此操作不產生任何副作用；nonce 由呼叫端負責取得，且只應使用一次。
    pub fn sign<P: PayloadT>(payload: &P, key_pair: &KeyPair, nonce: &str) -> Result<Self> {
        let header = ProtectedHeader::new(key_pair, nonce)?.to_base64()?;
        let payload = base64url(payload.to_json_string()?.as_bytes());
        let signature = create_signature(&header, &payload, key_pair)?;

        Ok(Jws {
            header,
            payload,
            signature,
        })
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::payload::RegPayload;
    use crate::test::{test_key, verify_jws};

    #[test]
    fn test_sign_produces_flattened_json() -> Result<()> {
        let key = test_key();
        let payload = RegPayload::new_reg(vec!["mailto:a@example.org".to_string()], None);
        let body = Jws::sign(&payload, &key, "nonce-1")?.to_json()?;

        let value: Value = serde_json::from_str(&body)?;
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("protected"));
        assert!(obj.contains_key("payload"));
        assert!(obj.contains_key("signature"));

        let (header, payload) = verify_jws(body.as_bytes(), &key);
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["alg"], "RS256");
        assert_eq!(payload["resource"], "new-reg");
        assert_eq!(payload["contact"][0], "mailto:a@example.org");
        Ok(())
    }
}
