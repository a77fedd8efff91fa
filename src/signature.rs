use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use thiserror::Error;

use crate::{key_pair::KeyPair, util::base64url};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤。
    #[error("Signing error: {0}")]
    SigningError(#[from] openssl::error::ErrorStack),
}

/// 以 RS256（RSASSA-PKCS1-v1_5 + SHA-256）對 JWS 簽名輸入簽名。
///
/// 簽名輸入為 `header_b64 + "." + payload_b64`，回傳 base64url 編碼的簽名。
pub fn create_signature(
    header_b64: &str,
    payload_b64: &str,
    key_pair: &KeyPair,
) -> Result<String, SignatureError> {
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
    signer.update(signing_input.as_bytes())?;
    let signature = signer.sign_to_vec()?;

    Ok(base64url(&signature))
}
