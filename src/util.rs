use base64::prelude::*;

/// 以 URL 安全、無填充的 Base64 編碼輸入資料。
pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// 解碼 URL 安全、無填充的 Base64 字串。
#[cfg(test)]
pub(crate) fn base64url_decode<T: ?Sized + AsRef<[u8]>>(
    input: &T,
) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL_SAFE_NO_PAD.decode(input)
}
