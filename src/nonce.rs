use log::debug;
use reqwest::blocking::Client;
use thiserror::Error;

/// 回應中攜帶 nonce 的標頭名稱。
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
///
/// 「無法發出請求」與「收到回應但沒有 nonce」是兩種不同的錯誤。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    /// 當標頭值無法轉換成字串時回傳此錯誤。
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
}

/// 定義取得 Nonce 的行為。
///
/// 每次呼叫都應回傳一個全新的 nonce，實作必須可在多個執行緒間共用。
pub trait NonceT: Send + Sync {
    /// 針對目標 URL 取得 Nonce，回傳包含 Nonce 字串或錯誤的 `Result`。
    fn get(&self, url: &str) -> Result<String, NonceError>;
}

/// 透過 HTTP HEAD 請求取得 `Replay-Nonce` 的實作。
#[derive(Debug, Clone)]
pub struct Nonce {
    client: Client,
}

impl Nonce {
    /// 以給定的 HTTP 客戶端建立 `Nonce` 實例。
    pub fn new(client: Client) -> Self {
        Nonce { client }
    }
}

impl NonceT for Nonce {
    /// 透過 HTTP HEAD 請求取得回應中的 `Replay-Nonce` 標頭。
    ///
    /// 不論狀態碼為何，只要標頭存在就回傳該 Nonce；否則回傳 `NonceError::NoNonceHeader`。
    fn get(&self, url: &str) -> Result<String, NonceError> {
        let response = self.client.head(url).send()?;
        debug!("HEAD {} -> {}", url, response.status());

        match response.headers().get(REPLAY_NONCE) {
            Some(nonce) => Ok(nonce.to_str()?.to_string()),
            None => Err(NonceError::NoNonceHeader),
        }
    }
}

/// 模擬 Nonce 實作，通常用於測試環境中提供固定的 Nonce 值。
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

impl MockNonce {
    /// 建立一個新的 `MockNonce` 實例，並指定固定的 Nonce 值。
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl NonceT for MockNonce {
    /// 直接回傳預設的 Nonce 值，忽略目標 URL。
    fn get(&self, _url: &str) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use actix_web::HttpResponse;

    use super::*;
    use crate::test::TestServer;

    #[test]
    fn test_mock_nonce() {
        let nonce = MockNonce::new("test-nonce-123");
        assert_eq!(nonce.get("https://example.com").unwrap(), "test-nonce-123");
    }

    #[test]
    fn test_nonce_read_regardless_of_status() {
        let server = TestServer::raw(|req, _| {
            if req.path() == "/bad" {
                HttpResponse::BadRequest()
                    .insert_header((REPLAY_NONCE, "nonce-b"))
                    .finish()
            } else {
                HttpResponse::Ok()
                    .insert_header((REPLAY_NONCE, "nonce-a"))
                    .finish()
            }
        });
        let nonce = Nonce::new(Client::new());

        assert_eq!(nonce.get(&server.url("/ok")).unwrap(), "nonce-a");
        assert_eq!(nonce.get(&server.url("/bad")).unwrap(), "nonce-b");
    }

    #[test]
    fn test_missing_header_is_not_found() {
        let server = TestServer::raw(|_, _| HttpResponse::Ok().finish());
        let nonce = Nonce::new(Client::new());

        assert!(matches!(
            nonce.get(&server.url("/")),
            Err(NonceError::NoNonceHeader)
        ));
    }

    #[test]
    fn test_unreachable_is_request_failure() {
        let nonce = Nonce::new(Client::new());
        assert!(matches!(
            nonce.get("http://127.0.0.1:1/"),
            Err(NonceError::RequestFailed(_))
        ));
    }
}
