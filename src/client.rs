//! 協議客戶端：持有帳戶金鑰、HTTP 客戶端與 nonce 來源，
//! 負責簽名 POST 與一般 GET，並把所有失敗歸類成 [`ClientError`]。
//!
//! 各端點的操作分別實作於 `directory`、`account`、`authorization`、
//! `challenge` 與 `certificate` 模組中的 `impl Client` 區塊。

use std::{fmt, sync::Arc, time::Duration};

use log::debug;
use reqwest::{
    blocking::{Client as HttpClient, Response},
    header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    certificate::CertificateError,
    error::AcmeError,
    jws::{Jws, JwsError},
    key_pair::{KeyError, KeyPair},
    nonce::{Nonce, NonceError, NonceT},
    payload::{PayloadError, PayloadT},
    solver::SolverError,
};

/// 協議客戶端的錯誤類型。
///
/// 傳輸錯誤、CA 回報的錯誤與協議不變量被破壞分屬不同變體，呼叫端可據此決定是否重試。
#[derive(Debug, Error)]
pub enum ClientError {
    /// 無法連上 CA（DNS、連線、逾時），不會被歸類成 ACME 錯誤。
    #[error("{op} {url}: {source}")]
    Transport {
        op: &'static str,
        url: String,
        source: reqwest::Error,
    },
    /// CA 回應了非預期的狀態碼，內容已分類為 [`AcmeError`]。
    #[error("{op} {url}: {source}")]
    Acme {
        op: &'static str,
        url: String,
        source: AcmeError,
    },
    /// 取得 nonce 失敗。
    #[error("nonce for {url}: {source}")]
    Nonce { url: String, source: NonceError },
    /// 回應缺少 `Location` 標頭。
    #[error("{op} {url}: response has no Location header")]
    MissingLocation { op: &'static str, url: String },
    /// 資源狀態違反協議（例如新建授權不是 `pending`）。
    #[error("{op} {url}: unexpected status {status:?}")]
    UnexpectedStatus {
        op: &'static str,
        url: String,
        status: String,
    },
    /// 找不到本客戶端可處理的挑戰組合。
    #[error("no supported challenge combination for {domain}")]
    NoSupportedChallenge { domain: String },
    /// 網域授權被 CA 判定為 `invalid`。
    #[error("authorization for {domain} is invalid: {uri}")]
    AuthorizationInvalid { domain: String, uri: String },
    /// 同一申請中的其他網域已失敗，停止輪詢。
    #[error("authorization for {domain} cancelled")]
    Cancelled { domain: String },
    /// 輪詢超過期限。
    #[error("{op}: timed out after {waited:?}")]
    Timeout { op: &'static str, waited: Duration },
    /// 回應內容無法解碼。
    #[error("{op} {url}: decode response: {source}")]
    Decode {
        op: &'static str,
        url: String,
        source: serde_json::Error,
    },
    /// 多網域申請中某一網域失敗。
    #[error("{domain}: {source}")]
    Domain {
        domain: String,
        source: Box<ClientError>,
    },
    #[error("HTTP client error: {0}")]
    HttpClient(reqwest::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Challenge solver error: {0}")]
    Solver(#[from] SolverError),
}

impl ClientError {
    /// 若此錯誤（或其包裝的網域錯誤）來自 CA 回報，回傳該 [`AcmeError`]。
    pub fn acme(&self) -> Option<&AcmeError> {
        match self {
            ClientError::Acme { source, .. } => Some(source),
            ClientError::Domain { source, .. } => source.acme(),
            _ => None,
        }
    }
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`ClientError`]。
pub type Result<T> = std::result::Result<T, ClientError>;

/// 簽名請求的 Content-Type。
const JOSE_JSON: &str = "application/jose+json";

/// ACME 協議客戶端。
///
/// 所有設定在建立時決定，之後只讀；可安全地在多個執行緒間共用，每個簽名請求各自取得 nonce。
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    key: KeyPair,
    nonce: Arc<dyn NonceT>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("http", &self.http)
            .field("key_bits", &self.key.key_parameters())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// 以預設設定建立客戶端。
    pub fn new(key: KeyPair) -> Result<Self> {
        ClientBuilder::new(key).build()
    }

    /// 帳戶金鑰。
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// 底層 HTTP 客戶端。
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// 取得新 nonce、簽名並 POST 載荷到 `url`。
    ///
    /// 不檢查狀態碼，由各操作自行判斷。
    pub(crate) fn post_jws<P: PayloadT>(
        &self,
        op: &'static str,
        url: &str,
        payload: &P,
    ) -> Result<Response> {
        payload.validate()?;

        let nonce = self.nonce.get(url).map_err(|source| match source {
            NonceError::RequestFailed(e) => transport(op, url, e),
            source => ClientError::Nonce {
                url: url.to_string(),
                source,
            },
        })?;
        let body = Jws::sign(payload, &self.key, &nonce)?.to_json()?;

        debug!("POST {} resource={}", url, payload.resource());
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JOSE_JSON)
            .body(body)
            .send()
            .map_err(|source| transport(op, url, source))?;
        debug!("POST {} -> {}", url, response.status());

        Ok(response)
    }

    /// 對 `url` 發出未簽名的 GET。
    pub(crate) fn get(&self, op: &'static str, url: &str) -> Result<Response> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|source| transport(op, url, source))?;
        debug!("GET {} -> {}", url, response.status());

        Ok(response)
    }
}

/// 包裝傳輸錯誤。
pub(crate) fn transport(op: &'static str, url: &str, source: reqwest::Error) -> ClientError {
    ClientError::Transport {
        op,
        url: url.to_string(),
        source,
    }
}

/// 將非預期的回應分類成 [`ClientError::Acme`]。
pub(crate) fn acme_error(op: &'static str, url: &str, response: Response) -> ClientError {
    ClientError::Acme {
        op,
        url: url.to_string(),
        source: AcmeError::from_response(response),
    }
}

/// 讀取回應內容。
pub(crate) fn body(op: &'static str, url: &str, response: Response) -> Result<Vec<u8>> {
    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|source| transport(op, url, source))
}

/// 將 JSON 內容解碼為 `T`。
pub(crate) fn decode<T: DeserializeOwned>(op: &'static str, url: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| ClientError::Decode {
        op,
        url: url.to_string(),
        source,
    })
}

/// 用於構建 [`Client`] 實例的構造器，採用 builder 模式。
pub struct ClientBuilder {
    key: KeyPair,
    timeout: Duration,
    user_agent: String,
    nonce: Option<Arc<dyn NonceT>>,
}

impl ClientBuilder {
    /// 預設的 HTTP 請求逾時。
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    /// 預設的 User-Agent。
    pub const DEFAULT_USER_AGENT: &'static str =
        concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

    /// 創建一個新的 [`ClientBuilder`] 實例，並設置預設值。
    ///
    /// 預設值包括：
    /// - HTTP 逾時：30 秒
    /// - User-Agent：`acme-draft/<版本>`
    /// - nonce 來源：對目標 URL 發出 HEAD 請求
    pub fn new(key: KeyPair) -> Self {
        ClientBuilder {
            key,
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: Self::DEFAULT_USER_AGENT.to_string(),
            nonce: None,
        }
    }

    /// 設置 HTTP 請求逾時。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 設置 User-Agent。
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 改用自訂的 nonce 來源。
    pub fn nonce_source(mut self, nonce: impl NonceT + 'static) -> Self {
        self.nonce = Some(Arc::new(nonce));
        self
    }

    /// 根據當前的配置構建 [`Client`] 實例。
    pub fn build(self) -> Result<Client> {
        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()
            .map_err(ClientError::HttpClient)?;
        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => Arc::new(Nonce::new(http.clone())),
        };

        Ok(Client {
            http,
            key: self.key,
            nonce,
        })
    }
}
