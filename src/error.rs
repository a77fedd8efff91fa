//! ACME 錯誤分類：將 CA 回應轉換為具型別的 [`AcmeError`]，
//! 並定義代表「稍後重試」的 [`RetryError`] 訊號。

use std::{fmt, time::Duration};

use reqwest::blocking::Response;
use serde::Deserialize;
use thiserror::Error;

/// ACME draft 預先定義的錯誤類型。
///
/// 無法辨識或缺少的類型以 [`ErrorType::Other`] 原樣保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// CSR 無法接受（例如金鑰過短）。
    BadCsr,
    /// 客戶端送出的 anti-replay nonce 無法接受。
    BadNonce,
    /// 伺服器無法連線至客戶端進行驗證。
    Connection,
    /// 伺服器無法驗證 DNSSEC 簽署的網域。
    Dnssec,
    /// 請求格式錯誤。
    Malformed,
    /// 伺服器內部錯誤。
    ServerInternal,
    /// 驗證期間發生 TLS 錯誤。
    Tls,
    /// 客戶端權限不足。
    Unauthorized,
    /// 伺服器無法解析網域名稱。
    UnknownHost,
    /// 請求超過速率限制。
    RateLimited,
    /// 未列舉的類型，保留原始字串（可能為空）。
    Other(String),
}

impl ErrorType {
    const PREFIX: &'static str = "urn:acme:error:";

    /// 根據 URN 字串取得對應的錯誤類型。
    pub fn from_urn(urn: &str) -> Self {
        let Some(name) = urn.strip_prefix(Self::PREFIX) else {
            return Self::Other(urn.to_owned());
        };

        match name {
            "badCSR" => Self::BadCsr,
            "badNonce" => Self::BadNonce,
            "connection" => Self::Connection,
            "dnssec" => Self::Dnssec,
            "malformed" => Self::Malformed,
            "serverInternal" => Self::ServerInternal,
            "tls" => Self::Tls,
            "unauthorized" => Self::Unauthorized,
            "unknownHost" => Self::UnknownHost,
            "rateLimited" => Self::RateLimited,
            _ => Self::Other(urn.to_owned()),
        }
    }

    /// 返回錯誤類型的完整 URN。
    pub fn as_urn(&self) -> &str {
        match self {
            Self::BadCsr => "urn:acme:error:badCSR",
            Self::BadNonce => "urn:acme:error:badNonce",
            Self::Connection => "urn:acme:error:connection",
            Self::Dnssec => "urn:acme:error:dnssec",
            Self::Malformed => "urn:acme:error:malformed",
            Self::ServerInternal => "urn:acme:error:serverInternal",
            Self::Tls => "urn:acme:error:tls",
            Self::Unauthorized => "urn:acme:error:unauthorized",
            Self::UnknownHost => "urn:acme:error:unknownHost",
            Self::RateLimited => "urn:acme:error:rateLimited",
            Self::Other(urn) => urn,
        }
    }
}

impl Default for ErrorType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_urn())
    }
}

/// CA 回報的錯誤，建立後不可變。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status} {kind}: {detail}")]
pub struct AcmeError {
    /// 數值狀態碼；JSON 內容提供時優先，否則為 HTTP 狀態碼。
    pub status: u16,
    /// 錯誤類型。
    pub kind: ErrorType,
    /// 人類可讀的說明。
    pub detail: String,
}

#[derive(Deserialize)]
struct ProblemBody {
    status: Option<u16>,
    #[serde(rename = "type")]
    kind: Option<String>,
    detail: Option<String>,
}

impl AcmeError {
    /// 根據 HTTP 狀態碼、狀態列與回應內容建立錯誤。
    ///
    /// 內容可解析為 JSON problem 時採用其中的欄位（`status` 優先於 HTTP 狀態碼）；
    /// 否則 `detail` 為原始內容，內容為空時再退回狀態列文字。
    pub fn from_parts(status: u16, status_line: &str, body: &[u8]) -> Self {
        if let Ok(problem) = serde_json::from_slice::<ProblemBody>(body) {
            return AcmeError {
                status: problem.status.unwrap_or(status),
                kind: problem
                    .kind
                    .as_deref()
                    .map(ErrorType::from_urn)
                    .unwrap_or_default(),
                detail: problem.detail.unwrap_or_default(),
            };
        }

        let detail = String::from_utf8_lossy(body).into_owned();
        AcmeError {
            status,
            kind: ErrorType::default(),
            detail: if detail.is_empty() {
                status_line.to_owned()
            } else {
                detail
            },
        }
    }

    /// 讀取回應內容並分類成 [`AcmeError`]。讀取內容失敗時視為空內容。
    pub fn from_response(response: Response) -> Self {
        let status = response.status();
        let status_line = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        let body = response.bytes().unwrap_or_default();

        Self::from_parts(status.as_u16(), status_line.trim_end(), &body)
    }

    /// 是否為 `badNonce` 錯誤。
    pub fn is_bad_nonce(&self) -> bool {
        self.kind == ErrorType::BadNonce
    }

    /// 是否為 `rateLimited` 錯誤。
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ErrorType::RateLimited
    }
}

/// 「上一個操作應於指定時間後重試」的控制訊號。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("retry after {0:?}")]
pub struct RetryError(pub Duration);

impl RetryError {
    /// 建議等待的時間。
    pub fn after(&self) -> Duration {
        self.0
    }
}
