use std::fmt;

use log::info;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    client::{acme_error, body, decode, Client, Result},
    payload::ChallengePayload,
};

/// 本客戶端可自動處理的挑戰類型。
pub const HTTP_01: &str = "http-01";

/// http-01 挑戰檔案所在的路徑前綴。
pub const HTTP01_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// 表示授權或挑戰的狀態，只能由 CA 的回應決定。
///
/// `pending` 為初始狀態，`valid` 與 `invalid` 為終結狀態。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Pending,
    Processing,
    Valid,
    Invalid,
    Revoked,
    /// 無法辨識的狀態，保留原始字串。
    Unknown(String),
}

impl Status {
    /// 返回狀態對應的字串表示。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Revoked => "revoked",
            Self::Unknown(s) => s,
        }
    }

    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid | Self::Revoked)
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            "revoked" => Self::Revoked,
            _ => Self::Unknown(s),
        }
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型，例如 `http-01`。
    #[serde(rename = "type", default)]
    pub type_: String,
    /// 挑戰的 URI，用於回應挑戰及查詢其狀態。
    #[serde(default)]
    pub uri: String,
    /// 挑戰 token，用於生成 key authorization。
    #[serde(default)]
    pub token: String,
    /// 當前挑戰狀態；CA 未提供時為 `None`。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Challenge {
    /// http-01 挑戰應提供檔案的 URL 路徑。
    pub fn http01_path(&self) -> String {
        format!("{}{}", HTTP01_PATH_PREFIX, self.token)
    }
}

impl Client {
    /// 回應挑戰：以 key authorization POST 到挑戰自身的 URI。
    ///
    /// 200 與 202 皆視為成功。回傳的挑戰僅供參考，狀態轉換必須再透過輪詢授權確認。
    pub fn accept(&self, challenge: &Challenge) -> Result<Challenge> {
        const OP: &str = "challenge";
        let url = challenge.uri.as_str();

        let key_authorization = self.key().key_authorization(&challenge.token)?;
        let payload = ChallengePayload::new(&challenge.type_, key_authorization);

        let response = self.post_jws(OP, url, &payload)?;
        if !matches!(response.status(), StatusCode::OK | StatusCode::ACCEPTED) {
            return Err(acme_error(OP, url, response));
        }
        info!("accepted {} challenge at {}", challenge.type_, url);

        let body = body(OP, url, response)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(challenge.clone());
        }
        decode(OP, url, &body)
    }
}
