use log::debug;
use reqwest::{blocking::Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};

use crate::client::{acme_error, body, decode, transport, Client, Result};

const OP: &str = "directory";

/// 表示 ACME 目錄中的四個端點 URL。
///
/// 取得後即不再變動；重新探索時整個替換。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "new-reg", default)]
    pub reg_url: String,
    /// 用於建立授權的 API 路徑。
    #[serde(rename = "new-authz", default)]
    pub authz_url: String,
    /// 用於申請憑證的 API 路徑。
    #[serde(rename = "new-cert", default)]
    pub cert_url: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revoke-cert", default)]
    pub revoke_url: String,
}

impl Endpoint {
    /// 以未簽名的 GET 取得目錄；只接受 200，其餘狀態碼交由錯誤分類處理。
    pub fn discover(http: &HttpClient, url: &str) -> Result<Self> {
        let response = http
            .get(url)
            .send()
            .map_err(|source| transport(OP, url, source))?;
        if response.status() != StatusCode::OK {
            return Err(acme_error(OP, url, response));
        }

        let endpoint: Endpoint = decode(OP, url, &body(OP, url, response)?)?;
        debug!("discovered {}: {:?}", url, endpoint);
        Ok(endpoint)
    }
}

impl Client {
    /// 以此客戶端的 HTTP 設定探索 CA 目錄。
    pub fn discover(&self, url: &str) -> Result<Endpoint> {
        Endpoint::discover(self.http(), url)
    }
}
