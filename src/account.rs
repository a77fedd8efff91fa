//! 模塊提供 ACME 帳戶的註冊、查詢與更新。

use reqwest::{header::HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    client::{acme_error, body, decode, Client, Result},
    headers,
    payload::RegPayload,
};

/// 表示 ACME 帳戶的結構體。
///
/// 空字串代表該欄位尚未由 CA 提供。帳戶的每次變更都產生新的值，不會就地修改呼叫端持有的帳戶。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// 帳戶 URI，來自註冊回應的 `Location` 標頭。
    #[serde(default)]
    pub uri: String,
    /// 聯絡資訊，例如 `mailto:` URI。
    #[serde(default)]
    pub contact: Vec<String>,
    /// 使用者已同意的服務條款 URI。
    #[serde(rename = "agreement", default)]
    pub agreed_terms: String,
    /// CA 目前的服務條款 URI，來自 `Link: rel="terms-of-service"`。
    #[serde(rename = "terms", default)]
    pub current_terms: String,
    /// 建立授權的 URI，來自 `Link: rel="next"`。
    #[serde(default)]
    pub authz: String,
    /// 列出此帳戶授權的 URI。
    #[serde(default)]
    pub authorizations: String,
    /// 列出此帳戶憑證的 URI。
    #[serde(default)]
    pub certificates: String,
}

/// CA 回應中出現的帳戶欄位；缺少的欄位保持原值。
#[derive(Debug, Default, Deserialize)]
struct AccountPatch {
    contact: Option<Vec<String>>,
    agreement: Option<String>,
    terms: Option<String>,
    authz: Option<String>,
    authorizations: Option<String>,
    certificates: Option<String>,
}

impl Account {
    /// 以聯絡資訊建立尚未註冊的帳戶。
    pub fn new(contact: Vec<String>) -> Self {
        Account {
            contact,
            ..Default::default()
        }
    }

    /// 是否需要同意新的服務條款。
    pub fn needs_agreement(&self) -> bool {
        !self.current_terms.is_empty() && self.current_terms != self.agreed_terms
    }

    fn agreement(&self) -> Option<String> {
        (!self.agreed_terms.is_empty()).then(|| self.agreed_terms.clone())
    }

    fn apply(&mut self, patch: AccountPatch) {
        if let Some(contact) = patch.contact {
            self.contact = contact;
        }
        let fields = [
            (&mut self.agreed_terms, patch.agreement),
            (&mut self.current_terms, patch.terms),
            (&mut self.authz, patch.authz),
            (&mut self.authorizations, patch.authorizations),
            (&mut self.certificates, patch.certificates),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
    }

    fn apply_headers(&mut self, headers: &HeaderMap) {
        if let Some(uri) = headers::location(headers) {
            self.uri = uri;
        }
        if let Some(terms) = headers::link(headers, "terms-of-service") {
            self.current_terms = terms;
        }
        if let Some(authz) = headers::link(headers, "next") {
            self.authz = authz;
        }
    }
}

impl Client {
    /// 在 `url`（目錄的 `new-reg`）註冊新帳戶，預期回應 201。
    ///
    /// 回傳的帳戶以 `account` 為基礎，套用回應內容、`Location` 與 `Link` 標頭。
    pub fn register(&self, url: &str, account: &Account) -> Result<Account> {
        let payload = RegPayload::new_reg(account.contact.clone(), account.agreement());
        self.do_reg("new-reg", url, account, &payload, true)
    }

    /// 取得帳戶目前的註冊資訊；接受任何 2xx 回應。
    pub fn get_reg(&self, uri: &str) -> Result<Account> {
        let account = Account {
            uri: uri.to_string(),
            ..Default::default()
        };
        self.do_reg("reg", uri, &account, &RegPayload::reg(Vec::new(), None), false)
    }

    /// 以 `account` 的聯絡資訊與同意的條款更新帳戶；接受任何 2xx 回應。
    pub fn update_reg(&self, uri: &str, account: &Account) -> Result<Account> {
        let payload = RegPayload::reg(account.contact.clone(), account.agreement());
        self.do_reg("reg", uri, account, &payload, false)
    }

    fn do_reg(
        &self,
        op: &'static str,
        url: &str,
        base: &Account,
        payload: &RegPayload,
        created: bool,
    ) -> Result<Account> {
        let response = self.post_jws(op, url, payload)?;
        let status = response.status();
        let accepted = if created {
            status == StatusCode::CREATED
        } else {
            status.is_success()
        };
        if !accepted {
            return Err(acme_error(op, url, response));
        }

        let headers = response.headers().clone();
        let body = body(op, url, response)?;

        let mut account = base.clone();
        if !body.iter().all(u8::is_ascii_whitespace) {
            account.apply(decode::<AccountPatch>(op, url, &body)?);
        }
        account.apply_headers(&headers);

        Ok(account)
    }
}
