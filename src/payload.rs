use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::base64url;

/// 載荷驗證失敗時的錯誤。
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, PayloadError>;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化、反序列化，並提供轉換成 JSON 字串的功能，
/// 同時必須實作自定義的驗證邏輯。每個載荷都帶有 draft 協議要求的 `resource` 欄位。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    ///
    /// # 錯誤
    ///
    /// 若序列化失敗，則回傳 [`serde_json::Error`]。
    fn to_json_string(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 載荷的 `resource` 值，用於記錄請求。
    fn resource(&self) -> &str;

    /// 驗證載荷資料是否符合預期的規範。
    ///
    /// # 錯誤
    ///
    /// 若驗證失敗，則回傳 [`PayloadError::Invalid`]。
    fn validate(&self) -> Result<()>;
}

/// 新帳戶註冊使用的 `resource` 值。
pub const RESOURCE_NEW_REG: &str = "new-reg";
/// 查詢與更新帳戶使用的 `resource` 值。
pub const RESOURCE_REG: &str = "reg";
/// 建立授權使用的 `resource` 值。
pub const RESOURCE_NEW_AUTHZ: &str = "new-authz";
/// 回應挑戰使用的 `resource` 值。
pub const RESOURCE_CHALLENGE: &str = "challenge";
/// 申請憑證使用的 `resource` 值。
pub const RESOURCE_NEW_CERT: &str = "new-cert";

/// 將聯絡資訊補上 URI scheme；已帶有 scheme（如 `mailto:`、`tel:`）者保持不變。
pub fn normalize_contact(contact: &str) -> String {
    if contact.contains(':') {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

/// 表示帳戶註冊、查詢與更新所需的載荷資料。
///
/// 聯絡資訊為空時不送出 `contact`，未同意條款時不送出 `agreement`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegPayload {
    resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    contact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agreement: Option<String>,
}

impl RegPayload {
    /// 建立新帳戶註冊（`new-reg`）的載荷。
    pub fn new_reg(contact: Vec<String>, agreement: Option<String>) -> Self {
        RegPayload {
            resource: RESOURCE_NEW_REG.to_string(),
            contact,
            agreement,
        }
    }

    /// 建立帳戶查詢或更新（`reg`）的載荷；查詢時兩個欄位皆留空。
    pub fn reg(contact: Vec<String>, agreement: Option<String>) -> Self {
        RegPayload {
            resource: RESOURCE_REG.to_string(),
            contact,
            agreement,
        }
    }
}

impl PayloadT for RegPayload {
    fn resource(&self) -> &str {
        &self.resource
    }

    /// 驗證帳戶載荷資料：
    ///
    /// - 聯絡資訊必須是帶有 scheme 的 URI。
    /// - 條款 URI 若提供則不得為空。
    fn validate(&self) -> Result<()> {
        for contact in &self.contact {
            if !contact.contains(':') {
                return Err(PayloadError::Invalid(format!(
                    "contact {:?} is not a URI",
                    contact
                )));
            }
        }
        if matches!(self.agreement.as_deref(), Some("")) {
            return Err(PayloadError::Invalid("agreement cannot be empty".into()));
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述需授權的網域。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub value: String,
}

impl Identifier {
    /// 建立一個 `dns` 類型的識別項。
    pub fn dns(domain: impl Into<String>) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: domain.into(),
        }
    }
}

/// 表示建立新授權時所需的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuthzPayload {
    resource: String,
    pub identifier: Identifier,
}

impl NewAuthzPayload {
    /// 為指定網域建立 `new-authz` 載荷。
    pub fn new(domain: &str) -> Self {
        NewAuthzPayload {
            resource: RESOURCE_NEW_AUTHZ.to_string(),
            identifier: Identifier::dns(domain),
        }
    }
}

impl PayloadT for NewAuthzPayload {
    fn resource(&self) -> &str {
        &self.resource
    }

    /// 驗證授權載荷資料：識別項類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<()> {
        if self.identifier.type_ != "dns" {
            return Err(PayloadError::Invalid("identifier type must be 'dns'".into()));
        }
        if self.identifier.value.is_empty() {
            return Err(PayloadError::Invalid("identifier value cannot be empty".into()));
        }
        Ok(())
    }
}

/// 表示回應挑戰的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePayload {
    resource: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengePayload {
    /// 以挑戰類型與 key authorization 建立載荷。
    pub fn new(type_: &str, key_authorization: String) -> Self {
        ChallengePayload {
            resource: RESOURCE_CHALLENGE.to_string(),
            type_: type_.to_string(),
            key_authorization,
        }
    }
}

impl PayloadT for ChallengePayload {
    fn resource(&self) -> &str {
        &self.resource
    }

    /// 驗證挑戰載荷：key authorization 必須為 `token.thumbprint` 形式。
    fn validate(&self) -> Result<()> {
        match self.key_authorization.split_once('.') {
            Some((token, thumbprint)) if !token.is_empty() && !thumbprint.is_empty() => Ok(()),
            _ => Err(PayloadError::Invalid(
                "keyAuthorization must be token.thumbprint".into(),
            )),
        }
    }
}

/// 表示申請憑證時所需的載荷資料。
///
/// CSR 以 base64url 編碼的 DER 傳送；有效期間以 RFC 3339 表示，未指定時省略。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCertPayload {
    resource: String,
    csr: String,
    #[serde(rename = "notBefore", default, skip_serializing_if = "Option::is_none")]
    not_before: Option<String>,
    #[serde(rename = "notAfter", default, skip_serializing_if = "Option::is_none")]
    not_after: Option<String>,
}

impl NewCertPayload {
    /// 以 DER 編碼的 CSR 與可選的有效期間建立載荷。
    pub fn new(
        csr_der: &[u8],
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        let rfc3339 = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);

        NewCertPayload {
            resource: RESOURCE_NEW_CERT.to_string(),
            csr: base64url(csr_der),
            not_before: not_before.map(rfc3339),
            not_after: not_after.map(rfc3339),
        }
    }
}

impl PayloadT for NewCertPayload {
    fn resource(&self) -> &str {
        &self.resource
    }

    /// 驗證憑證載荷：CSR 不得為空，且 `notBefore` 必須早於 `notAfter`。
    fn validate(&self) -> Result<()> {
        if self.csr.is_empty() {
            return Err(PayloadError::Invalid("csr cannot be empty".into()));
        }
        if let (Some(before), Some(after)) = (&self.not_before, &self.not_after) {
            let before = DateTime::parse_from_rfc3339(before)
                .map_err(|e| PayloadError::Invalid(e.to_string()))?;
            let after = DateTime::parse_from_rfc3339(after)
                .map_err(|e| PayloadError::Invalid(e.to_string()))?;
            if before >= after {
                return Err(PayloadError::Invalid("notBefore must precede notAfter".into()));
            }
        }
        Ok(())
    }
}
