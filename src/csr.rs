use std::result;

use openssl::{
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Empty common name")]
    EmptyCommonName,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// 表示一個 CSR 建構器，主體為 common name，並將 common name 與額外網域放入 SAN 擴展。
///
/// # 範例
///
/// ```no_run
/// # use acme_draft::{csr::Csr, key_pair::KeyPair};
/// let key_pair = KeyPair::generate(None).unwrap();
/// let der = Csr::new("example.com")
///     .san("www.example.com")
///     .build_der(&key_pair)
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Csr {
    common_name: String,
    san_entries: Vec<String>,
}

impl Csr {
    /// 以 common name 建立一個新的 CSR 建構器。
    pub fn new(common_name: &str) -> Self {
        Csr {
            common_name: common_name.to_string(),
            san_entries: Vec::new(),
        }
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)；重複的名稱會被忽略。
    pub fn san(mut self, dns_name: &str) -> Self {
        if dns_name != self.common_name && !self.san_entries.iter().any(|s| s == dns_name) {
            self.san_entries.push(dns_name.to_string());
        }
        self
    }

    /// 根據 common name、SAN 項目以及指定的金鑰對構建並以 SHA-256 簽署 CSR。
    pub fn build(&self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.common_name.is_empty() {
            return Err(CsrError::EmptyCommonName);
        }

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, &self.common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        san_builder.dns(&self.common_name);
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 構建 CSR 並輸出 DER 編碼，供申請憑證使用。
    pub fn build_der(&self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::test_key;

    #[test]
    fn test_csr_subject_and_signature() {
        let key = test_key();
        let der = Csr::new("example.com")
            .san("www.example.com")
            .san("example.com")
            .build_der(&key)
            .unwrap();

        let req = X509Req::from_der(&der).unwrap();
        assert!(req.verify(&key.pri_key).unwrap());

        let cn = req
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "example.com");
    }

    #[test]
    fn test_duplicate_san_is_ignored() {
        let csr = Csr::new("example.com")
            .san("example.com")
            .san("a.example.com")
            .san("a.example.com");
        assert_eq!(csr.san_entries, vec!["a.example.com".to_string()]);
    }

    #[test]
    fn test_empty_common_name() {
        assert!(matches!(
            Csr::new("").build(&test_key()),
            Err(CsrError::EmptyCommonName)
        ));
    }
}
