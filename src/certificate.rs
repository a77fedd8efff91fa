use std::{
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use openssl::{nid::Nid, x509::X509};
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    client::{acme_error, body, Client, ClientError, Result},
    error::RetryError,
    headers,
    payload::NewCertPayload,
};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Issuer chain is longer than {0} certificates")]
    ChainTooLong(usize),
}

/// 跟隨 `Link: rel="up"` 取得中繼憑證的最大次數。
pub const MAX_CHAIN_LEN: usize = 5;

/// X.509 證書封裝結構。
#[derive(Debug, Clone)]
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    /// 從 DER 編碼建立 `Certificate`。
    pub fn from_der(der: &[u8]) -> std::result::Result<Self, CertificateError> {
        Ok(Certificate {
            cert: X509::from_der(der)?,
        })
    }

    /// 從 PEM 編碼建立 `Certificate`。
    pub fn from_pem(pem: &[u8]) -> std::result::Result<Self, CertificateError> {
        Ok(Certificate {
            cert: X509::from_pem(pem)?,
        })
    }

    pub fn to_der(&self) -> std::result::Result<Vec<u8>, CertificateError> {
        Ok(self.cert.to_der()?)
    }

    pub fn to_pem(&self) -> std::result::Result<Vec<u8>, CertificateError> {
        Ok(self.cert.to_pem()?)
    }

    /// 依序串接整條憑證鏈的 PEM。
    pub fn chain_to_pem(chain: &[Certificate]) -> std::result::Result<Vec<u8>, CertificateError> {
        let mut pem = Vec::new();
        for cert in chain {
            pem.extend(cert.to_pem()?);
        }
        Ok(pem)
    }

    /// 主體的 Common Name，不存在時回傳 `None`。
    pub fn common_name(&self) -> Option<String> {
        self.cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|s| s.to_string())
    }
}

/// 取得憑證的結果：已簽發，或要求稍後重試。
#[derive(Debug)]
pub enum CertFetch {
    /// 憑證（與要求時附上的中繼憑證），葉憑證在最前面。
    Ready(Vec<Certificate>),
    /// 憑證尚未簽發，應等待後重試。
    Retry(RetryError),
}

impl Client {
    /// 以 DER 編碼的 CSR 申請憑證，預期回應 201。
    ///
    /// CA 可能立即在內容中回傳 DER 憑證，也可能只給 `Location` 讓呼叫端稍後以
    /// [`Client::fetch_cert`] 取得；兩者皆為成功，後者回傳 `None`。
    pub fn create_cert(
        &self,
        url: &str,
        csr_der: &[u8],
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<(Option<Certificate>, String)> {
        const OP: &str = "new-cert";

        let payload = NewCertPayload::new(csr_der, not_before, not_after);
        let response = self.post_jws(OP, url, &payload)?;
        if response.status() != StatusCode::CREATED {
            return Err(acme_error(OP, url, response));
        }

        let cert_url = headers::location(response.headers()).unwrap_or_default();
        let body = body(OP, url, response)?;

        if body.is_empty() {
            if cert_url.is_empty() {
                return Err(ClientError::MissingLocation {
                    op: OP,
                    url: url.to_string(),
                });
            }
            info!("certificate pending at {}", cert_url);
            return Ok((None, cert_url));
        }

        Ok((Some(Certificate::from_der(&body)?), cert_url))
    }

    /// 取得憑證；`bundle` 為真時一併沿著 `Link: rel="up"` 取得中繼憑證。
    ///
    /// 200 回傳憑證，其他 2xx 代表尚未簽發，回傳帶有 `Retry-After` 時間（預設 3 秒）的
    /// [`CertFetch::Retry`]，非 2xx 則為錯誤。
    pub fn fetch_cert(&self, url: &str, bundle: bool) -> Result<CertFetch> {
        const OP: &str = "cert";

        let response = self.get(OP, url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(acme_error(OP, url, response));
        }
        if status != StatusCode::OK {
            let wait = headers::retry_after_or_default(response.headers());
            debug!("certificate at {} not ready, retry after {:?}", url, wait);
            return Ok(CertFetch::Retry(RetryError(wait)));
        }

        let mut up = headers::link(response.headers(), "up");
        let mut chain = vec![Certificate::from_der(&body(OP, url, response)?)?];

        while bundle {
            let Some(issuer_url) = up.take() else {
                break;
            };
            if chain.len() > MAX_CHAIN_LEN {
                return Err(CertificateError::ChainTooLong(MAX_CHAIN_LEN).into());
            }

            let response = self.get(OP, &issuer_url)?;
            if response.status() != StatusCode::OK {
                return Err(acme_error(OP, &issuer_url, response));
            }
            up = headers::link(response.headers(), "up");
            chain.push(Certificate::from_der(&body(OP, &issuer_url, response)?)?);
        }

        Ok(CertFetch::Ready(chain))
    }

    /// 重複呼叫 [`Client::fetch_cert`]，依每次的重試時間等待，直到取得憑證、發生錯誤或超過 `timeout`。
    pub fn wait_cert(&self, url: &str, bundle: bool, timeout: Duration) -> Result<Vec<Certificate>> {
        let start = Instant::now();

        loop {
            let wait = match self.fetch_cert(url, bundle)? {
                CertFetch::Ready(chain) => return Ok(chain),
                CertFetch::Retry(retry) => retry.after(),
            };

            let elapsed = start.elapsed();
            if elapsed + wait > timeout {
                return Err(ClientError::Timeout {
                    op: "certificate",
                    waited: elapsed,
                });
            }
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use actix_web::HttpResponse;

    use super::*;
    use crate::{
        csr::Csr,
        test::{base_url, self_signed, test_client, test_key, verify_jws, TestServer},
    };

    fn csr_der() -> Vec<u8> {
        Csr::new("example.com").build_der(&test_key()).unwrap()
    }

    #[test]
    fn test_create_cert_with_body() {
        let der = self_signed("example.com");
        let server = TestServer::new(move |req, _| {
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/cert/1", base_url(req))))
                .body(der.clone())
        });
        let client = test_client();

        let (cert, url) = client
            .create_cert(&server.url("/new-cert"), &csr_der(), None, None)
            .unwrap();
        assert_eq!(cert.unwrap().common_name().as_deref(), Some("example.com"));
        assert_eq!(url, server.url("/cert/1"));

        let (_, payload) = verify_jws(&server.calls()[0].body, client.key());
        assert_eq!(payload["resource"], "new-cert");
        assert!(payload.get("notBefore").is_none());
        assert!(!payload["csr"].as_str().unwrap().contains('='));
    }

    #[test]
    fn test_pem_chain() {
        let leaf = Certificate::from_der(&self_signed("example.com")).unwrap();
        let issuer = Certificate::from_der(&self_signed("Fake Issuer")).unwrap();

        let pem = Certificate::chain_to_pem(&[leaf.clone(), issuer]).unwrap();
        let text = String::from_utf8(pem.clone()).unwrap();
        assert_eq!(text.matches("-----BEGIN CERTIFICATE-----").count(), 2);

        let first = Certificate::from_pem(&pem).unwrap();
        assert_eq!(first.to_der().unwrap(), leaf.to_der().unwrap());
    }

    #[test]
    fn test_create_cert_without_body() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/cert/1", base_url(req))))
                .finish()
        });

        let (cert, url) = test_client()
            .create_cert(&server.url("/new-cert"), &csr_der(), None, None)
            .unwrap();
        assert!(cert.is_none());
        assert_eq!(url, server.url("/cert/1"));
    }

    #[test]
    fn test_create_cert_error() {
        let server = TestServer::new(|_, _| {
            HttpResponse::BadRequest()
                .body(r#"{"type":"urn:acme:error:badCSR","detail":"key too short"}"#)
        });

        let err = test_client()
            .create_cert(&server.url("/new-cert"), &csr_der(), None, None)
            .unwrap_err();
        assert_eq!(err.acme().unwrap().kind, crate::error::ErrorType::BadCsr);
    }

    #[test]
    fn test_fetch_cert_not_ready() {
        let server = TestServer::new(|req, _| {
            if req.path() == "/default" {
                HttpResponse::Accepted().finish()
            } else {
                HttpResponse::Accepted()
                    .insert_header(("Retry-After", "10"))
                    .finish()
            }
        });
        let client = test_client();

        match client.fetch_cert(&server.url("/explicit"), false).unwrap() {
            CertFetch::Retry(retry) => assert_eq!(retry.after(), Duration::from_secs(10)),
            other => panic!("unexpected result: {other:?}"),
        }
        match client.fetch_cert(&server.url("/default"), false).unwrap() {
            CertFetch::Retry(retry) => assert_eq!(retry.after(), Duration::from_secs(3)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_fetch_cert_bundles_chain() {
        let leaf = self_signed("example.com");
        let issuer = self_signed("Fake Issuer");
        let server = TestServer::new(move |req, _| {
            if req.path() == "/cert/1" {
                HttpResponse::Ok()
                    .insert_header(("Link", format!(r#"<{}/issuer>;rel="up""#, base_url(req))))
                    .body(leaf.clone())
            } else {
                HttpResponse::Ok().body(issuer.clone())
            }
        });
        let client = test_client();

        let CertFetch::Ready(chain) = client.fetch_cert(&server.url("/cert/1"), true).unwrap() else {
            panic!("certificate not ready");
        };
        let names: Vec<_> = chain.iter().filter_map(Certificate::common_name).collect();
        assert_eq!(names, vec!["example.com", "Fake Issuer"]);

        let CertFetch::Ready(single) = client.fetch_cert(&server.url("/cert/1"), false).unwrap()
        else {
            panic!("certificate not ready");
        };
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_fetch_cert_stops_runaway_chain() {
        let der = self_signed("loop");
        let server = TestServer::new(move |req, _| {
            HttpResponse::Ok()
                .insert_header(("Link", format!(r#"<{}/cert>;rel="up""#, base_url(req))))
                .body(der.clone())
        });

        let err = test_client()
            .fetch_cert(&server.url("/cert"), true)
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Certificate(CertificateError::ChainTooLong(MAX_CHAIN_LEN))
        ));
    }

    #[test]
    fn test_wait_cert_retries_until_ready() {
        let der = self_signed("example.com");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let server = TestServer::new(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                HttpResponse::Accepted()
                    .insert_header(("Retry-After", "0"))
                    .finish()
            } else {
                HttpResponse::Ok().body(der.clone())
            }
        });

        let chain = test_client()
            .wait_cert(&server.url("/cert/1"), false, Duration::from_secs(5))
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_cert_times_out() {
        let server = TestServer::new(|_, _| {
            HttpResponse::Accepted()
                .insert_header(("Retry-After", "1"))
                .finish()
        });

        let err = test_client()
            .wait_cert(&server.url("/cert/1"), false, Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { op: "certificate", .. }));
    }
}
