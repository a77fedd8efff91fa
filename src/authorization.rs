//! 網域授權：建立、查詢與輪詢至終結狀態。

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    challenge::{Challenge, Status, HTTP_01},
    client::{acme_error, body, decode, Client, ClientError, Result},
    headers,
    issue::IssueOptions,
    payload::{Identifier, NewAuthzPayload},
};

/// CA 願意接受的挑戰清單與可行組合。
///
/// `combinations` 中的每一組是指向 `challenges` 的索引，完成任一組即可滿足授權。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSet {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub combinations: Vec<Vec<usize>>,
}

impl ChallengeSet {
    /// 挑選可單獨滿足授權的 http-01 挑戰。
    ///
    /// 未列出組合時，任何 http-01 挑戰皆可；否則只考慮只含單一挑戰的組合。
    pub fn http01(&self) -> Option<&Challenge> {
        if self.combinations.is_empty() {
            return self.challenges.iter().find(|c| c.type_ == HTTP_01);
        }

        self.combinations
            .iter()
            .filter_map(|combo| match combo.as_slice() {
                [i] => self.challenges.get(*i),
                _ => None,
            })
            .find(|c| c.type_ == HTTP_01)
    }
}

/// 表示 CA 對某個識別項的授權。
///
/// `status` 為必要欄位，缺少時解碼失敗。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(flatten)]
    pub challenge_set: ChallengeSet,
    #[serde(default)]
    pub identifier: Identifier,
    pub status: Status,
    /// 授權的 URI，來自 `Location` 標頭或查詢時使用的 URL。
    #[serde(skip)]
    pub uri: String,
    /// 查詢回應中的 `Retry-After`。
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl Client {
    /// 為 `domain` 建立新授權，預期回應 201 且帶有 `Location`。
    ///
    /// 新建授權的狀態必須是 `pending`；已驗證過的網域可能直接回傳 `valid`，同樣接受。
    /// 其他狀態視為協議錯誤。
    pub fn authorize(&self, url: &str, domain: &str) -> Result<Authorization> {
        const OP: &str = "new-authz";

        let response = self.post_jws(OP, url, &NewAuthzPayload::new(domain))?;
        if response.status() != StatusCode::CREATED {
            return Err(acme_error(OP, url, response));
        }

        let uri = headers::location(response.headers()).ok_or_else(|| {
            ClientError::MissingLocation {
                op: OP,
                url: url.to_string(),
            }
        })?;
        let mut authz: Authorization = decode(OP, url, &body(OP, url, response)?)?;
        authz.uri = uri;

        match authz.status {
            Status::Pending | Status::Valid => {
                debug!("authorization {} for {} is {}", authz.uri, domain, authz.status);
                Ok(authz)
            }
            _ => Err(ClientError::UnexpectedStatus {
                op: OP,
                url: url.to_string(),
                status: authz.status.to_string(),
            }),
        }
    }

    /// 以未簽名的 GET 查詢授權，只接受 200。
    pub fn get_authz(&self, url: &str) -> Result<Authorization> {
        const OP: &str = "authz";

        let response = self.get(OP, url)?;
        if response.status() != StatusCode::OK {
            return Err(acme_error(OP, url, response));
        }

        let retry_after = headers::retry_after(response.headers());
        let mut authz: Authorization = decode(OP, url, &body(OP, url, response)?)?;
        authz.uri = url.to_string();
        authz.retry_after = retry_after;

        Ok(authz)
    }

    /// 輪詢授權直到 `valid`、其他終結狀態或超過 `opts.authz_timeout`。
    ///
    /// 輪詢時的傳輸錯誤只記錄，不中止輪詢；CA 回報的錯誤則直接回傳。
    pub fn wait_authorization(
        &self,
        uri: &str,
        domain: &str,
        opts: &IssueOptions,
    ) -> Result<Authorization> {
        self.wait_authorization_until(uri, domain, opts, &AtomicBool::new(false))
    }

    /// 同 [`Client::wait_authorization`]，但 `cancel` 被設定時於下次輪詢前回傳
    /// [`ClientError::Cancelled`]。
    pub fn wait_authorization_until(
        &self,
        uri: &str,
        domain: &str,
        opts: &IssueOptions,
        cancel: &AtomicBool,
    ) -> Result<Authorization> {
        let start = Instant::now();

        loop {
            if cancel.load(Ordering::SeqCst) {
                debug!("stop polling authorization for {}", domain);
                return Err(ClientError::Cancelled {
                    domain: domain.to_string(),
                });
            }

            let wait = match self.get_authz(uri) {
                Ok(authz) => match authz.status {
                    Status::Valid => {
                        info!("{} authorized", domain);
                        return Ok(authz);
                    }
                    Status::Invalid => {
                        return Err(ClientError::AuthorizationInvalid {
                            domain: domain.to_string(),
                            uri: uri.to_string(),
                        })
                    }
                    ref status if status.is_terminal() => {
                        return Err(ClientError::UnexpectedStatus {
                            op: "authz",
                            url: uri.to_string(),
                            status: status.to_string(),
                        })
                    }
                    ref status => {
                        debug!("authorization for {} is {}", domain, status);
                        authz.retry_after.unwrap_or(opts.poll_interval)
                    }
                },
                Err(err @ ClientError::Transport { .. }) => {
                    warn!("polling authorization for {}: {}", domain, err);
                    opts.poll_interval
                }
                Err(err) => return Err(err),
            };

            let elapsed = start.elapsed();
            if elapsed + wait > opts.authz_timeout {
                return Err(ClientError::Timeout {
                    op: "authorization",
                    waited: elapsed,
                });
            }
            sleep_unless(cancel, wait);
        }
    }
}

/// 睡眠 `wait`，期間每隔一小段時間檢查 `cancel`，被設定時提早返回。
fn sleep_unless(cancel: &AtomicBool, wait: Duration) {
    const STEP: Duration = Duration::from_millis(100);

    let until = Instant::now() + wait;
    while !cancel.load(Ordering::SeqCst) {
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        thread::sleep(left.min(STEP));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use actix_web::HttpResponse;

    use super::*;
    use crate::{
        client::ClientBuilder,
        test::{base_url, test_client, test_key, verify_jws, TestServer},
    };

    fn authz_body(base: &str, status: &str) -> String {
        format!(
            r#"{{
                "status": "{status}",
                "identifier": {{"type": "dns", "value": "example.com"}},
                "challenges": [
                    {{"type": "dns-01", "uri": "{base}/challenge/dns", "token": "token-dns"}},
                    {{"type": "http-01", "status": "pending", "uri": "{base}/challenge/http", "token": "token-http"}}
                ],
                "combinations": [[0], [1]]
            }}"#
        )
    }

    fn fast_options() -> IssueOptions {
        IssueOptions {
            poll_interval: Duration::from_millis(10),
            authz_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_authorize() {
        let server = TestServer::new(|req, _| {
            let base = base_url(req);
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/authz/1", base)))
                .body(authz_body(&base, "pending"))
        });
        let client = test_client();

        let authz = client
            .authorize(&server.url("/new-authz"), "example.com")
            .unwrap();

        assert_eq!(authz.uri, server.url("/authz/1"));
        assert_eq!(authz.status, Status::Pending);
        assert_eq!(authz.identifier, Identifier::dns("example.com"));
        assert_eq!(authz.challenge_set.challenges.len(), 2);
        assert_eq!(authz.challenge_set.combinations, vec![vec![0], vec![1]]);

        let http = authz.challenge_set.http01().unwrap();
        assert_eq!(http.uri, server.url("/challenge/http"));
        assert_eq!(http.token, "token-http");
        assert_eq!(http.status, Some(Status::Pending));

        let (_, payload) = verify_jws(&server.calls()[0].body, client.key());
        assert_eq!(payload["resource"], "new-authz");
        assert_eq!(payload["identifier"]["type"], "dns");
        assert_eq!(payload["identifier"]["value"], "example.com");
    }

    #[test]
    fn test_authorize_rejects_unexpected_status() {
        let server = TestServer::new(|req, _| {
            let base = base_url(req);
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/authz/1", base)))
                .body(authz_body(&base, "invalid"))
        });

        let err = test_client()
            .authorize(&server.url("/new-authz"), "example.com")
            .unwrap_err();
        match err {
            ClientError::UnexpectedStatus { op, status, .. } => {
                assert_eq!(op, "new-authz");
                assert_eq!(status, "invalid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_authorize_requires_status() {
        let server = TestServer::new(|req, _| {
            let base = base_url(req);
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/authz/1", base)))
                .body(format!(
                    r#"{{
                        "identifier": {{"type": "dns", "value": "example.com"}},
                        "challenges": [{{"type": "http-01", "uri": "{base}/challenge/http", "token": "t"}}]
                    }}"#
                ))
        });

        let err = test_client()
            .authorize(&server.url("/new-authz"), "example.com")
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode { op: "new-authz", .. }));
    }

    #[test]
    fn test_authorize_accepts_already_valid() {
        let server = TestServer::new(|req, _| {
            let base = base_url(req);
            HttpResponse::Created()
                .insert_header(("Location", format!("{}/authz/1", base)))
                .body(authz_body(&base, "valid"))
        });

        let authz = test_client()
            .authorize(&server.url("/new-authz"), "example.com")
            .unwrap();
        assert_eq!(authz.status, Status::Valid);
    }

    #[test]
    fn test_authorize_requires_location() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Created().body(authz_body(&base_url(req), "pending"))
        });

        let err = test_client()
            .authorize(&server.url("/new-authz"), "example.com")
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingLocation { .. }));
    }

    #[test]
    fn test_get_authz_is_idempotent() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Ok()
                .insert_header(("Retry-After", "7"))
                .body(authz_body(&base_url(req), "pending"))
        });
        let client = test_client();
        let url = server.url("/authz/1");

        let first = client.get_authz(&url).unwrap();
        let second = client.get_authz(&url).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.uri, url);
        assert_eq!(first.retry_after, Some(Duration::from_secs(7)));
        assert!(server.requests().iter().all(|r| r.method == "GET"));
    }

    #[test]
    fn test_wait_authorization_until_valid() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let server = TestServer::new(move |req, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = if n < 2 { "pending" } else { "valid" };
            HttpResponse::Ok().body(authz_body(&base_url(req), status))
        });

        let authz = test_client()
            .wait_authorization(&server.url("/authz/1"), "example.com", &fast_options())
            .unwrap();
        assert_eq!(authz.status, Status::Valid);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_authorization_invalid() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Ok().body(authz_body(&base_url(req), "invalid"))
        });
        let uri = server.url("/authz/1");

        let err = test_client()
            .wait_authorization(&uri, "example.com", &fast_options())
            .unwrap_err();
        match err {
            ClientError::AuthorizationInvalid { domain, uri: got } => {
                assert_eq!(domain, "example.com");
                assert_eq!(got, uri);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wait_authorization_stops_on_revoked() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Ok().body(authz_body(&base_url(req), "revoked"))
        });
        let opts = IssueOptions {
            authz_timeout: Duration::from_secs(30),
            ..fast_options()
        };
        let start = Instant::now();

        let err = test_client()
            .wait_authorization(&server.url("/authz/1"), "example.com", &opts)
            .unwrap_err();
        match err {
            ClientError::UnexpectedStatus { op, status, .. } => {
                assert_eq!(op, "authz");
                assert_eq!(status, "revoked");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.calls().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_authorization_survives_transport_error() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let server = TestServer::new(move |req, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                // 第一次查詢超過客戶端逾時，客戶端只會看到傳輸錯誤。
                std::thread::sleep(Duration::from_millis(600));
            }
            HttpResponse::Ok().body(authz_body(&base_url(req), "valid"))
        });
        let client = ClientBuilder::new(test_key())
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let authz = client
            .wait_authorization(&server.url("/authz/1"), "example.com", &fast_options())
            .unwrap();
        assert_eq!(authz.status, Status::Valid);
        assert!(polls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_wait_authorization_cancelled() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Ok()
                .insert_header(("Retry-After", "30"))
                .body(authz_body(&base_url(req), "pending"))
        });
        let opts = IssueOptions {
            authz_timeout: Duration::from_secs(60),
            ..fast_options()
        };
        let cancel = AtomicBool::new(false);
        let client = test_client();
        let uri = server.url("/authz/1");
        let start = Instant::now();

        let err = std::thread::scope(|scope| {
            let poller =
                scope.spawn(|| client.wait_authorization_until(&uri, "example.com", &opts, &cancel));
            std::thread::sleep(Duration::from_millis(200));
            cancel.store(true, Ordering::SeqCst);
            poller.join().unwrap().unwrap_err()
        });

        assert!(matches!(err, ClientError::Cancelled { ref domain } if domain == "example.com"));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(server.calls().len(), 1);
    }

    #[test]
    fn test_wait_authorization_times_out() {
        let server = TestServer::new(|req, _| {
            HttpResponse::Ok().body(authz_body(&base_url(req), "pending"))
        });
        let opts = IssueOptions {
            poll_interval: Duration::from_millis(20),
            authz_timeout: Duration::from_millis(100),
            ..Default::default()
        };

        let err = test_client()
            .wait_authorization(&server.url("/authz/1"), "example.com", &opts)
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { op: "authorization", .. }));
    }

    #[test]
    fn test_http01_requires_single_challenge_combination() {
        let set = ChallengeSet {
            challenges: vec![
                Challenge {
                    type_: "dns-01".to_string(),
                    ..Default::default()
                },
                Challenge {
                    type_: HTTP_01.to_string(),
                    ..Default::default()
                },
            ],
            combinations: vec![vec![0, 1]],
        };
        assert!(set.http01().is_none());

        let open = ChallengeSet {
            combinations: Vec::new(),
            ..set
        };
        assert_eq!(open.http01().unwrap().type_, HTTP_01);
    }
}
