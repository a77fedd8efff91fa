//! 完整的簽發流程：為每個網域取得授權後申請憑證。

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    authorization::Authorization,
    certificate::Certificate,
    challenge::{Challenge, Status},
    client::{Client, ClientError, Result},
    directory::Endpoint,
    solver::ChallengeSolver,
};

/// 簽發流程的期限與行為設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOptions {
    /// 單一網域授權的輪詢期限。
    pub authz_timeout: Duration,
    /// 等待憑證簽發的期限。
    pub cert_timeout: Duration,
    /// CA 未提供 `Retry-After` 時的輪詢間隔。
    pub poll_interval: Duration,
    /// 是否一併取得中繼憑證。
    pub bundle: bool,
    /// 是否同時為多個網域取得授權。
    pub concurrent: bool,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl Default for IssueOptions {
    fn default() -> Self {
        IssueOptions {
            authz_timeout: Duration::from_secs(10 * 60),
            cert_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(3),
            bundle: true,
            concurrent: true,
            not_before: None,
            not_after: None,
        }
    }
}

/// 為單一網域取得有效授權。
///
/// 已經有效的授權直接回傳；否則挑選 http-01 挑戰，交給 `solver` 放置 key authorization，
/// 回應挑戰後輪詢到終結狀態。只要 `present` 成功，無論結果為何都會呼叫 `cleanup`。
pub fn authorize_domain(
    client: &Client,
    endpoint: &Endpoint,
    domain: &str,
    solver: &dyn ChallengeSolver,
    opts: &IssueOptions,
) -> Result<Authorization> {
    authorize_domain_until(client, endpoint, domain, solver, opts, &AtomicBool::new(false))
}

fn authorize_domain_until(
    client: &Client,
    endpoint: &Endpoint,
    domain: &str,
    solver: &dyn ChallengeSolver,
    opts: &IssueOptions,
    cancel: &AtomicBool,
) -> Result<Authorization> {
    let authz = client.authorize(&endpoint.authz_url, domain)?;
    if authz.status == Status::Valid {
        info!("{} already authorized", domain);
        return Ok(authz);
    }

    let challenge = authz
        .challenge_set
        .http01()
        .cloned()
        .ok_or_else(|| ClientError::NoSupportedChallenge {
            domain: domain.to_string(),
        })?;
    let key_auth = client.key().key_authorization(&challenge.token)?;

    solver.present(domain, &challenge.token, &key_auth)?;
    let result = accept_and_wait(client, &authz, &challenge, domain, opts, cancel);
    if let Err(e) = solver.cleanup(domain, &challenge.token) {
        warn!("cleanup challenge for {}: {}", domain, e);
    }
    result
}

fn accept_and_wait(
    client: &Client,
    authz: &Authorization,
    challenge: &Challenge,
    domain: &str,
    opts: &IssueOptions,
    cancel: &AtomicBool,
) -> Result<Authorization> {
    match client.accept(challenge) {
        Ok(_) => {}
        // CA 可能已收到請求；結果以輪詢為準。
        Err(err @ ClientError::Transport { .. }) => warn!("accept challenge for {}: {}", domain, err),
        Err(err) => return Err(err),
    }
    client.wait_authorization_until(&authz.uri, domain, opts, cancel)
}

/// 為 `domains` 取得授權並以 DER 編碼的 `csr_der` 申請憑證。
///
/// 任一網域授權失敗即放棄整個申請，錯誤中帶有該網域名稱。回傳憑證鏈（葉憑證在最前面）與憑證 URL。
pub fn obtain_certificate(
    client: &Client,
    endpoint: &Endpoint,
    domains: &[String],
    csr_der: &[u8],
    solver: &dyn ChallengeSolver,
    opts: &IssueOptions,
) -> Result<(Vec<Certificate>, String)> {
    if opts.concurrent && domains.len() > 1 {
        authorize_concurrently(client, endpoint, domains, solver, opts)?;
    } else {
        for domain in domains {
            authorize_domain(client, endpoint, domain, solver, opts)
                .map_err(|e| with_domain(domain, e))?;
        }
    }

    let (cert, url) = client.create_cert(&endpoint.cert_url, csr_der, opts.not_before, opts.not_after)?;
    let chain = match cert {
        Some(cert) if !opts.bundle || url.is_empty() => vec![cert],
        _ => client.wait_cert(&url, opts.bundle, opts.cert_timeout)?,
    };

    info!("issued certificate {} for {}", url, domains.join(", "));
    Ok((chain, url))
}

/// 每個網域一個執行緒；任一網域失敗時通知其他網域停止輪詢。
///
/// 回傳依 `domains` 順序第一個真正的失敗，而非因此被取消的網域。
fn authorize_concurrently(
    client: &Client,
    endpoint: &Endpoint,
    domains: &[String],
    solver: &dyn ChallengeSolver,
    opts: &IssueOptions,
) -> Result<()> {
    let cancel = AtomicBool::new(false);
    let cancel = &cancel;

    let results: Vec<Result<Authorization>> = thread::scope(|scope| {
        let handles: Vec<_> = domains
            .iter()
            .map(|domain| {
                scope.spawn(move || {
                    let result =
                        authorize_domain_until(client, endpoint, domain, solver, opts, cancel);
                    if result.is_err() {
                        cancel.store(true, Ordering::SeqCst);
                    }
                    result.map_err(|e| with_domain(domain, e))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });

    let mut cancelled = None;
    for result in results {
        match result {
            Ok(_) => {}
            Err(err @ ClientError::Cancelled { .. }) => {
                cancelled.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    cancelled.map_or(Ok(()), Err)
}

/// 為錯誤加上網域名稱；本身已帶網域的錯誤保持不變。
fn with_domain(domain: &str, err: ClientError) -> ClientError {
    match err {
        ClientError::AuthorizationInvalid { .. }
        | ClientError::NoSupportedChallenge { .. }
        | ClientError::Cancelled { .. }
        | ClientError::Domain { .. } => err,
        other => ClientError::Domain {
            domain: domain.to_string(),
            source: Box::new(other),
        },
    }
}
