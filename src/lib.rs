//! # ACME draft 協議客戶端
//!
//! 本庫實作 ACME draft 時代（`new-reg` / `new-authz` / `new-cert`）的客戶端協議引擎，
//! 透過 http-01 挑戰向 CA 取得網域驗證憑證。
//!
//! - **簽名**：每個寫入請求都是 flattened JWS（RS256），protected header 內含帳戶公鑰 JWK
//!   與向目標 URL 以 HEAD 取得的一次性 nonce（見 [`jws`]、[`nonce`]）。
//! - **協議**：[`client::Client`] 提供目錄探索、帳戶註冊與更新、授權、挑戰回應與憑證申請，
//!   CA 回報的錯誤分類為 [`error::AcmeError`]，憑證尚未簽發時以 [`error::RetryError`] 告知等待時間。
//! - **流程**：[`issue::obtain_certificate`] 為每個網域完成授權後申請憑證，
//!   挑戰內容交由 [`solver::ChallengeSolver`] 放置（本機伺服器或手動）。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_draft::{
//!     account::Account,
//!     client::Client,
//!     csr::Csr,
//!     issue::{obtain_certificate, IssueOptions},
//!     key_pair::KeyPair,
//!     responder::Http01Responder,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(KeyPair::generate(None)?)?;
//!     let endpoint = client.discover("https://acme-staging.api.letsencrypt.org/directory")?;
//!
//!     let mut account = client.register(&endpoint.reg_url, &Account::new(vec![
//!         "mailto:admin@example.com".to_string(),
//!     ]))?;
//!     if account.needs_agreement() {
//!         account.agreed_terms = account.current_terms.clone();
//!         account = client.update_reg(&account.uri, &account)?;
//!     }
//!
//!     let domains = vec!["example.com".to_string()];
//!     let cert_key = KeyPair::generate(None)?;
//!     let csr = Csr::new("example.com").build_der(&cert_key)?;
//!     let responder = Http01Responder::start("0.0.0.0:80")?;
//!
//!     let (chain, url) = obtain_certificate(
//!         &client,
//!         &endpoint,
//!         &domains,
//!         &csr,
//!         &responder,
//!         &IssueOptions::default(),
//!     )?;
//!     println!("{} ({} certificates)", url, chain.len());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod error;
pub mod headers;
pub mod issue;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod payload;
pub mod protection;
pub mod responder;
pub mod signature;
pub mod solver;

mod util;


pub use client::{Client, ClientBuilder, ClientError};
pub use error::{AcmeError, ErrorType, RetryError};
