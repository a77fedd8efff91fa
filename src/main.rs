use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use acme_draft::{
    account::Account,
    certificate::{Certificate, CertificateError},
    client::{Client, ClientError},
    config::{self, ConfigError, UserConfig},
    csr::{Csr, CsrError},
    issue::{self, IssueOptions},
    key_pair::KeyError,
    payload::normalize_contact,
    responder::Http01Responder,
    solver::{ChallengeSolver, ManualSolver, SolverError},
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use log::{error, info};
use thiserror::Error;

const DEFAULT_DIRECTORY: &str = "https://acme-staging.api.letsencrypt.org/directory";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("csr: {0}")]
    Csr(#[from] CsrError),
    #[error("cert: {0}")]
    Certificate(#[from] CertificateError),
    #[error("challenge: {0}")]
    Solver(#[from] SolverError),
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no config at {0}; use reg --gen to create one")]
    NoConfig(PathBuf),
}

#[derive(Parser)]
#[command(name = "acme", author, version, about = "ACME client for the new-reg / new-authz / new-cert protocol")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new account with the CA
    Reg {
        /// Account config file, default $HOME/.config/acme/account.json
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Generate an account key and config when none exist
        #[arg(long)]
        gen: bool,
        /// CA directory URL
        #[arg(short, long, default_value = DEFAULT_DIRECTORY)]
        directory: String,
        /// Contact URIs, e.g. mailto:admin@example.com
        contact: Vec<String>,
    },
    /// Update contacts or agree to the current terms of service
    Update {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Agree to the CA's current terms of service
        #[arg(long)]
        accept: bool,
        /// Replacement contact URIs
        contact: Vec<String>,
    },
    /// Show the registration the account key belongs to
    Whoami {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Request a certificate using the http-01 challenge
    Cert {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// CA directory URL, used when the config has no endpoints
        #[arg(short, long)]
        directory: Option<String>,
        /// Address of the local http-01 responder
        #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
        addr: String,
        /// Certificate key file, default <config dir>/<domain>.key
        #[arg(short, long)]
        key: Option<PathBuf>,
        /// Requested validity in hours
        #[arg(long, default_value_t = 365 * 12)]
        expiry: i64,
        /// Do not append the issuer chain
        #[arg(long)]
        no_bundle: bool,
        /// Place challenge files manually instead of running a local responder
        #[arg(long)]
        manual: bool,
        /// Web root to write challenge files to in manual mode
        #[arg(long, env = "ACME_CHALLENGE_DIR")]
        challenge_dir: Option<PathBuf>,
        /// Language of manual instructions (en, zh-tw)
        #[arg(long, default_value = ManualSolver::DEFAULT_LANG)]
        lang: String,
        /// Domains; the first one becomes the common name
        #[arg(required = true)]
        domains: Vec<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse().command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Reg {
            config,
            gen,
            directory,
            contact,
        } => register(&config_path(config)?, gen, &directory, contact),
        Command::Update {
            config,
            accept,
            contact,
        } => update(&config_path(config)?, accept, contact),
        Command::Whoami { config } => whoami(&config_path(config)?),
        Command::Cert {
            config,
            directory,
            addr,
            key,
            expiry,
            no_bundle,
            manual,
            challenge_dir,
            lang,
            domains,
        } => {
            let solver: Box<dyn ChallengeSolver> = if manual {
                Box::new(ManualSolver::new(challenge_dir).lang(&lang))
            } else {
                Box::new(Http01Responder::start(&addr)?)
            };
            let opts = IssueOptions {
                bundle: !no_bundle,
                not_before: Some(Utc::now()),
                not_after: Some(Utc::now() + Duration::hours(expiry)),
                ..Default::default()
            };
            cert(
                &config_path(config)?,
                directory.as_deref(),
                key,
                &domains,
                solver.as_ref(),
                &opts,
            )
        }
    }
}

fn config_path(path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => Ok(path),
        None => Ok(config::default_config_path()?),
    }
}

/// 讀取設定檔與帳戶金鑰，並建立客戶端。
fn load(path: &Path) -> Result<(UserConfig, Client), CliError> {
    if !path.exists() {
        return Err(CliError::NoConfig(path.to_path_buf()));
    }
    let uc = config::read_config(path)?;
    let key = config::read_key(&config::key_path(path))?;
    Ok((uc, Client::new(key)?))
}

fn register(path: &Path, gen: bool, directory: &str, contact: Vec<String>) -> Result<(), CliError> {
    let mut uc = if path.exists() {
        config::read_config(path)?
    } else if gen {
        UserConfig::default()
    } else {
        return Err(CliError::NoConfig(path.to_path_buf()));
    };
    let key_path = config::key_path(path);
    let client = Client::new(config::any_key(&key_path, gen)?)?;

    if uc.endpoint.reg_url.is_empty() {
        uc.endpoint = client.discover(directory)?;
    }
    let contact = if contact.is_empty() {
        uc.account.contact.clone()
    } else {
        contact.iter().map(|c| normalize_contact(c)).collect()
    };

    uc.account = client.register(&uc.endpoint.reg_url, &Account::new(contact))?;
    config::write_config(path, &uc)?;
    info!("registered {}", uc.account.uri);
    print!("{}", account_table(&uc.account, &key_path));
    Ok(())
}

fn update(path: &Path, accept: bool, contact: Vec<String>) -> Result<(), CliError> {
    let (mut uc, client) = load(path)?;

    if accept {
        uc.account = client.get_reg(&uc.account.uri)?;
        uc.account.agreed_terms = uc.account.current_terms.clone();
    }
    if !contact.is_empty() {
        uc.account.contact = contact.iter().map(|c| normalize_contact(c)).collect();
    }

    uc.account = client.update_reg(&uc.account.uri, &uc.account)?;
    config::write_config(path, &uc)?;
    print!("{}", account_table(&uc.account, &config::key_path(path)));
    Ok(())
}

fn whoami(path: &Path) -> Result<(), CliError> {
    let (uc, client) = load(path)?;
    let account = client.get_reg(&uc.account.uri)?;
    print!("{}", account_table(&account, &config::key_path(path)));
    Ok(())
}

fn cert(
    path: &Path,
    directory: Option<&str>,
    key: Option<PathBuf>,
    domains: &[String],
    solver: &dyn ChallengeSolver,
    opts: &IssueOptions,
) -> Result<(), CliError> {
    let (mut uc, client) = load(path)?;
    let cn = &domains[0];

    let key_path = match key {
        Some(key) => key,
        None => path.with_file_name(format!("{}.key", cn)),
    };
    let cert_key = config::any_key(&key_path, true)?;

    // 先產生 CSR，出錯時不必進行授權。
    let csr = domains[1..]
        .iter()
        .fold(Csr::new(cn), |csr, domain| csr.san(domain))
        .build_der(&cert_key)?;

    if let Some(directory) = directory {
        uc.endpoint = client.discover(directory)?;
    } else if uc.endpoint.authz_url.is_empty() {
        uc.endpoint = client.discover(DEFAULT_DIRECTORY)?;
    }

    let (chain, url) = issue::obtain_certificate(&client, &uc.endpoint, domains, &csr, solver, opts)?;
    info!("cert url: {}", url);

    let cert_path = key_path.with_file_name(format!("{}.crt", cn));
    fs::write(&cert_path, Certificate::chain_to_pem(&chain)?).map_err(|source| CliError::Write {
        path: cert_path.clone(),
        source,
    })?;
    info!("wrote {}", cert_path.display());
    Ok(())
}

/// 以對齊的表格列出帳戶資訊。
fn account_table(account: &Account, key_path: &Path) -> String {
    let accepted = if account.agreed_terms.is_empty() {
        "no"
    } else if account.agreed_terms == account.current_terms {
        "yes"
    } else {
        account.agreed_terms.as_str()
    };

    let rows = [
        ("URI:", account.uri.clone()),
        ("Key:", key_path.display().to_string()),
        ("Contact:", account.contact.join(", ")),
        ("Terms:", account.current_terms.clone()),
        ("Accepted:", accepted.to_string()),
    ];

    let mut out = String::new();
    for (label, value) in rows {
        let _ = writeln!(out, "{:<10}{}", label, value);
    }
    out
}
