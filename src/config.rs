//! 帳戶設定檔的讀寫。
//!
//! 設定檔是 JSON，帳戶欄位與目錄端點攤平在同一層；帳戶金鑰以 PKCS#1 PEM 存放在同目錄、
//! 副檔名改為 `.key` 的檔案中。

use std::{
    env, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    account::Account,
    directory::Endpoint,
    key_pair::{KeyError, KeyPair},
};

/// 預設的設定檔名稱。
pub const DEFAULT_CONFIG_FILE: &str = "account.json";

/// 設定檔讀寫可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Cannot determine home directory")]
    NoHome,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 持久化的帳戶狀態。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(flatten)]
    pub account: Account,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

/// 預設設定目錄 `$HOME/.config/acme`。
pub fn config_dir() -> Result<PathBuf> {
    let home = env::var_os("HOME").ok_or(ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config").join("acme"))
}

/// 預設設定檔路徑。
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(DEFAULT_CONFIG_FILE))
}

/// 設定檔對應的金鑰檔路徑：副檔名改為 `.key`。
pub fn key_path(config_path: &Path) -> PathBuf {
    config_path.with_extension("key")
}

pub fn read_config(path: &Path) -> Result<UserConfig> {
    let data = fs::read(path).map_err(io_error(path))?;
    serde_json::from_slice(&data).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_config(path: &Path, config: &UserConfig) -> Result<()> {
    let data = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_private(path, &data)
}

/// 讀取 PEM 格式的 RSA 私鑰。
pub fn read_key(path: &Path) -> Result<KeyPair> {
    let pem = fs::read(path).map_err(io_error(path))?;
    Ok(KeyPair::from_pem(&pem)?)
}

pub fn write_key(path: &Path, key: &KeyPair) -> Result<()> {
    write_private(path, &key.to_pem()?)
}

/// 讀取金鑰；檔案不存在且 `generate` 為真時產生新的 2048 位元金鑰並寫入。
pub fn any_key(path: &Path, generate: bool) -> Result<KeyPair> {
    match read_key(path) {
        Err(ConfigError::Io { source, .. }) if generate && source.kind() == io::ErrorKind::NotFound => {
            let key = KeyPair::generate(None)?;
            write_key(path, &key)?;
            Ok(key)
        }
        other => other,
    }
}

/// 寫入只有擁有者可讀寫的檔案（0600），必要時建立 0700 的上層目錄。
pub fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_error(path))?;
    file.write_all(data).map_err(io_error(path))
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(io_error(dir))
}
