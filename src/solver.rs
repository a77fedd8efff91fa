//! 挑戰回應：在 CA 驗證前放置 key authorization，驗證結束後清除。

use std::{
    collections::HashMap,
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock, PoisonError},
};

use log::{info, warn};
use thiserror::Error;

use crate::challenge::HTTP01_PATH_PREFIX;

/// 挑戰回應過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to keep challenge file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Failed to listen on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("Challenge responder is not running")]
    Stopped,
}

type Result<T> = std::result::Result<T, SolverError>;

/// 定義挑戰回應的行為。
///
/// `present` 在回應挑戰前呼叫，`cleanup` 無論驗證結果如何都會在該網域流程結束後呼叫。
/// 多個網域可能同時使用同一個實作。
pub trait ChallengeSolver: Send + Sync {
    /// 讓 `domain` 的 `token` 可被 CA 取得，內容為 `key_authorization`。
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;

    /// 移除 `present` 放置的內容。
    fn cleanup(&self, domain: &str, token: &str) -> Result<()>;
}

static INSTRUCTIONS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

/// 初始化各語言的手動驗證指引，僅在第一次存取時執行。
fn init_instructions() -> HashMap<&'static str, &'static str> {
    let mut m = HashMap::new();

    m.insert(
        "zh-tw",
        "HTTP-01 驗證步驟（{domain}）：\n\
            1. 將檔案 {file} 複製到網站根目錄的 /.well-known/acme-challenge/{token}\n\
            2. 文件內容：{key_auth}\n\
            3. 確保可通過 HTTP 訪問（非 HTTPS）\n\
            4. 完成後按 Enter 繼續",
    );
    m.insert(
        "en",
        "HTTP-01 validation steps ({domain}):\n\
            1. Copy {file} to ROOT/.well-known/acme-challenge/{token}\n\
            2. File content: {key_auth}\n\
            3. Ensure it is accessible via HTTP (not HTTPS)\n\
            4. Press enter when done",
    );

    m
}

/// 手動挑戰回應：把 key authorization 寫成檔案，必要時等待操作者放置。
///
/// 指定目錄時檔案寫到 `<dir>/.well-known/acme-challenge/<token>`，否則寫到以網域為前綴的暫存檔。
#[derive(Debug)]
pub struct ManualSolver {
    dir: Option<PathBuf>,
    lang: String,
    interactive: bool,
    files: Mutex<HashMap<String, PathBuf>>,
    prompt: Mutex<()>,
}

impl ManualSolver {
    /// 預設的指引語言。
    pub const DEFAULT_LANG: &'static str = "en";

    /// 建立手動挑戰回應；未指定目錄時需要操作者確認。
    pub fn new(dir: Option<PathBuf>) -> Self {
        ManualSolver {
            interactive: dir.is_none(),
            dir,
            lang: Self::DEFAULT_LANG.to_string(),
            files: Mutex::new(HashMap::new()),
            prompt: Mutex::new(()),
        }
    }

    /// 設置指引語言，例如 `"en"` 或 `"zh-tw"`。
    pub fn lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_lowercase();
        self
    }

    /// 設置是否顯示指引並等待操作者按 Enter。
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// 根據語言取得替換後的指引說明字串。
    pub fn instructions(&self, domain: &str, token: &str, key_auth: &str, file: &Path) -> String {
        let instructions = INSTRUCTIONS.get_or_init(init_instructions);
        let template = instructions
            .get(self.lang.as_str())
            .or_else(|| instructions.get(Self::DEFAULT_LANG))
            .copied()
            .unwrap_or_default();

        template
            .replace("{domain}", domain)
            .replace("{token}", token)
            .replace("{key_auth}", key_auth)
            .replace("{file}", &file.display().to_string())
    }

    fn write_file(&self, domain: &str, token: &str, key_auth: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            let challenge_dir = dir.join(HTTP01_PATH_PREFIX.trim_matches('/'));
            fs::create_dir_all(&challenge_dir)?;
            let path = challenge_dir.join(token);
            fs::write(&path, key_auth)?;
            return Ok(path);
        }

        let mut file = tempfile::Builder::new().prefix(domain).tempfile()?;
        file.write_all(key_auth.as_bytes())?;
        let (_, path) = file.keep()?;
        Ok(path)
    }

    fn wait_for_operator(&self, message: &str) -> Result<()> {
        let _guard = self.prompt.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", message)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }
}

impl ChallengeSolver for ManualSolver {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        let path = self.write_file(domain, token, key_authorization)?;
        info!("wrote challenge for {} to {}", domain, path.display());

        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), path.clone());

        if self.interactive {
            let message = self.instructions(domain, token, key_authorization, &path);
            self.wait_for_operator(&message)?;
        }
        Ok(())
    }

    fn cleanup(&self, domain: &str, token: &str) -> Result<()> {
        let path = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);

        if let Some(path) = path {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("challenge file for {} already removed: {}", domain, path.display())
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
