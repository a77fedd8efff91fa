//! 解析 ACME 回應中使用的標頭：`Location`、`Link` 與 `Retry-After`。

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LOCATION, LINK, RETRY_AFTER};

/// 未提供 `Retry-After` 時的預設等待時間。
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3);

/// 取得 `Location` 標頭；不存在或無法轉成字串時回傳 `None`。
pub fn location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 依序列出所有 `Link` 標頭中的 `(url, rel)`。
///
/// 支援多行 `Link` 標頭、單行內以逗號分隔的多個值，以及每個值後的多個 `;` 參數。
/// `rel` 值會去除空白與引號。
pub fn links(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::new();

    for value in headers.get_all(LINK) {
        let Ok(value) = value.to_str() else {
            continue;
        };

        for link in split_links(value) {
            let link = link.trim();
            let (target, params) = link
                .strip_prefix('<')
                .and_then(|l| l.split_once('>'))
                .or_else(|| link.split_once(';'))
                .unwrap_or((link, ""));
            let target = target.trim();

            for param in params.split(';') {
                let Some((name, rel)) = param.split_once('=') else {
                    continue;
                };
                if name.trim() == "rel" {
                    let rel = rel.trim().trim_matches('"');
                    out.push((target.to_string(), rel.to_string()));
                }
            }
        }
    }

    out
}

/// 以逗號切開單一標頭中的多個連結，`<...>` 與引號內的逗號不切。
fn split_links(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_target = false;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '<' if !in_quote => in_target = true,
            '>' if !in_quote => in_target = false,
            '"' if !in_target => in_quote = !in_quote,
            ',' if !in_target && !in_quote => {
                out.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&value[start..]);

    out
}

/// 找出第一個 `rel` 完全相符（大小寫敏感）的 `Link` 目標。
pub fn link(headers: &HeaderMap, rel: &str) -> Option<String> {
    links(headers)
        .into_iter()
        .find(|(_, r)| r == rel)
        .map(|(url, _)| url)
}

/// 找出所有 `rel` 相符的 `Link` 目標。
pub fn links_with_rel(headers: &HeaderMap, rel: &str) -> Vec<String> {
    links(headers)
        .into_iter()
        .filter(|(_, r)| r == rel)
        .map(|(url, _)| url)
        .collect()
}

/// 解析 `Retry-After` 標頭。
///
/// 接受秒數或 HTTP-date；日期已過時回傳零。標頭不存在時回傳 `None`。
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// 解析 `Retry-After` 標頭，缺少或無法解析時使用 [`DEFAULT_RETRY_AFTER`]。
pub fn retry_after_or_default(headers: &HeaderMap) -> Duration {
    retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER)
}
