//! 进度与错误信息的规范化

use regex::Regex;
use std::sync::LazyLock;

/// 保存到任务上的错误信息最大长度
pub const ERROR_FIELD_LEN: usize = 100;
/// 日志中错误信息的最大长度
pub const ERROR_LOG_LEN: usize = 150;
/// 日志中标题的最大长度
pub const TITLE_LOG_LEN: usize = 30;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI escape pattern")
});

/// 解析百分比字符串
///
/// 去掉数字和 `.` 以外的所有字符后解析，无法解析时返回 0，结果限制在 [0, 100]。
pub fn parse_percent(raw: &str) -> f64 {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map_or(0.0, |v| v.clamp(0.0, 100.0))
}

/// 去掉终端转义序列和控制字符
pub fn sanitize_message(raw: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(raw, "");
    stripped
        .chars()
        .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// 按字符截断，不会切断 UTF-8 字符
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
