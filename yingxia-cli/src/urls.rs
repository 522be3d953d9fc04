use anyhow::{Context, Result};
use std::path::Path;

/// 从文本中提取链接，每行一个
///
/// 只接受以 `http` 或 `www` 开头的行，`www` 开头的补全为 `https://`。
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http") || line.starts_with("www"))
        .map(|line| {
            if line.starts_with("www") {
                format!("https://{line}")
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// 读取链接列表文件
pub async fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = fs_err::tokio::read_to_string(path)
        .await
        .with_context(|| format!("failed to read URL list {}", path.display()))?;
    Ok(parse_url_list(&content))
}

/// 合并命令行与文件中的链接，保持顺序
///
/// 重复的链接各自作为独立任务下载。
pub fn collect_urls(args: &[String], from_file: Vec<String>) -> Vec<String> {
    let joined = args.join("\n");
    parse_url_list(&joined).into_iter().chain(from_file).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_list() {
        let text = "
            https://www.youtube.com/watch?v=abc
            # comment
            www.bilibili.com/video/BV1xx

            ftp://example.com/file
            http://example.com/v.mp4
        ";
        assert_eq!(
            parse_url_list(text),
            vec![
                "https://www.youtube.com/watch?v=abc",
                "https://www.bilibili.com/video/BV1xx",
                "http://example.com/v.mp4",
            ]
        );
    }

    #[test]
    fn test_parse_empty_text() {
        assert!(parse_url_list("").is_empty());
        assert!(parse_url_list("\n \n").is_empty());
    }

    #[test]
    fn test_collect_urls_keeps_order_and_duplicates() {
        let args = vec![
            "https://a".to_string(),
            "not a url".to_string(),
            "www.b.com".to_string(),
            "https://a".to_string(),
        ];
        let from_file = vec!["https://b.com".to_string(), "https://www.b.com".to_string()];
        assert_eq!(
            collect_urls(&args, from_file),
            vec![
                "https://a",
                "https://www.b.com",
                "https://a",
                "https://b.com",
                "https://www.b.com",
            ]
        );
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let err = read_url_file(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read URL list"));
    }
}
