use std::borrow::Cow;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use encoding_rs::{Encoding, GBK, UTF_8};
use log::{debug, info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::batch::WorkItem;
use crate::error::{Error, Result};

/// 自动识别 URL 列时使用的列名
pub const URL_KEYWORDS: &[&str] =
    &["url", "link", "video_url", "video_link", "address", "链接", "地址", "视频链接", "src", "source"];

/// 默认扫描的视频后缀名
pub const DEFAULT_SUFFIX: &str = "mp4,mkv,avi,mov,webm,flv,wmv,m4v";

/// 从 CSV 文件读取视频列表
///
/// `encoding` 为首选编码，解码失败时依次尝试 UTF-8 与 GBK。
pub fn read_csv(path: impl AsRef<Path>, url_column: Option<&str>, encoding: Option<&str>) -> Result<Vec<WorkItem>> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;
    let items = read_csv_from(&data[..], url_column, encoding)?;
    info!("从 {} 读取到 {} 个视频", path.display(), items.len());
    Ok(items)
}

/// 读取 CSV，第一行必须为表头，非 URL 列作为附加信息保存
///
/// 序号为 CSV 中的行号（表头为第 1 行），URL 为空的行会被跳过。
pub fn read_csv_from<R: Read>(mut reader: R, url_column: Option<&str>, encoding: Option<&str>) -> Result<Vec<WorkItem>> {
    let mut data = vec![];
    reader.read_to_end(&mut data)?;
    let text = decode_text(&data, encoding)?;

    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(Error::Configuration("CSV 文件没有表头".to_string()));
    }

    let column = match url_column {
        Some(name) => headers.iter().position(|h| h == name).ok_or_else(|| {
            Error::Configuration(format!("URL 列 '{}' 不存在，可用的列: {}", name, headers.join(", ")))
        })?,
        None => {
            let column = detect_url_column(&headers);
            info!("自动检测到 URL 列: {}", headers[column]);
            column
        }
    };

    let mut items = vec![];
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let location = record.get(column).map(str::trim).unwrap_or_default();
        if location.is_empty() {
            continue;
        }

        let mut item = WorkItem::new(location, i + 2);
        for (j, field) in record.iter().enumerate() {
            if j == column {
                continue;
            }
            if let Some(key) = headers.get(j) {
                item.metadata.insert(key.clone(), field.trim().to_string());
            }
        }
        items.push(item);
    }
    Ok(items)
}

/// 按 `[首选编码, UTF-8, GBK]` 的顺序解码，全部失败时按 UTF-8 有损解码
///
/// GB2312 是 GBK 的子集，无需单独尝试；开头的 UTF-8 BOM 总是被去掉。
pub fn decode_text<'a>(data: &'a [u8], encoding: Option<&str>) -> Result<Cow<'a, str>> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    let mut candidates = vec![];
    if let Some(label) = encoding {
        let preferred = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::Configuration(format!("不支持的编码: {}", label)))?;
        candidates.push(preferred);
    }
    for fallback in [UTF_8, GBK] {
        if !candidates.contains(&fallback) {
            candidates.push(fallback);
        }
    }

    for encoding in candidates {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(data) {
            debug!("使用 {} 编码读取 CSV", encoding.name());
            return Ok(text);
        }
    }
    warn!("无法识别 CSV 编码，按 UTF-8 读取，无效字符将被替换");
    Ok(String::from_utf8_lossy(data))
}

/// 依次按完全匹配、包含关键字匹配查找 URL 列，都失败时使用第一列
pub fn detect_url_column(headers: &[String]) -> usize {
    let lower = headers.iter().map(|h| h.to_lowercase()).collect::<Vec<_>>();

    if let Some(i) = lower.iter().position(|h| URL_KEYWORDS.contains(&h.as_str())) {
        return i;
    }
    for keyword in URL_KEYWORDS {
        if let Some(i) = lower.iter().position(|h| h.contains(keyword)) {
            return i;
        }
    }

    warn!("未能识别 URL 列，使用第一列: {}", headers.first().map(String::as_str).unwrap_or(""));
    0
}

/// 递归扫描目录下的视频文件，`suffix` 为逗号分隔的后缀名，不区分大小写
pub fn scan_directory(dir: impl AsRef<Path>, suffix: &str) -> Result<Vec<WorkItem>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::NotFound(dir.display().to_string()));
    }
    let re_suf = format!("(?i)^({})$", suffix.split(',').map(|s| regex::escape(s.trim())).collect::<Vec<_>>().join("|"));
    let re_suf = Regex::new(&re_suf).map_err(|e| Error::Configuration(format!("无效的后缀名: {}", e)))?;

    let items = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
        })
        .enumerate()
        .map(|(i, entry)| WorkItem::new(entry.path().to_string_lossy(), i + 1))
        .collect::<Vec<_>>();
    info!("在 {} 中找到 {} 个视频", dir.display(), items.len());
    Ok(items)
}

fn csv_error(e: csv::Error) -> Error {
    Error::Configuration(format!("CSV 解析失败: {}", e))
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_url_column() {
        assert_eq!(detect_url_column(&headers(&["title", "URL"])), 1);
        assert_eq!(detect_url_column(&headers(&["标题", "视频链接"])), 1);
        assert_eq!(detect_url_column(&headers(&["name", "my_video_link_2", "link"])), 2);
        assert_eq!(detect_url_column(&headers(&["name", "download_url"])), 1);
        assert_eq!(detect_url_column(&headers(&["a", "b"])), 0);
    }

    #[test]
    fn test_read_csv() {
        let data = "\u{feff}title,url,author\nfirst,https://a.com/1,x\nempty,,y\nthird,https://a.com/3,z\n";
        let items = read_csv_from(data.as_bytes(), None, None).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].location, "https://a.com/1");
        assert_eq!(items[0].ordinal, 2);
        assert_eq!(items[0].metadata["title"], "first");
        assert_eq!(items[0].metadata["author"], "x");
        assert!(!items[0].metadata.contains_key("url"));
        assert_eq!(items[1].ordinal, 4);
    }

    #[test]
    fn test_read_csv_explicit_column() {
        let data = "a,b\n1,2\n";
        let items = read_csv_from(data.as_bytes(), Some("b"), None).unwrap();
        assert_eq!(items[0].location, "2");

        let result = read_csv_from(data.as_bytes(), Some("c"), None);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_read_csv_lossy() {
        let data = b"url,note\nhttps://a.com/1,\xff\xfe\n";
        let items = read_csv_from(&data[..], None, None).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].metadata["note"].contains('\u{fffd}'));
    }

    #[test]
    fn test_read_csv_gbk() {
        let (data, _, _) = GBK.encode("标题,视频链接\n演示,https://a.com/1\n");
        let items = read_csv_from(&data[..], None, None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].location, "https://a.com/1");
        assert_eq!(items[0].metadata["标题"], "演示");

        let items = read_csv_from(&data[..], Some("视频链接"), Some("gb2312")).unwrap();
        assert_eq!(items[0].location, "https://a.com/1");
    }

    #[test]
    fn test_decode_text() {
        let utf8 = "链接\n".as_bytes();
        assert_eq!(decode_text(utf8, None).unwrap(), "链接\n");
        assert_eq!(decode_text(b"\xEF\xBB\xBFurl", Some("utf-8")).unwrap(), "url");
        assert!(matches!(decode_text(utf8, Some("no-such-encoding")), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_read_csv_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_csv(dir.path().join("missing.csv"), None, None), Err(Error::NotFound(_))));
        // 目录可以被打开但不能被读取
        assert!(matches!(read_csv(dir.path(), None, None), Err(Error::Io(_))));
    }

    #[test]
    fn test_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["b.mp4", "a.MKV", "c.txt", "sub/d.webm"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let items = scan_directory(dir.path(), DEFAULT_SUFFIX).unwrap();
        let names = items
            .iter()
            .map(|item| Path::new(&item.location).file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.MKV", "b.mp4", "d.webm"]);
        assert_eq!(items.iter().map(|i| i.ordinal).collect::<Vec<_>>(), vec![1, 2, 3]);

        let items = scan_directory(dir.path(), "txt").unwrap();
        assert_eq!(items.len(), 1);
        assert!(scan_directory(dir.path().join("missing"), "mp4").is_err());
    }
}
