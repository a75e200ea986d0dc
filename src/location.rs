use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tempfile::TempDir;
use url::Url;

use crate::error::{Error, Result};

/// 远程视频的元信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
}

/// 已落地到本地的视频，下载得到的临时文件在离开作用域时删除
#[derive(Debug)]
pub struct Materialized {
    path: PathBuf,
    remote: Option<RemoteInfo>,
    temp: Option<TempDir>,
}

impl Materialized {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), remote: None, temp: None }
    }

    pub fn downloaded(path: PathBuf, temp: TempDir, info: RemoteInfo) -> Self {
        Self { path, remote: Some(info), temp: Some(temp) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote_info(&self) -> Option<&RemoteInfo> {
        self.remote.as_ref()
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

impl Drop for Materialized {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            debug!("清理临时文件: {}", temp.path().display());
            if let Err(e) = temp.close() {
                warn!("清理临时文件失败: {}", e);
            }
        }
    }
}

/// 区分 URL 与本地路径，并把视频落地为本地文件
pub trait LocationResolver: Send + Sync {
    fn is_remote(&self, location: &str) -> bool {
        is_url(location)
    }

    fn materialize(&self, location: &str) -> Result<Materialized>;
}

/// 同时带有协议与主机名时才视为 URL
pub fn is_url(location: &str) -> bool {
    Url::parse(location)
        .map(|url| url.scheme() != "file" && url.host_str().is_some_and(|host| !host.is_empty()))
        .unwrap_or(false)
}

/// 使用 yt-dlp 下载远程视频
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    download_dir: PathBuf,
    program: String,
    format: String,
}

impl YtDlpResolver {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            program: "yt-dlp".to_string(),
            format: "best[height<=720]".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// 获取远程视频信息，失败时返回空信息而不是报错
    pub fn fetch_info(&self, url: &str) -> RemoteInfo {
        let output = Command::new(&self.program)
            .args(["-J", "--no-playlist", "--no-warnings", url])
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                parse_remote_info(&output.stdout).unwrap_or_else(|e| {
                    warn!("解析视频信息失败 {}: {}", url, e);
                    RemoteInfo::default()
                })
            }
            Ok(output) => {
                warn!("获取视频信息失败 {}: {}", url, String::from_utf8_lossy(&output.stderr).trim());
                RemoteInfo::default()
            }
            Err(e) => {
                warn!("获取视频信息失败 {}: {}", url, e);
                RemoteInfo::default()
            }
        }
    }

    fn download(&self, url: &str) -> Result<Materialized> {
        let info = self.fetch_info(url);

        fs::create_dir_all(&self.download_dir)?;
        let hash = blake3::hash(url.as_bytes()).to_hex();
        let temp = tempfile::Builder::new()
            .prefix(&format!("vidsearch-{}-", &hash.as_str()[..16]))
            .tempdir_in(&self.download_dir)?;
        let template = temp.path().join("video.%(ext)s");

        debug!("下载视频 {} 到 {}", url, temp.path().display());
        let output = Command::new(&self.program)
            .arg("-f")
            .arg(&self.format)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Download(format!("无法运行 {}: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Download(format!("{}: {}", url, stderr.trim())));
        }

        let path = fs::read_dir(temp.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| path.is_file() && path.extension().is_some_and(|ext| ext != "part"))
            .ok_or_else(|| Error::Download(format!("{}: 未找到下载的文件", url)))?;

        Ok(Materialized::downloaded(path, temp, info))
    }
}

impl LocationResolver for YtDlpResolver {
    fn materialize(&self, location: &str) -> Result<Materialized> {
        if self.is_remote(location) {
            return self.download(location);
        }
        let path = match Url::parse(location) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map_err(|_| Error::NotFound(location.to_string()))?,
            _ => PathBuf::from(location),
        };
        if !path.is_file() {
            return Err(Error::NotFound(location.to_string()));
        }
        Ok(Materialized::local(path))
    }
}

fn parse_remote_info(json: &[u8]) -> Result<RemoteInfo> {
    let value: Value = serde_json::from_slice(json)?;
    Ok(RemoteInfo {
        title: value["title"].as_str().map(str::to_string),
        uploader: value["uploader"].as_str().map(str::to_string),
        duration: value["duration"].as_f64(),
        view_count: value["view_count"].as_u64(),
    })
}
