use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use log::info;
use serde_json::{Value, json};

use crate::batch::{BatchReport, FailedItem, ItemResult};
use crate::cluster::DuplicateGroup;
use crate::error::Result;
use crate::store::FingerprintId;

const RULE_WIDTH: usize = 80;

/// 报告中重复视频组与失败视频的展示方式
pub trait ClusterGroupFormatter {
    fn title(&self) -> &str;

    /// 格式化组内第 `index` 个视频，`similarity` 为空表示该视频为基准视频
    fn format_member(
        &self,
        index: usize,
        id: FingerprintId,
        result: Option<&ItemResult>,
        similarity: Option<f32>,
    ) -> Vec<String>;

    fn format_failure(&self, index: usize, failed: &FailedItem) -> Vec<String>;
}

/// 通用格式：显示 id、名称与路径
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFormatter;

impl ClusterGroupFormatter for GenericFormatter {
    fn title(&self) -> &str {
        "视频去重报告"
    }

    fn format_member(
        &self,
        index: usize,
        id: FingerprintId,
        result: Option<&ItemResult>,
        similarity: Option<f32>,
    ) -> Vec<String> {
        let tag = similarity_tag(similarity);
        match result {
            Some(result) => vec![
                format!("  {}. {} ID: {} | {}", index, tag, id, result.meta.name),
                format!("     路径: {}", result.item.location),
            ],
            None => vec![format!("  {}. {} ID: {}", index, tag, id)],
        }
    }

    fn format_failure(&self, index: usize, failed: &FailedItem) -> Vec<String> {
        vec![
            format!("{}. {}", index, failed.item.location),
            format!("   错误: {}", failed.error),
        ]
    }
}

/// CSV 格式：显示行号、URL 与标题
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormatter;

impl ClusterGroupFormatter for CsvFormatter {
    fn title(&self) -> &str {
        "CSV 视频 URL 批处理报告"
    }

    fn format_member(
        &self,
        index: usize,
        id: FingerprintId,
        result: Option<&ItemResult>,
        similarity: Option<f32>,
    ) -> Vec<String> {
        let tag = similarity_tag(similarity);
        let Some(result) = result else {
            return vec![format!("  {}. {} ID: {}", index, tag, id)];
        };
        let mut lines = vec![format!("  {}. {} CSV 第 {} 行 | ID: {}", index, tag, result.item.ordinal, id)];
        let title = result.remote.as_ref().and_then(|r| r.title.as_deref()).or(result.item.metadata.get("title").map(String::as_str));
        if let Some(title) = title {
            lines.push(format!("     标题: {}", title));
        }
        lines.push(format!("     URL: {}", result.item.location));
        lines
    }

    fn format_failure(&self, index: usize, failed: &FailedItem) -> Vec<String> {
        vec![
            format!("{}. CSV 第 {} 行", index, failed.item.ordinal),
            format!("   URL: {}", failed.item.location),
            format!("   错误: {}", failed.error),
        ]
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// 显示名称与路径
    Generic,
    /// 显示 CSV 行号与 URL
    Csv,
}

impl ReportFormat {
    pub fn formatter(self) -> Box<dyn ClusterGroupFormatter> {
        match self {
            ReportFormat::Generic => Box::new(GenericFormatter),
            ReportFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

fn similarity_tag(similarity: Option<f32>) -> String {
    match similarity {
        Some(s) => format!("[相似度: {:.2}%]", s * 100.),
        None => "[基准]".to_string(),
    }
}

/// 组内成员与组内其他视频之间的最高相似度
fn member_similarity(report: &BatchReport, group: &DuplicateGroup, id: FingerprintId) -> Option<f32> {
    report
        .edges
        .iter()
        .filter(|e| (e.a == id && group.ids.contains(&e.b)) || (e.b == id && group.ids.contains(&e.a)))
        .map(|e| e.similarity)
        .max_by(f32::total_cmp)
}

/// 生成文本报告
pub fn render_report(report: &BatchReport, formatter: &dyn ClusterGroupFormatter) -> String {
    let stats = &report.statistics;
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{}\n{}\n{}", rule, formatter.title(), rule);
    let _ = writeln!(out, "视频总数: {}", stats.total);
    let _ = writeln!(out, "成功处理: {}", stats.processed);
    let _ = writeln!(out, "处理失败: {}", stats.failed);
    if stats.cancelled {
        let _ = writeln!(out, "未处理（已取消）: {}", stats.skipped());
    }
    let _ = writeln!(out, "总耗时: {:.2} 秒", stats.elapsed);
    let _ = writeln!(out, "平均耗时: {:.2} 秒/视频", stats.average_elapsed());
    let _ = writeln!(out, "相似度阈值: {:.0}%", report.threshold * 100.);
    let _ = writeln!(out, "重复视频组数: {}", report.groups.len());
    let _ = writeln!(out, "重复视频数: {}", stats.duplicates_found);
    let _ = writeln!(out, "重复率: {:.2}%", stats.duplicate_rate() * 100.);
    let _ = writeln!(out);

    if report.groups.is_empty() {
        let _ = writeln!(out, "未发现重复视频。");
    } else {
        let _ = writeln!(out, "{}\n重复视频组详情\n{}", rule, rule);
        for (i, group) in report.groups.iter().enumerate() {
            let _ = writeln!(out, "【组 {}】包含 {} 个相似视频", i + 1, group.len());
            for (j, &id) in group.ids.iter().enumerate() {
                let similarity = if j == 0 { None } else { member_similarity(report, group, id) };
                for line in formatter.format_member(j + 1, id, report.result(id), similarity) {
                    let _ = writeln!(out, "{}", line);
                }
            }
            let _ = writeln!(out);
        }
    }

    if !stats.failures.is_empty() {
        let _ = writeln!(out, "{}\n失败视频详情\n{}", rule, rule);
        for (i, failed) in stats.failures.iter().enumerate() {
            for line in formatter.format_failure(i + 1, failed) {
                let _ = writeln!(out, "{}", line);
            }
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "{}", rule);
    out
}

/// 导出 JSON 格式的完整结果
pub fn export_json(report: &BatchReport) -> Value {
    let stats = &report.statistics;
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let groups = report
        .groups
        .iter()
        .map(|group| {
            group
                .ids
                .iter()
                .map(|&id| {
                    let result = report.result(id);
                    json!({
                        "id": id,
                        "location": result.map(|r| r.item.location.as_str()),
                        "ordinal": result.map(|r| r.item.ordinal),
                        "name": result.map(|r| r.meta.name.as_str()),
                        "similarity": member_similarity(report, group, id),
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    json!({
        "timestamp": timestamp,
        "statistics": {
            "total": stats.total,
            "processed": stats.processed,
            "failed": stats.failed,
            "skipped": stats.skipped(),
            "cancelled": stats.cancelled,
            "duplicates_found": stats.duplicates_found,
            "duplicate_rate": stats.duplicate_rate() * 100.,
            "elapsed": stats.elapsed,
            "similarity_threshold": report.threshold,
        },
        "details": stats.results,
        "groups": groups,
        "failures": stats.failures,
    })
}

pub fn write_report(report: &BatchReport, formatter: &dyn ClusterGroupFormatter, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path.as_ref(), render_report(report, formatter))?;
    info!("报告已保存到: {}", path.as_ref().display());
    Ok(())
}

pub fn write_json(report: &BatchReport, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path.as_ref(), serde_json::to_string_pretty(&export_json(report))?)?;
    info!("JSON 结果已保存到: {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batch::{BatchStatistics, WorkItem};
    use crate::cluster::SimilarityEdge;
    use crate::error::ErrorKind;
    use crate::store::FingerprintMeta;

    fn result(id: FingerprintId, ordinal: usize) -> ItemResult {
        ItemResult {
            id,
            item: WorkItem::new(format!("https://a.com/{}", id), ordinal).with_metadata("title", format!("video {}", id)),
            meta: FingerprintMeta { name: format!("name {}", id), ..Default::default() },
            similar: vec![],
            remote: None,
            elapsed: 1.,
        }
    }

    fn report() -> BatchReport {
        let stats = BatchStatistics {
            total: 4,
            processed: 3,
            failed: 1,
            duplicates_found: 1,
            elapsed: 8.,
            results: vec![result(1, 2), result(2, 3), result(3, 4)],
            failures: vec![FailedItem {
                item: WorkItem::new("https://a.com/bad", 5),
                error: "视频下载失败".to_string(),
                kind: ErrorKind::TransientIo,
            }],
            ..Default::default()
        };
        BatchReport::new(
            stats,
            0.9,
            vec![SimilarityEdge::new(3, 1, 0.95)],
            vec![DuplicateGroup { ids: vec![1, 3] }],
        )
    }

    #[test]
    fn test_render_generic() {
        let text = render_report(&report(), &GenericFormatter);
        assert!(text.contains("视频去重报告"));
        assert!(text.contains("【组 1】包含 2 个相似视频"));
        assert!(text.contains("[基准] ID: 1 | name 1"));
        assert!(text.contains("[相似度: 95.00%] ID: 3"));
        assert!(text.contains("https://a.com/bad"));
        assert!(text.contains("重复率: 33.33%"));
    }

    #[test]
    fn test_render_csv() {
        let text = render_report(&report(), &CsvFormatter);
        assert!(text.contains("CSV 第 2 行 | ID: 1"));
        assert!(text.contains("标题: video 3"));
        assert!(text.contains("1. CSV 第 5 行"));
    }

    #[test]
    fn test_export_json() {
        let value = export_json(&report());
        assert_eq!(value["statistics"]["processed"], 3);
        assert_eq!(value["groups"][0][1]["id"], 3);
        assert_eq!(value["groups"][0][1]["ordinal"], 4);
        assert_eq!(value["failures"][0]["kind"], "TransientIo");
        assert_eq!(value["details"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();
        write_report(&report, ReportFormat::Csv.formatter().as_ref(), dir.path().join("r.txt")).unwrap();
        write_json(&report, dir.path().join("r.json")).unwrap();
        let json: Value = serde_json::from_str(&fs::read_to_string(dir.path().join("r.json")).unwrap()).unwrap();
        assert_eq!(json["statistics"]["total"], 4);
    }
}
