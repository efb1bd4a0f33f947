// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 类别名称解析
//!
//! 优先读取 `coco.names` (每行一个名称),其次解析 `metadata.yaml` 中的
//! `names: [..]` 或 `names: {0: .., 1: ..}`。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

/// 类别索引 → 可读名称 (纯函数,无状态)
pub trait LabelResolver: Send + Sync {
    fn label(&self, class_id: usize) -> String;
}

/// 名称表,越界时返回 `class_<idx>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelResolver for LabelTable {
    fn label(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 从目录加载: coco.names → metadata.yaml → 空表
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();

        match Self::from_names_file(dir.join("coco.names")) {
            Ok(table) if !table.is_empty() => {
                info!("🏷️ 类别名称已从 coco.names 加载 ({}类)", table.len());
                return table;
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️ coco.names 读取失败: {:#}", e),
        }

        match fs::read_to_string(dir.join("metadata.yaml")) {
            Ok(yaml) => {
                let table = Self::from_metadata_yaml(&yaml);
                if !table.is_empty() {
                    info!("🏷️ 类别名称已从 metadata.yaml 加载 ({}类)", table.len());
                    return table;
                }
            }
            Err(e) => warn!("⚠️ metadata.yaml 读取失败: {}", e),
        }

        warn!("⚠️ 未找到类别名称,使用 class_<idx>");
        Self::default()
    }

    pub fn from_names_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::from_names(&text))
    }

    pub fn from_names(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Self { names }
    }

    /// 解析 YOLO 导出的 metadata.yaml
    pub fn from_metadata_yaml(yaml: &str) -> Self {
        let unquote = |s: &str| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string();

        // names: [person, bicycle, ...]
        if let Some(inside) = capture(r"(?s)names:\s*\[(.*?)\]", yaml) {
            let names: Vec<String> = inside
                .split(',')
                .map(unquote)
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                return Self { names };
            }
        }

        // names: {0: person, 1: bicycle, ...}
        if let Some(inside) = capture(r"(?s)names:\s*\{(.*?)\}", yaml) {
            let names: Vec<String> = inside
                .split(',')
                .filter_map(|part| part.split_once(':').map(|(_, name)| unquote(name)))
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                return Self { names };
            }
        }

        // names:
        //   0: person
        //   1: bicycle
        let block = Regex::new(r"(?m)^\s+(\d+):\s*(.+?)\s*$").ok();
        if let (Some(start), Some(block)) = (yaml.find("names:"), block) {
            let mut indexed: Vec<(usize, String)> = block
                .captures_iter(&yaml[start..])
                .filter_map(|c| Some((c[1].parse().ok()?, unquote(&c[2]))))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            if !indexed.is_empty() {
                return Self {
                    names: indexed.into_iter().map(|(_, n)| n).collect(),
                };
            }
        }

        Self::default()
    }
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_index_falls_back() {
        let table = LabelTable::from_names("person\n\nbicycle\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.label(1), "bicycle");
        assert_eq!(table.label(7), "class_7");
    }

    #[test]
    fn parses_list_metadata() {
        let table =
            LabelTable::from_metadata_yaml("task: detect\nnames: ['person', \"car\", dog]\n");
        assert_eq!(table, LabelTable::new(vec!["person".into(), "car".into(), "dog".into()]));
    }

    #[test]
    fn parses_map_metadata() {
        let table = LabelTable::from_metadata_yaml("names: {0: person, 1: 'traffic light'}");
        assert_eq!(table.label(1), "traffic light");
    }

    #[test]
    fn parses_block_metadata() {
        let yaml = "stride: 32\nnames:\n  1: car\n  0: person\nimgsz: [640, 640]\n";
        let table = LabelTable::from_metadata_yaml(yaml);
        assert_eq!(table.label(0), "person");
        assert_eq!(table.label(1), "car");
    }

    #[test]
    fn load_dir_prefers_names_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.yaml"), "names: [a, b]").unwrap();
        assert_eq!(LabelTable::load_dir(dir.path()).label(0), "a");

        fs::write(dir.path().join("coco.names"), "person\n").unwrap();
        assert_eq!(LabelTable::load_dir(dir.path()).label(0), "person");
    }

    #[test]
    fn load_dir_missing_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LabelTable::load_dir(dir.path()).is_empty());
    }
}
