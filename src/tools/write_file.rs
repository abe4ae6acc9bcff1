//! 报告写入工具
//!
//! WriteFileTool 把 LLM 生成的 HTML 报告交给 ArtifactWriter；
//! FsArtifactWriter 绑定根目录，拒绝绝对路径与 `..`，父目录不存在时自动创建。
//! 审批预览展示目标文件名与 HTML 的纯文本渲染（html2text）。

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use html2text::from_read;
use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::tools::schema::args_schema;
use crate::tools::Tool;

/// 预览中 HTML 渲染文本的最大字符数
const PREVIEW_CHARS: usize = 1200;

/// 报告产物写入能力（格式与落盘方式对核心透明）
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// 写入产物，返回实际写入位置的描述
    async fn write(&self, relative_path: &str, content: &str) -> Result<String, String>;
}

/// 沙箱文件写入：所有路径必须落在 root_dir 之下
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    root_dir: PathBuf,
}

impl FsArtifactWriter {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    /// 校验相对路径：禁止绝对路径、`..` 与空路径
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf, String> {
        let rel = Path::new(relative_path.trim_start_matches("./"));
        if rel.as_os_str().is_empty() {
            return Err("Missing file path".to_string());
        }
        for c in rel.components() {
            match c {
                Component::Normal(_) | Component::CurDir => {}
                // 如 ../../etc/passwd
                _ => return Err(format!("Path escape attempt: {}", relative_path)),
            }
        }
        Ok(self.root_dir.join(rel))
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(&self, relative_path: &str, content: &str) -> Result<String, String> {
        let path = self.resolve(relative_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create dir failed: {}", e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("Write failed: {}", e))?;
        Ok(path.display().to_string())
    }
}

/// write_file 工具参数
#[allow(dead_code)]
#[derive(JsonSchema)]
struct WriteFileArgs {
    /// 相对报告目录的文件名，如 weather.html
    file_path: String,
    /// 文件内容（HTML）
    text: String,
}

pub struct WriteFileTool {
    writer: Arc<dyn ArtifactWriter>,
}

impl WriteFileTool {
    pub fn new(writer: Arc<dyn ArtifactWriter>) -> Self {
        Self { writer }
    }

    /// 使用沙箱目录的便捷构造
    pub fn in_dir(root_dir: impl AsRef<Path>) -> Self {
        Self::new(Arc::new(FsArtifactWriter::new(root_dir)))
    }
}

/// HTML 转为终端可读文本；失败时原样返回
fn render_html(html: &str) -> String {
    match from_read(html.as_bytes(), 100) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => html.to_string(),
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a report file into the report directory. Args: {\"file_path\": \"name.html\", \"text\": \"<html>...</html>\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WriteFileArgs>()
    }

    fn preview(&self, args: &Map<String, Value>) -> String {
        let file_path = args.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
        let mut out = format!("Tool: {}\nFile: {}\n", self.name(), file_path);
        if let Some(text) = args.get("text").and_then(|v| v.as_str()) {
            let rendered = render_html(text);
            let body: String = rendered.chars().take(PREVIEW_CHARS).collect();
            out.push_str("Content preview:\n");
            out.push_str(body.trim_end());
            if rendered.chars().count() > PREVIEW_CHARS {
                out.push_str("\n...");
            }
            out.push('\n');
        }
        out
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing text".to_string())?;
        tracing::info!(file_path = %file_path, bytes = text.len(), "write_file tool execute");
        let location = self.writer.write(file_path, text).await?;
        Ok(format!("File written successfully to {}.", location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_escape() {
        let w = FsArtifactWriter::new("/tmp/reports");
        assert!(w.resolve("../etc/passwd").is_err());
        assert!(w.resolve("/etc/passwd").is_err());
        assert!(w.resolve("").is_err());
        assert_eq!(
            w.resolve("./sub/report.html").unwrap(),
            PathBuf::from("/tmp/reports/sub/report.html")
        );
    }

    #[tokio::test]
    async fn test_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let tool = WriteFileTool::in_dir(temp_dir.path().join("report"));
        let msg = tool
            .execute(serde_json::json!({"file_path": "w/weather.html", "text": "<h1>Sunny</h1>"}))
            .await
            .unwrap();
        assert!(msg.contains("weather.html"));
        let written =
            std::fs::read_to_string(temp_dir.path().join("report/w/weather.html")).unwrap();
        assert_eq!(written, "<h1>Sunny</h1>");
    }

    #[tokio::test]
    async fn test_write_rejects_escape() {
        let temp_dir = TempDir::new().unwrap();
        let tool = WriteFileTool::in_dir(temp_dir.path());
        let err = tool
            .execute(serde_json::json!({"file_path": "../x.html", "text": "x"}))
            .await
            .unwrap_err();
        assert!(err.contains("Path escape"));
    }

    #[test]
    fn test_preview_renders_html() {
        let tool = WriteFileTool::in_dir("/tmp");
        let mut args = Map::new();
        args.insert("file_path".to_string(), Value::String("weather.html".to_string()));
        args.insert(
            "text".to_string(),
            Value::String(
                "<html><body><h1>Weather</h1><p>Sunny today</p></body></html>".to_string(),
            ),
        );
        let preview = tool.preview(&args);
        assert!(preview.contains("File: weather.html"));
        assert!(preview.contains("Sunny today"));
        assert!(!preview.contains("<p>"));
    }
}
