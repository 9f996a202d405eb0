pub mod srt;
pub mod text;
pub mod tree;

use crate::error::{Result, TranslateError};
use serde::Serialize;
use srt::SubtitleCue;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use text::TextDocument;
use tree::TextTree;

pub use tree::is_identifier_like;

/// File extensions the dispatcher understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "json", "yml", "yaml", "toml", // Structured
    "srt",  // Subtitles
    "txt", "md", "markdown", // Text
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
    Srt,
    Text,
    Markdown,
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentFormat::Json => write!(f, "json"),
            DocumentFormat::Yaml => write!(f, "yaml"),
            DocumentFormat::Toml => write!(f, "toml"),
            DocumentFormat::Srt => write!(f, "srt"),
            DocumentFormat::Text => write!(f, "text"),
            DocumentFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(DocumentFormat::Json),
            "yml" | "yaml" => Some(DocumentFormat::Yaml),
            "toml" => Some(DocumentFormat::Toml),
            "srt" => Some(DocumentFormat::Srt),
            "txt" => Some(DocumentFormat::Text),
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| TranslateError::UnsupportedFormat(path.display().to_string()))
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

/// One translatable string and the path that locates it in its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnit {
    pub key: String,
    pub text: String,
}

impl TextUnit {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A parsed input file.
#[derive(Debug, Clone)]
pub enum Document {
    Json(serde_json::Value),
    Yaml(serde_yaml::Value),
    Toml(toml::Table),
    Srt(Vec<SubtitleCue>),
    Text(TextDocument),
}

fn parse_error(format: DocumentFormat, e: impl std::fmt::Display) -> TranslateError {
    TranslateError::Parse {
        format: format.to_string(),
        message: e.to_string(),
    }
}

fn cue_key(index: usize) -> String {
    format!("cue[{:04}]", index)
}

fn block_key(index: usize) -> String {
    format!("para[{:06}]", index)
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TranslateError::FileNotFound(path.display().to_string()));
        }
        let format = DocumentFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(format, &content)
    }

    pub fn parse(format: DocumentFormat, content: &str) -> Result<Self> {
        let content = content.trim_start_matches('\u{feff}');
        match format {
            DocumentFormat::Json => serde_json::from_str(content)
                .map(Document::Json)
                .map_err(|e| parse_error(format, e)),
            DocumentFormat::Yaml => serde_yaml::from_str(content)
                .map(Document::Yaml)
                .map_err(|e| parse_error(format, e)),
            DocumentFormat::Toml => toml::from_str(content)
                .map(Document::Toml)
                .map_err(|e| parse_error(format, e)),
            DocumentFormat::Srt => srt::parse_srt(content).map(Document::Srt),
            DocumentFormat::Text => Ok(Document::Text(TextDocument::parse(content, false))),
            DocumentFormat::Markdown => Ok(Document::Text(TextDocument::parse(content, true))),
        }
    }

    pub fn format(&self) -> DocumentFormat {
        match self {
            Document::Json(_) => DocumentFormat::Json,
            Document::Yaml(_) => DocumentFormat::Yaml,
            Document::Toml(_) => DocumentFormat::Toml,
            Document::Srt(_) => DocumentFormat::Srt,
            Document::Text(doc) if doc.markdown => DocumentFormat::Markdown,
            Document::Text(_) => DocumentFormat::Text,
        }
    }

    /// Translatable strings in document order.
    pub fn extract_texts(&self) -> Vec<TextUnit> {
        let mut units = Vec::new();
        match self {
            Document::Json(value) => value.collect_texts("", &mut units),
            Document::Yaml(value) => value.collect_texts("", &mut units),
            Document::Toml(table) => table.collect_texts("", &mut units),
            Document::Srt(cues) => {
                for (i, cue) in cues.iter().enumerate() {
                    if !cue.text.trim().is_empty() {
                        units.push(TextUnit::new(cue_key(i), cue.text.clone()));
                    }
                }
            }
            Document::Text(doc) => {
                for (i, block) in doc.blocks.iter().enumerate() {
                    if block.translatable {
                        units.push(TextUnit::new(block_key(i), block.content.clone()));
                    }
                }
            }
        }
        units
    }

    /// Copy of this document with translated strings written back by key.
    /// Keys missing from `translations` keep their original text.
    pub fn apply_translations(&self, translations: &HashMap<String, String>) -> Document {
        let mut doc = self.clone();
        match &mut doc {
            Document::Json(value) => value.replace_texts("", translations),
            Document::Yaml(value) => value.replace_texts("", translations),
            Document::Toml(table) => table.replace_texts("", translations),
            Document::Srt(cues) => {
                for (i, cue) in cues.iter_mut().enumerate() {
                    if let Some(text) = translations.get(&cue_key(i)) {
                        cue.text = text.trim().to_string();
                    }
                }
            }
            Document::Text(text_doc) => {
                for (i, block) in text_doc.blocks.iter_mut().enumerate() {
                    if !block.translatable {
                        continue;
                    }
                    if let Some(text) = translations.get(&block_key(i)) {
                        block.content = text.trim_end().to_string();
                    }
                }
            }
        }
        doc
    }

    pub fn render(&self) -> Result<String> {
        match self {
            Document::Json(value) => {
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
                let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
                value.serialize(&mut ser)?;
                let mut out = String::from_utf8(buf)
                    .map_err(|e| parse_error(DocumentFormat::Json, e))?;
                out.push('\n');
                Ok(out)
            }
            Document::Yaml(value) => Ok(serde_yaml::to_string(value)?),
            Document::Toml(table) => Ok(toml::to_string(table)?),
            Document::Srt(cues) => Ok(srt::format_srt(cues)),
            Document::Text(doc) => Ok(doc.render()),
        }
    }

    /// Write the rendered document, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        write_atomic(path, rendered.as_bytes())
    }
}

/// Write through a temp file in the destination directory, then rename over
/// the target so readers never observe a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| TranslateError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(&PathBuf::from("a/en.JSON")).unwrap(),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::from_path(&PathBuf::from("lang.yml")).unwrap(),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(&PathBuf::from("README.md")).unwrap(),
            DocumentFormat::Markdown
        );
        assert!(DocumentFormat::from_path(&PathBuf::from("movie.mp4")).is_err());
        assert!(DocumentFormat::from_path(&PathBuf::from("Makefile")).is_err());
    }

    #[test]
    fn test_json_preserves_key_order_and_unicode() {
        let doc = Document::parse(DocumentFormat::Json, r#"{"z": "Zebra", "a": "Apple"}"#).unwrap();
        let translations: HashMap<String, String> =
            [("z".to_string(), "Ngựa vằn".to_string())].into_iter().collect();
        let out = doc.apply_translations(&translations).render().unwrap();

        assert_eq!(out, "{\n    \"z\": \"Ngựa vằn\",\n    \"a\": \"Apple\"\n}\n");
    }

    #[test]
    fn test_srt_units_and_apply() {
        let doc = Document::parse(
            DocumentFormat::Srt,
            "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nBye\n",
        )
        .unwrap();
        let units = doc.extract_texts();
        assert_eq!(units[0], TextUnit::new("cue[0000]", "Hello"));
        assert_eq!(units[1].key, "cue[0001]");

        let translations: HashMap<String, String> =
            [("cue[0001]".to_string(), "Tạm biệt\n".to_string())].into_iter().collect();
        let out = doc.apply_translations(&translations).render().unwrap();
        assert!(out.contains("00:00:03,000 --> 00:00:04,000\nTạm biệt\n"));
        assert!(out.contains("Hello"));
    }

    #[test]
    fn test_markdown_skips_code_blocks() {
        let doc = Document::parse(DocumentFormat::Markdown, "Intro\n\n```\ncode\n```\n").unwrap();
        let units = doc.extract_texts();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].key, "para[000000]");
        assert_eq!(doc.format(), DocumentFormat::Markdown);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Document::parse(DocumentFormat::Json, "{not json").unwrap_err();
        assert!(matches!(err, TranslateError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Document::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, TranslateError::FileNotFound(_)));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("strings_vi.yaml");
        let doc = Document::parse(DocumentFormat::Yaml, "greeting: Hello\n").unwrap();
        doc.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "greeting: Hello\n");
    }
}
