//! Plain text and Markdown, split into blank-line separated blocks.

use pulldown_cmark::{Event, Options, Parser, Tag};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub content: String,
    pub translatable: bool,
    /// Blank lines that preceded this block in the source.
    pub blank_before: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextDocument {
    pub blocks: Vec<TextBlock>,
    pub blank_after: usize,
    pub trailing_newline: bool,
    pub markdown: bool,
}

/// Byte ranges of code blocks and front matter, which are kept verbatim.
fn verbatim_ranges(markdown: &str) -> Vec<Range<usize>> {
    Parser::new_ext(markdown, Options::all())
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Start(Tag::CodeBlock(_)) | Event::Start(Tag::MetadataBlock(_)) => Some(range),
            _ => None,
        })
        .collect()
}

impl TextDocument {
    pub fn parse(content: &str, markdown: bool) -> Self {
        let normalized = content.replace("\r\n", "\n");
        let verbatim = if markdown {
            verbatim_ranges(&normalized)
        } else {
            Vec::new()
        };

        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_is_code = false;
        let mut blank = 0;

        let mut flush = |current: &mut Vec<&str>, blank: &mut usize, translatable: bool| {
            if !current.is_empty() {
                blocks.push(TextBlock {
                    content: current.join("\n"),
                    translatable,
                    blank_before: *blank,
                });
                current.clear();
                *blank = 0;
            }
        };

        let mut offset = 0;
        for raw in normalized.split_inclusive('\n') {
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            let line_start = offset;
            let line_end = line_start + line.len().max(1);
            offset += raw.len();

            let in_code = verbatim
                .iter()
                .any(|r| line_start < r.end && r.start < line_end);

            if in_code {
                // Blank lines inside code stay part of the block
                if !current_is_code {
                    flush(&mut current, &mut blank, true);
                }
                current_is_code = true;
                current.push(line);
                continue;
            }

            if current_is_code {
                flush(&mut current, &mut blank, false);
                current_is_code = false;
            }

            if line.trim().is_empty() {
                flush(&mut current, &mut blank, true);
                blank += 1;
            } else {
                current.push(line);
            }
        }
        flush(&mut current, &mut blank, !current_is_code);

        Self {
            blocks,
            blank_after: blank,
            trailing_newline: normalized.ends_with('\n'),
            markdown,
        }
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        for block in &self.blocks {
            lines.extend(std::iter::repeat("").take(block.blank_before));
            lines.push(&block.content);
        }
        lines.extend(std::iter::repeat("").take(self.blank_after));

        let mut out = lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_roundtrip() {
        let source = "First paragraph\nstill first.\n\n\nSecond.\n";
        let doc = TextDocument::parse(source, false);
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[0].content, "First paragraph\nstill first.");
        assert_eq!(doc.blocks[1].blank_before, 2);
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_leading_and_trailing_blank_lines() {
        let source = "\nBody\n\n";
        let doc = TextDocument::parse(source, false);
        assert_eq!(doc.blocks[0].blank_before, 1);
        assert_eq!(doc.blank_after, 1);
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_markdown_fences_are_not_translatable() {
        let source = "# Title\n\n```rust\nfn main() {}\n\nlet x = 1;\n```\nAfter code\n";
        let doc = TextDocument::parse(source, true);
        let flags: Vec<bool> = doc.blocks.iter().map(|b| b.translatable).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert!(doc.blocks[1].content.contains("let x = 1;"));
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_plain_text_ignores_fences() {
        let doc = TextDocument::parse("```\ncode\n```\n", false);
        assert_eq!(doc.blocks.len(), 1);
        assert!(doc.blocks[0].translatable);
    }

    #[test]
    fn test_longer_fence_contains_inner_fence() {
        let source = "Intro\n\n````md\n```rust\nlet x = 1;\n```\n````\n\nOutro\n";
        let doc = TextDocument::parse(source, true);
        let flags: Vec<bool> = doc.blocks.iter().map(|b| b.translatable).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(doc.blocks[1].content, "````md\n```rust\nlet x = 1;\n```\n````");
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_indented_code_is_not_translatable() {
        let source = "Run this:\n\n    cargo install gemtranslate\n\nThen relax.\n";
        let doc = TextDocument::parse(source, true);
        let flags: Vec<bool> = doc.blocks.iter().map(|b| b.translatable).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(doc.blocks[1].content, "    cargo install gemtranslate");
        assert_eq!(doc.render(), source);
    }

    #[test]
    fn test_front_matter_is_not_translatable() {
        let source = "---\ntitle: Guide\nlayout: post\n---\n\nWelcome to the guide.\n";
        let doc = TextDocument::parse(source, true);
        assert!(!doc.blocks[0].translatable);
        assert!(doc.blocks[0].content.starts_with("---\ntitle: Guide"));
        let last = doc.blocks.last().unwrap();
        assert!(last.translatable);
        assert_eq!(last.content, "Welcome to the guide.");
        assert_eq!(doc.render(), source);
    }
}
