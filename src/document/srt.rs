// SRT subtitle format
use crate::error::{Result, TranslateError};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: Duration,
    pub end: Duration,
    /// Anything after the end timestamp on the timing line (position hints).
    pub settings: String,
    pub text: String,
}

fn timing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})(.*)$",
        )
        .expect("valid timing regex")
    })
}

fn capture_duration(caps: &regex::Captures<'_>, first: usize) -> Duration {
    let field = |i: usize| -> u64 {
        caps.get(first + i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    Duration::from_secs(field(0) * 3600 + field(1) * 60 + field(2)) + Duration::from_millis(field(3))
}

pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>> {
    let normalized = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for (block_no, block) in normalized.split("\n\n").enumerate() {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            continue;
        }

        // The numeric counter line is optional in the wild
        let timing_idx = if timing_re().is_match(lines[0].trim()) { 0 } else { 1 };
        let timing = lines.get(timing_idx).map(|l| l.trim()).unwrap_or("");
        let caps = timing_re().captures(timing).ok_or_else(|| TranslateError::Parse {
            format: "srt".to_string(),
            message: format!("block {} has no timing line: {:?}", block_no + 1, lines[0]),
        })?;

        cues.push(SubtitleCue {
            start: capture_duration(&caps, 1),
            end: capture_duration(&caps, 5),
            settings: caps.get(9).map(|m| m.as_str().to_string()).unwrap_or_default(),
            text: lines[timing_idx + 1..].join("\n"),
        });
    }

    Ok(cues)
}

/// Render cues, renumbering from 1.
pub fn format_srt(cues: &[SubtitleCue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(i, cue)| {
            format!(
                "{}\n{} --> {}{}\n{}\n",
                i + 1,
                format_timestamp(cue.start),
                format_timestamp(cue.end),
                cue.settings,
                cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = d.subsec_millis();
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}
