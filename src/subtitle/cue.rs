use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A single timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub index: Option<u32>,
    pub start: Duration,
    pub end: Duration,
    pub lines: Vec<String>,
}

impl Cue {
    pub fn start_seconds(&self) -> f64 {
        self.start.as_secs_f64()
    }

    pub fn end_seconds(&self) -> f64 {
        self.end.as_secs_f64()
    }

    /// Text lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Parse an SRT document into cues, skipping malformed blocks.
pub fn parse_srt(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if let Some(cue) = parse_block(&block) {
                cues.push(cue);
            }
            block.clear();
        } else {
            block.push(line);
        }
    }
    if let Some(cue) = parse_block(&block) {
        cues.push(cue);
    }

    cues
}

fn parse_block(lines: &[&str]) -> Option<Cue> {
    if lines.len() < 2 {
        if !lines.is_empty() {
            debug!("Skipping subtitle block with {} line(s)", lines.len());
        }
        return None;
    }

    let first = lines[0].trim();
    let (index, timing_at) = if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
        (first.parse::<u32>().ok(), 1)
    } else {
        (None, 0)
    };

    let Some((start, end)) = parse_timing_line(lines[timing_at]) else {
        debug!("Skipping subtitle block with unparsable timing: {:?}", lines[timing_at]);
        return None;
    };

    if start >= end {
        debug!("Skipping subtitle block ending before it starts: {:?}", lines[timing_at]);
        return None;
    }

    let text: Vec<String> = lines[timing_at + 1..]
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if text.is_empty() {
        debug!("Skipping subtitle block without text");
        return None;
    }

    Some(Cue {
        index,
        start,
        end,
        lines: text,
    })
}

fn parse_timing_line(line: &str) -> Option<(Duration, Duration)> {
    let (start, rest) = line.split_once("-->")?;
    // Cue settings may follow the end time
    let end = rest.split_whitespace().next()?;
    Some((parse_timecode(start.trim())?, parse_timecode(end)?))
}

/// Parse `H?:MM:SS,mmm` (hours optional, `.` accepted for `,`).
pub fn parse_timecode(value: &str) -> Option<Duration> {
    let (clock, millis) = match value.find([',', '.']) {
        Some(pos) => (&value[..pos], &value[pos + 1..]),
        None => (value, "0"),
    };

    if millis.is_empty() || millis.len() > 3 || !millis.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (parse_field(h, usize::MAX)?, parse_field(m, 2)?, parse_field(s, 2)?),
        [m, s] => (0, parse_field(m, 2)?, parse_field(s, 2)?),
        _ => return None,
    };
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let total_seconds = hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)?;
    Duration::from_secs(total_seconds).checked_add(Duration::from_millis(millis))
}

fn parse_field(field: &str, max_len: usize) -> Option<u64> {
    if field.is_empty() || field.len() > max_len || !field.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Serialize cues to SRT, renumbering from 1.
pub fn to_srt(cues: &[Cue]) -> String {
    let mut srt_content = String::new();

    for (index, cue) in cues.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(cue.start),
            format_srt_time(cue.end),
            cue.text()
        ));
    }

    srt_content
}

/// Format time to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(time: Duration) -> String {
    let total_milliseconds = time.as_millis() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Format time for ASS events (H:MM:SS.cc)
pub fn format_ass_time(time: Duration) -> String {
    let total_centiseconds = (time.as_millis() as u64 + 5) / 10;
    let hours = total_centiseconds / 360_000;
    let minutes = (total_centiseconds % 360_000) / 6_000;
    let secs = (total_centiseconds % 6_000) / 100;
    let centis = total_centiseconds % 100;

    format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, centis)
}
