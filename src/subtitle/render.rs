use std::path::Path;

use super::cue::{format_ass_time, Cue};
use super::style::ResolvedStyle;

/// Output resolution declared in the style document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Used when the source media cannot be probed.
    pub const FALLBACK: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Compiled, renderer-ready representation of cues plus style.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderDescription {
    /// A `drawtext` filter chain with one directive per cue.
    Overlay { filter: String },
    /// A complete ASS document (styles plus dialogue events).
    StyleDocument { document: String },
}

impl RenderDescription {
    pub fn as_str(&self) -> &str {
        match self {
            RenderDescription::Overlay { filter } => filter,
            RenderDescription::StyleDocument { document } => document,
        }
    }
}

/// Build a chain of timed `drawtext` directives, or `None` when there are no cues.
pub fn build_overlay_filter(cues: &[Cue], style: &ResolvedStyle, font_file: &Path) -> Option<String> {
    if cues.is_empty() {
        return None;
    }

    let font = escape_option_value(&forward_slashes(font_file));
    let shift = (style.margin_l as i64 - style.margin_r as i64) / 2;
    let x = match shift {
        0 => "(w-text_w)/2".to_string(),
        s if s > 0 => format!("(w-text_w)/2+{}", s),
        s => format!("(w-text_w)/2{}", s),
    };

    let directives: Vec<String> = cues
        .iter()
        .map(|cue| {
            let text = cue
                .lines
                .iter()
                .map(|l| escape_option_value(l))
                .collect::<Vec<_>>()
                .join("\n");

            let mut options = format!(
                "fontfile={}:text={}:expansion=none:fontsize={}:fontcolor={}:x={}:y=h-text_h-{}",
                font,
                text,
                style.font_size,
                style.color.to_ffmpeg(),
                x,
                style.margin_v
            );
            if style.outline_width > 0.0 {
                options.push_str(&format!(
                    ":borderw={}:bordercolor=black",
                    format_number(style.outline_width)
                ));
            }
            if style.shadow_depth > 0.0 {
                let depth = format_number(style.shadow_depth);
                options.push_str(&format!(":shadowx={}:shadowy={}:shadowcolor=black", depth, depth));
            }
            if style.show_background {
                options.push_str(":box=1:boxcolor=black@0.6:boxborderw=6");
            }
            options.push_str(&format!(
                ":enable=between(t,{},{})",
                format_number(cue.start_seconds()),
                format_number(cue.end_seconds())
            ));
            format!("drawtext={}", escape_filtergraph(&options))
        })
        .collect();

    Some(directives.join(","))
}

/// Build an ASS document with a single `Default` style and one dialogue per cue.
pub fn build_style_document(cues: &[Cue], style: &ResolvedStyle, resolution: Resolution) -> String {
    let bold = if style.bold { -1 } else { 0 };
    let italic = if style.italic { -1 } else { 0 };
    // BorderStyle 3 draws an opaque box behind the text
    let border_style = if style.show_background { 3 } else { 1 };
    let back_colour = if style.show_background { "&H80000000" } else { "&H00000000" };

    let mut ass = vec![
        "[Script Info]".to_string(),
        "ScriptType: v4.00+".to_string(),
        format!("PlayResX: {}", resolution.width),
        format!("PlayResY: {}", resolution.height),
        String::new(),
        "[V4+ Styles]".to_string(),
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding".to_string(),
        format!(
            "Style: Default,{},{},{},&H000000FF,&H00000000,{},{},{},0,0,100,100,0,0,{},{},{},2,{},{},{},1",
            style.font_family.replace(',', " "),
            style.font_size,
            style.color.to_ass(),
            back_colour,
            bold,
            italic,
            border_style,
            format_number(style.outline_width),
            format_number(style.shadow_depth),
            style.margin_l,
            style.margin_r,
            style.margin_v
        ),
        String::new(),
        "[Events]".to_string(),
        "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text".to_string(),
    ];

    for cue in cues {
        ass.push(format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            format_ass_time(cue.start),
            format_ass_time(cue.end),
            cue.lines.join("\\N")
        ));
    }

    let mut document = ass.join("\n");
    document.push('\n');
    document
}

/// Escape a single filter option value, so `:` and quotes stay inside it.
pub fn escape_option_value(value: &str) -> String {
    escape_chars(value, &['\\', '\'', ':'])
}

/// Escape a filter's whole option string for the filtergraph parser.
pub fn escape_filtergraph(options: &str) -> String {
    escape_chars(options, &['\\', '\'', ',', ';', '[', ']'])
}

/// A path as the first option of a filter such as `ass=`, escaped for both levels.
pub fn escape_filter_path(path: &Path) -> String {
    escape_filtergraph(&escape_option_value(&forward_slashes(path)))
}

fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}
