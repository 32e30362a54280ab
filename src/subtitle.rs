use std::fmt;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// One SRT cue.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtEntry {
    /// Sequential cue number
    pub index: u32,
    /// Start timestamp
    pub start: Duration,
    /// End timestamp
    pub end: Duration,
    /// Cue text (may span multiple lines)
    pub text: String,
}

impl SrtEntry {
    pub fn new(index: u32, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into().trim().to_string(),
        }
    }

    /// Shift both timestamps forward by `offset`.
    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            index: self.index,
            start: self.start + offset,
            end: self.end + offset,
            text: self.text.clone(),
        }
    }
}

impl fmt::Display for SrtEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// Parse the content of an SRT file into cues.
///
/// Malformed blocks (fewer than three lines) are skipped, matching how the
/// per-segment transcription service occasionally pads its output.
pub fn parse(content: &str) -> PipelineResult<Vec<SrtEntry>> {
    let mut entries = Vec::new();

    for block in content.trim().split("\n\n") {
        let lines: Vec<&str> = block.lines().collect();
        if lines.len() < 3 {
            continue;
        }
        let index: u32 = lines[0].trim().parse().unwrap_or(entries.len() as u32 + 1);
        let (start, end) = parse_cue_times(lines[1])?;
        let text = lines[2..].join("\n");
        entries.push(SrtEntry::new(index, start, end, text));
    }

    Ok(entries)
}

/// Render cues back into SRT file content.
pub fn render(entries: &[SrtEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

/// Subtitle cues of one narration segment, paired with the duration of that
/// segment's audio file. `None` entries mark segments whose transcription
/// never arrived; their audio still contributes to the running offset.
pub struct SegmentCues {
    pub entries: Option<Vec<SrtEntry>>,
    pub audio_duration: Duration,
}

/// Merge per-segment subtitle cues into one track.
///
/// Each segment's cues are shifted forward by the cumulative duration of all
/// prior segments' audio, then renumbered sequentially. Segment order is the
/// generation index order; reordering here would corrupt subtitle timing.
pub fn merge_segments(segments: &[SegmentCues]) -> Vec<SrtEntry> {
    let mut merged = Vec::new();
    let mut offset = Duration::ZERO;
    let mut next_index = 1u32;

    for segment in segments {
        if let Some(entries) = &segment.entries {
            for entry in entries {
                let mut shifted = entry.shifted(offset);
                shifted.index = next_index;
                next_index += 1;
                merged.push(shifted);
            }
        }
        offset += segment.audio_duration;
    }

    merged
}

/// Format a duration as an SRT timestamp (HH:MM:SS,mmm).
pub fn format_timestamp(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}

/// Parse an SRT cue timing line ("HH:MM:SS,mmm --> HH:MM:SS,mmm").
fn parse_cue_times(line: &str) -> PipelineResult<(Duration, Duration)> {
    let parts: Vec<&str> = line.split(" --> ").collect();
    if parts.len() != 2 {
        return Err(PipelineError::validation(format!(
            "invalid subtitle timing line: {line}"
        )));
    }
    Ok((parse_timestamp(parts[0])?, parse_timestamp(parts[1])?))
}

fn parse_timestamp(timestamp: &str) -> PipelineResult<Duration> {
    let timestamp = timestamp.trim();
    let (hms, millis) = timestamp.split_once(',').ok_or_else(|| {
        PipelineError::validation(format!("invalid subtitle timestamp: {timestamp}"))
    })?;

    let fields: Vec<&str> = hms.split(':').collect();
    if fields.len() != 3 {
        return Err(PipelineError::validation(format!(
            "invalid subtitle timestamp: {timestamp}"
        )));
    }

    let parse_field = |s: &str| {
        s.parse::<u64>().map_err(|_| {
            PipelineError::validation(format!("invalid subtitle timestamp: {timestamp}"))
        })
    };

    let hours = parse_field(fields[0])?;
    let minutes = parse_field(fields[1])?;
    let seconds = parse_field(fields[2])?;
    let millis = parse_field(millis)?;

    Ok(Duration::from_millis(
        (hours * 3600 + minutes * 60 + seconds) * 1000 + millis,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        assert_eq!(format_timestamp(Duration::from_secs(3661)), "01:01:01,000");
        assert_eq!(format_timestamp(Duration::from_millis(1500)), "00:00:01,500");
        assert_eq!(
            parse_timestamp("01:01:01,000").unwrap(),
            Duration::from_secs(3661)
        );
        assert_eq!(
            parse_timestamp("00:00:01,500").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_parse_srt_content() {
        let content = "1\n00:00:00,000 --> 00:00:02,500\nHello there\n\n2\n00:00:02,500 --> 00:00:05,000\nSecond line\nwrapped\n";
        let entries = parse(content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "Hello there");
        assert_eq!(entries[1].text, "Second line\nwrapped");
        assert_eq!(entries[1].start, Duration::from_millis(2500));
    }

    #[test]
    fn test_parse_skips_malformed_blocks() {
        let content = "1\n00:00:00,000 --> 00:00:01,000\nOk\n\ngarbage\n\n2\n00:00:01,000 --> 00:00:02,000\nAlso ok\n";
        let entries = parse(content).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_merge_offsets_cues_by_cumulative_audio_duration() {
        let cue = |start_ms: u64| {
            vec![SrtEntry::new(
                1,
                Duration::from_millis(start_ms),
                Duration::from_millis(start_ms + 900),
                "cue",
            )]
        };
        let segments = vec![
            SegmentCues {
                entries: Some(cue(0)),
                audio_duration: Duration::from_millis(3200),
            },
            SegmentCues {
                entries: Some(cue(0)),
                audio_duration: Duration::from_millis(2100),
            },
            SegmentCues {
                entries: Some(cue(0)),
                audio_duration: Duration::from_millis(4000),
            },
        ];

        let merged = merge_segments(&segments);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].start, Duration::ZERO);
        assert_eq!(merged[1].start, Duration::from_millis(3200));
        assert_eq!(merged[2].start, Duration::from_millis(5300));
        // Cues are renumbered sequentially.
        assert_eq!(
            merged.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_merge_skips_missing_segments_but_keeps_their_offset() {
        let segments = vec![
            SegmentCues {
                entries: None,
                audio_duration: Duration::from_secs(5),
            },
            SegmentCues {
                entries: Some(vec![SrtEntry::new(
                    1,
                    Duration::ZERO,
                    Duration::from_secs(1),
                    "late cue",
                )]),
                audio_duration: Duration::from_secs(3),
            },
        ];

        let merged = merge_segments(&segments);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, Duration::from_secs(5));
        assert_eq!(merged[0].index, 1);
    }

    #[test]
    fn test_render_format() {
        let entries = vec![SrtEntry::new(
            1,
            Duration::ZERO,
            Duration::from_millis(1200),
            "Hi",
        )];
        let rendered = render(&entries);
        assert!(rendered.contains("00:00:00,000 --> 00:00:01,200"));
        assert!(rendered.ends_with("Hi\n\n"));
    }
}
