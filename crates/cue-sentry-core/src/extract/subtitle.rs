//! Line-oriented SRT / WebVTT reader. Both formats are blocks separated by
//! blank lines with one `start --> end` timing line per cue; anything before
//! the timing line (SRT index, VTT cue id) is ignored, and blocks without a
//! timing line (the `WEBVTT` header, `NOTE`, `STYLE`) are skipped.

use std::sync::LazyLock;

use regex::Regex;

/// `<i>`-style tags and `{\an8}`-style override blocks. A bracket with no
/// closing partner is left as text.
static MARKUP_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>|\{[^{}]*\}").ok());

/// One timed subtitle cue with markup removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

pub fn parse_subtitles(raw: &[u8]) -> Vec<Cue> {
    let content = String::from_utf8_lossy(raw);
    let content = content.trim_start_matches('\u{feff}');

    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in content.lines() {
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
    let timing_at = lines.iter().position(|l| l.contains("-->"))?;
    let (start_ms, end_ms) = parse_timing(lines[timing_at])?;

    let text = lines[timing_at + 1..]
        .iter()
        .map(|l| clean_text(l))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }
    Some(Cue {
        start_ms,
        end_ms,
        text,
    })
}

fn parse_timing(line: &str) -> Option<(i64, i64)> {
    let (start, rest) = line.split_once("-->")?;
    // VTT cue settings may follow the end time.
    let end = rest.split_whitespace().next()?;
    let start_ms = parse_timestamp(start.trim())?;
    let end_ms = parse_timestamp(end)?;
    Some((start_ms, end_ms.max(start_ms)))
}

/// `HH:MM:SS,mmm`, `HH:MM:SS.mmm` or `MM:SS.mmm` to milliseconds.
pub fn parse_timestamp(ts: &str) -> Option<i64> {
    let (clock, millis) = match ts.rsplit_once(|c| c == ',' || c == '.') {
        Some((clock, frac)) => {
            let digits: String = frac.chars().take(3).collect();
            let scale = 10_i64.pow(3 - digits.len() as u32);
            (clock, digits.parse::<i64>().ok()? * scale)
        }
        None => (ts, 0),
    };

    let parts = clock
        .split(':')
        .map(|p| p.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    if minutes >= 60 || seconds >= 60 || hours < 0 || minutes < 0 || seconds < 0 {
        return None;
    }
    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)?
        .checked_mul(1000)?
        .checked_add(millis)
}

/// Drop `<i>`-style tags and `{\an8}`-style override blocks, decode the
/// common entities and collapse whitespace.
fn clean_text(line: &str) -> String {
    let out = match MARKUP_RE.as_ref() {
        Some(re) => re.replace_all(line, ""),
        None => line.into(),
    };
    let out = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_srt() {
        let srt = "\u{feff}1\r\n00:00:01,000 --> 00:00:03,500\r\n<i>Hello</i>\r\nthere\r\n\r\n\
                   2\r\n00:00:04,000 --> 00:00:05,000\r\n{\\an8}Second line\r\n";
        let cues = parse_subtitles(srt.as_bytes());
        assert_eq!(
            cues,
            vec![
                Cue {
                    start_ms: 1000,
                    end_ms: 3500,
                    text: "Hello there".to_string()
                },
                Cue {
                    start_ms: 4000,
                    end_ms: 5000,
                    text: "Second line".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_vtt_with_header_and_settings() {
        let vtt = "WEBVTT\n\nNOTE a comment\n\nintro\n00:01.000 --> 00:02.250 align:start\n\
                   <v Roger>Tom &amp; Jerry\n\n00:00:03.000 --> 00:00:04.000\n   \n";
        let cues = parse_subtitles(vtt.as_bytes());
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].end_ms, 2250);
        assert_eq!(cues[0].text, "Tom & Jerry");
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("01:02:03,004"), Some(3_723_004));
        assert_eq!(parse_timestamp("02:03.5"), Some(123_500));
        assert_eq!(parse_timestamp("00:61:00.000"), None);
        assert_eq!(parse_timestamp("garbage"), None);
    }

    #[test]
    fn test_oversized_hours_rejected() {
        assert_eq!(parse_timestamp("9999999999999999:00:00,000"), None);
        let srt = "1\n9999999999999999:00:00,000 --> 9999999999999999:00:01,000\nhello\n";
        assert!(parse_subtitles(srt.as_bytes()).is_empty());
    }

    #[test]
    fn test_unclosed_brackets_kept_as_text() {
        assert_eq!(
            clean_text("I <3 you but I will kill him"),
            "I <3 you but I will kill him"
        );
        assert_eq!(clean_text("{sigh} fine <b>go</b> {"), "fine go {");
    }

    #[test]
    fn test_non_subtitle_bytes_yield_nothing() {
        assert!(parse_subtitles(&[0xff, 0x00, 0x12, 0x88]).is_empty());
    }
}
