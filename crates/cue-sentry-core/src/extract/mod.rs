mod subtitle;
mod video;

pub use subtitle::{parse_subtitles, parse_timestamp, Cue};

use crate::error::{Error, Result};
use crate::fingerprint::extension_of;
use std::fs;
use std::path::Path;

const SUBTITLE_EXTENSIONS: [&str; 2] = [".srt", ".vtt"];
const VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".mkv", ".avi"];

/// The unit of classification: one cue plus the text of its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub index: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub context_before: String,
    pub context_after: String,
}

impl Span {
    /// Text handed to the models: the cue alone, or joined with its context.
    pub fn model_input(&self, with_context: bool, max_chars: usize) -> String {
        let joined = if with_context {
            [&self.context_before, &self.text, &self.context_after]
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            self.text.clone()
        };
        joined.chars().take(max_chars).collect()
    }
}

/// Read the timed text of a subtitle or video file. A file with no usable
/// text at all is an error.
pub fn extract_spans(path: &Path, context_window: usize) -> Result<Vec<Span>> {
    let ext = extension_of(path);
    let raw = if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        fs::read(path).map_err(|e| Error::Extraction {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        video::extract_subtitle_track(path)?
    } else {
        return Err(Error::Extraction {
            path: path.display().to_string(),
            reason: format!("unsupported file type '{}'", ext),
        });
    };

    let cues = parse_subtitles(&raw);
    if cues.is_empty() {
        return Err(Error::Extraction {
            path: path.display().to_string(),
            reason: "no subtitle text found".to_string(),
        });
    }
    Ok(build_spans(&cues, context_window))
}

pub fn build_spans(cues: &[Cue], context_window: usize) -> Vec<Span> {
    let join = |slice: &[Cue]| {
        slice
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };
    cues.iter()
        .enumerate()
        .map(|(i, cue)| {
            let before = i.saturating_sub(context_window);
            let after = (i + 1 + context_window).min(cues.len());
            Span {
                index: i,
                start_ms: cue.start_ms,
                end_ms: cue.end_ms,
                text: cue.text.clone(),
                context_before: join(&cues[before..i]),
                context_after: join(&cues[i + 1..after]),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cue(n: i64, text: &str) -> Cue {
        Cue {
            start_ms: n * 1000,
            end_ms: n * 1000 + 500,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_context_window() {
        let cues = vec![cue(0, "a"), cue(1, "b"), cue(2, "c"), cue(3, "d")];
        let spans = build_spans(&cues, 1);
        assert_eq!(spans[0].context_before, "");
        assert_eq!(spans[0].context_after, "b");
        assert_eq!(spans[2].context_before, "b");
        assert_eq!(spans[2].context_after, "d");

        let wide = build_spans(&cues, 2);
        assert_eq!(wide[2].context_before, "a b");
        assert_eq!(wide[3].context_after, "");
    }

    #[test]
    fn test_model_input_truncates() {
        let spans = build_spans(&[cue(0, "before"), cue(1, "middle"), cue(2, "after")], 1);
        assert_eq!(spans[1].model_input(true, 512), "before middle after");
        assert_eq!(spans[1].model_input(false, 512), "middle");
        assert_eq!(spans[1].model_input(true, 6), "before");
    }

    #[test]
    fn test_empty_subtitle_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.srt");
        std::fs::write(&path, "1\n00:00:01,000 --> 00:00:02,000\n\n").unwrap();
        assert!(matches!(
            extract_spans(&path, 1),
            Err(Error::Extraction { .. })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(extract_spans(&path, 1).is_err());
    }
}
