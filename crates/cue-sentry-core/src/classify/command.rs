use super::{CategoryScores, Classifier};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const ALL_TARGETS: &str = "*";

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra label -> categories entries, merged over the built-in table.
    /// The category `*` expands to every category the model targets.
    #[serde(default)]
    pub label_mappings: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Runs an external text-classification program. The text is written to the
/// program's stdin; stdout must hold JSON label scores, either an object
/// `{"LABEL": score}` or a list of `{"label": .., "score": ..}` entries
/// (optionally wrapped in one more list).
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    mappings: BTreeMap<String, Vec<String>>,
}

fn default_label_mappings() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 10] = [
        ("TOXIC", &["hate_speech", "violence"]),
        ("SEVERE_TOXIC", &["hate_speech", "violence"]),
        ("TOXICITY", &["hate_speech", "violence"]),
        ("OBSCENE", &["hate_speech"]),
        ("INSULT", &["hate_speech"]),
        ("THREAT", &["violence"]),
        ("NSFW", &["sexual_assault"]),
        ("NEGATIVE", &[ALL_TARGETS]),
        ("POSITIVE", &[]),
        ("NEUTRAL", &[]),
    ];
    table
        .iter()
        .map(|(label, cats)| {
            (
                label.to_string(),
                cats.iter().map(|c| c.to_string()).collect(),
            )
        })
        .collect()
}

impl CommandClassifier {
    pub fn new(config: &CommandConfig, targets: &[String]) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "command model requires a program".to_string(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "command model timeout must be at least one second".to_string(),
            ));
        }

        let mut raw = default_label_mappings();
        for (label, cats) in &config.label_mappings {
            raw.insert(label.to_uppercase(), cats.clone());
        }

        let mappings = raw
            .into_iter()
            .map(|(label, cats)| {
                let expanded = cats
                    .into_iter()
                    .flat_map(|c| {
                        if c == ALL_TARGETS {
                            targets.to_vec()
                        } else {
                            vec![c]
                        }
                    })
                    .collect();
                (label, expanded)
            })
            .collect();

        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            mappings,
        })
    }

    fn run(&self, text: &str) -> Result<String> {
        let fail = |reason: String| Error::Model {
            model: self.program.clone(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(fail("stdio not captured".to_string()));
        };

        // Both pipes are serviced off this thread so a program that stops
        // reading (or never writes) cannot outlive the deadline.
        let input = text.to_string();
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            let status = match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    reap(&mut child);
                    return Err(e.into());
                }
            };
            match status {
                Some(status) if status.success() => break,
                Some(status) => return Err(fail(format!("exited with {}", status))),
                None if Instant::now() >= deadline => {
                    reap(&mut child);
                    return Err(fail(format!("timed out after {:?}", self.timeout)));
                }
                None => thread::sleep(Duration::from_millis(10)),
            }
        }

        match writer.join() {
            Ok(Ok(())) => {}
            // The program may answer without consuming all of its input.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(fail("input writer panicked".to_string())),
        }
        let output = reader
            .join()
            .map_err(|_| fail("output reader panicked".to_string()))??;
        Ok(output)
    }

    fn map_labels(&self, labels: Vec<(String, f64)>) -> CategoryScores {
        let mut scores = CategoryScores::new();
        for (label, score) in labels {
            let Some(categories) = self.mappings.get(&label.to_uppercase()) else {
                continue;
            };
            for category in categories {
                let entry = scores.entry(category.clone()).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
            }
        }
        scores
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Pull `(label, score)` pairs out of the supported output shapes.
fn parse_label_scores(output: &str) -> Result<Vec<(String, f64)>> {
    let value: Value = serde_json::from_str(output.trim())?;
    let mut labels = Vec::new();
    collect_label_scores(&value, &mut labels, 0)?;
    Ok(labels)
}

fn collect_label_scores(value: &Value, out: &mut Vec<(String, f64)>, depth: usize) -> Result<()> {
    match value {
        Value::Object(map) if map.contains_key("label") => {
            let label = map.get("label").and_then(Value::as_str);
            let score = map.get("score").and_then(Value::as_f64);
            match (label, score) {
                (Some(label), Some(score)) => out.push((label.to_string(), score)),
                _ => return Err(Error::Other(format!("malformed label entry: {}", value))),
            }
        }
        Value::Object(map) => {
            for (label, score) in map {
                let score = score
                    .as_f64()
                    .ok_or_else(|| Error::Other(format!("non-numeric score for '{}'", label)))?;
                out.push((label.clone(), score));
            }
        }
        Value::Array(items) if depth < 2 => {
            for item in items {
                collect_label_scores(item, out, depth + 1)?;
            }
        }
        other => return Err(Error::Other(format!("unsupported classifier output: {}", other))),
    }
    Ok(())
}

impl Classifier for CommandClassifier {
    fn score(&self, text: &str) -> Result<CategoryScores> {
        let output = self.run(text)?;
        let labels = parse_label_scores(&output)?;
        Ok(self.map_labels(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(targets: &[&str]) -> CommandClassifier {
        let targets: Vec<String> = targets.iter().map(|s| s.to_string()).collect();
        CommandClassifier::new(
            &CommandConfig {
                program: "classify".to_string(),
                args: vec![],
                label_mappings: BTreeMap::new(),
                timeout_secs: 5,
            },
            &targets,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_object_and_list_shapes() {
        let labels = parse_label_scores(r#"{"TOXIC": 0.9, "POSITIVE": 0.1}"#).unwrap();
        assert_eq!(labels.len(), 2);

        let labels =
            parse_label_scores(r#"[[{"label":"toxic","score":0.7},{"label":"threat","score":0.2}]]"#)
                .unwrap();
        assert_eq!(labels, vec![("toxic".to_string(), 0.7), ("threat".to_string(), 0.2)]);

        assert!(parse_label_scores("not json").is_err());
        assert!(parse_label_scores(r#"{"TOXIC": "high"}"#).is_err());
    }

    #[test]
    fn test_label_mapping_takes_max_per_category() {
        let c = classifier(&["violence", "hate_speech"]);
        let scores = c.map_labels(vec![
            ("toxic".to_string(), 0.4),
            ("THREAT".to_string(), 0.9),
            ("unknown".to_string(), 1.0),
        ]);
        assert_eq!(scores["violence"], 0.9);
        assert_eq!(scores["hate_speech"], 0.4);
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn test_negative_label_expands_to_targets() {
        let c = classifier(&["self_harm"]);
        let scores = c.map_labels(vec![("NEGATIVE".to_string(), 0.66)]);
        assert_eq!(scores["self_harm"], 0.66);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_external_program() {
        let c = CommandClassifier::new(
            &CommandConfig {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"cat > /dev/null; echo '{"THREAT": 0.8}'"#.to_string(),
                ],
                label_mappings: BTreeMap::new(),
                timeout_secs: 5,
            },
            &["violence".to_string()],
        )
        .unwrap();
        let scores = c.score("some text").unwrap();
        assert_eq!(scores["violence"], 0.8);
    }

    #[cfg(unix)]
    fn shell_classifier(script: &str, timeout_secs: u64) -> CommandClassifier {
        CommandClassifier::new(
            &CommandConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                label_mappings: BTreeMap::new(),
                timeout_secs,
            },
            &["violence".to_string()],
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_unread_input_does_not_block_past_timeout() {
        // Far more than a pipe buffer; the program never reads it.
        let input = "kill ".repeat(400_000);
        let c = shell_classifier("exec sleep 10", 1);
        let started = Instant::now();
        let err = c.score(&input).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_program_may_answer_without_reading_input() {
        let input = "kill ".repeat(400_000);
        let c = shell_classifier(r#"echo '{"THREAT": 0.7}'"#, 5);
        let scores = c.score(&input).unwrap();
        assert_eq!(scores["violence"], 0.7);
    }

    #[test]
    fn test_missing_program_abstains() {
        let c = CommandClassifier::new(
            &CommandConfig {
                program: "/nonexistent/cue-sentry-classifier".to_string(),
                args: vec![],
                label_mappings: BTreeMap::new(),
                timeout_secs: 1,
            },
            &["violence".to_string()],
        )
        .unwrap();
        assert!(c.score("text").is_err());
    }
}
