//! Pending request ledger.
//!
//! One JSON object per line. The reserved keys `provider`, `model`,
//! `metadata`, `estimated_tokens` and `max_attempts` configure the record;
//! every other key is the provider payload. Blank lines are skipped and do
//! not consume an index.

use crate::client::Provider;
use crate::models::{AnyLlmError, RequestRecord, Result, estimate_tokens};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Lines};
use std::path::{Path, PathBuf};

/// Values applied to records that do not set them.
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub provider: Provider,
    pub model: String,
    pub max_attempts: u32,
    pub default_token_estimate: u32,
}

/// Restartable view of a pending-request file.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    path: PathBuf,
    defaults: RecordDefaults,
}

impl PendingLedger {
    pub fn new(path: impl Into<PathBuf>, defaults: RecordDefaults) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &RecordDefaults {
        &self.defaults
    }

    /// Start a fresh pass over the file.
    pub fn records(&self) -> Result<PendingRecords> {
        load_pending(&self.path, self.defaults.clone())
    }
}

/// Open `path` and lazily yield its records in file order.
///
/// A malformed line yields `Err(MalformedRecord)` for that line only;
/// iteration continues with the next line.
pub fn load_pending(path: &Path, defaults: RecordDefaults) -> Result<PendingRecords> {
    let file = File::open(path).map_err(|e| AnyLlmError::io("opening pending ledger", e))?;
    Ok(PendingRecords {
        lines: BufReader::new(file).lines(),
        defaults,
        line_num: 0,
        next_index: 0,
        done: false,
    })
}

/// Iterator over the records of a pending ledger.
#[derive(Debug)]
pub struct PendingRecords {
    lines: Lines<BufReader<File>>,
    defaults: RecordDefaults,
    line_num: usize,
    next_index: usize,
    done: bool,
}

impl Iterator for PendingRecords {
    type Item = Result<RequestRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            self.line_num += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.next_index += 1;
                    return Some(Err(malformed(self.line_num, "line is not valid UTF-8")));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(AnyLlmError::io("reading pending ledger", e)));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let index = self.next_index;
            self.next_index += 1;
            return Some(parse_record(&line, self.line_num, index, &self.defaults));
        }
    }
}

fn malformed(line: usize, message: impl Into<String>) -> AnyLlmError {
    AnyLlmError::MalformedRecord {
        line,
        message: message.into(),
    }
}

fn take_u32(obj: &mut Map<String, Value>, key: &str, line: usize) -> Result<Option<u32>> {
    match obj.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| malformed(line, format!("'{key}' must be a non-negative integer"))),
    }
}

fn parse_record(line: &str, line_num: usize, index: usize, defaults: &RecordDefaults) -> Result<RequestRecord> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| malformed(line_num, format!("invalid JSON: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(malformed(line_num, "expected a JSON object"));
    };

    let provider = match obj.remove("provider") {
        None | Some(Value::Null) => defaults.provider,
        Some(Value::String(name)) => name
            .parse::<Provider>()
            .map_err(|e| malformed(line_num, e.to_string()))?,
        Some(_) => return Err(malformed(line_num, "'provider' must be a string")),
    };

    let model = match obj.remove("model") {
        None | Some(Value::Null) => defaults.model.clone(),
        Some(Value::String(model)) => model,
        Some(_) => return Err(malformed(line_num, "'model' must be a string")),
    };
    if model.trim().is_empty() {
        return Err(malformed(line_num, "no model given on the line or for the run"));
    }

    let metadata = obj.remove("metadata").unwrap_or(Value::Null);
    let max_attempts = take_u32(&mut obj, "max_attempts", line_num)?.unwrap_or(defaults.max_attempts);
    if max_attempts == 0 {
        return Err(malformed(line_num, "'max_attempts' must be at least 1"));
    }
    let explicit_tokens = take_u32(&mut obj, "estimated_tokens", line_num)?;

    let payload = Value::Object(obj);
    let estimated_tokens =
        explicit_tokens.unwrap_or_else(|| estimate_tokens(&payload, defaults.default_token_estimate));

    Ok(RequestRecord {
        index,
        provider,
        model,
        payload,
        metadata,
        estimated_tokens,
        attempts: 0,
        max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn defaults() -> RecordDefaults {
        RecordDefaults {
            provider: Provider::OpenAi,
            model: "gpt-3.5-turbo".to_string(),
            max_attempts: 3,
            default_token_estimate: 500,
        }
    }

    fn ledger_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reserved_keys_and_payload() {
        let file = ledger_file(
            r#"{"provider":"anthropic","model":"claude-3-haiku","metadata":{"id":7},"max_attempts":5,"estimated_tokens":42,"messages":[{"role":"user","content":"hi"}],"temperature":0.1}"#,
        );
        let records: Vec<_> = load_pending(file.path(), defaults()).unwrap().collect();
        assert_eq!(records.len(), 1);

        let record = records.into_iter().next().unwrap().unwrap();
        assert_eq!(record.index, 0);
        assert_eq!(record.provider, Provider::Anthropic);
        assert_eq!(record.model, "claude-3-haiku");
        assert_eq!(record.metadata, json!({"id": 7}));
        assert_eq!(record.max_attempts, 5);
        assert_eq!(record.estimated_tokens, 42);
        assert_eq!(record.attempts, 0);
        assert_eq!(
            record.payload,
            json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 0.1})
        );
    }

    #[test]
    fn test_defaults_applied() {
        let file = ledger_file(r#"{"messages":[{"role":"user","content":"12345678"}],"max_tokens":10}"#);
        let record = load_pending(file.path(), defaults())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.provider, Provider::OpenAi);
        assert_eq!(record.model, "gpt-3.5-turbo");
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.estimated_tokens, 12);
        assert!(record.metadata.is_null());
    }

    #[test]
    fn test_malformed_line_is_isolated() {
        let file = ledger_file(concat!(
            r#"{"messages":[]}"#,
            "\n",
            "{not json\n",
            "\n",
            r#"[1,2,3]"#,
            "\n",
            r#"{"provider":"nope","messages":[]}"#,
            "\n",
            r#"{"messages":[]}"#,
            "\n",
        ));
        let items: Vec<_> = load_pending(file.path(), defaults()).unwrap().collect();
        assert_eq!(items.len(), 5);

        assert_eq!(items[0].as_ref().unwrap().index, 0);
        assert!(matches!(items[1], Err(AnyLlmError::MalformedRecord { line: 2, .. })));
        assert!(matches!(items[2], Err(AnyLlmError::MalformedRecord { line: 4, .. })));
        assert!(matches!(items[3], Err(AnyLlmError::MalformedRecord { line: 5, .. })));
        // Malformed lines still consume an index; the blank line does not.
        assert_eq!(items[4].as_ref().unwrap().index, 4);
    }

    #[test]
    fn test_missing_model_is_malformed() {
        let file = ledger_file(r#"{"messages":[]}"#);
        let mut defaults = defaults();
        defaults.model = String::new();
        let item = load_pending(file.path(), defaults).unwrap().next().unwrap();
        assert!(matches!(item, Err(AnyLlmError::MalformedRecord { line: 1, .. })));
    }

    #[test]
    fn test_bad_attempt_ceiling() {
        let file = ledger_file("{\"max_attempts\":0}\n{\"max_attempts\":\"two\"}\n");
        let items: Vec<_> = load_pending(file.path(), defaults()).unwrap().collect();
        assert!(items.iter().all(|i| matches!(i, Err(AnyLlmError::MalformedRecord { .. }))));
    }

    #[test]
    fn test_invalid_utf8_line_is_isolated() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"messages\":[]}\n{\"content\":\"\xff\xfe\"}\n{\"messages\":[]}\n")
            .unwrap();

        let items: Vec<_> = load_pending(file.path(), defaults()).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().index, 0);
        assert!(matches!(
            &items[1],
            Err(AnyLlmError::MalformedRecord { line: 2, message }) if message.contains("UTF-8")
        ));
        assert_eq!(items[2].as_ref().unwrap().index, 2);
    }

    #[test]
    fn test_ledger_is_restartable() {
        let file = ledger_file("{\"messages\":[]}\n{\"messages\":[]}\n");
        let ledger = PendingLedger::new(file.path(), defaults());
        assert_eq!(ledger.records().unwrap().count(), 2);
        assert_eq!(ledger.records().unwrap().count(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = load_pending(Path::new("/nonexistent/pending.jsonl"), defaults()).unwrap_err();
        assert!(matches!(err, AnyLlmError::Io { .. }));
    }
}
