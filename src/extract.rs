//! Boundary to the external extraction collaborator.
//!
//! The collaborator turns packet bytes into a loosely structured JSON
//! response. Only the canonicalizer looks inside [`ExtractedData`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

pub trait Extractor: Send + Sync {
    /// Returns the collaborator's raw response for one packet.
    fn extract(&self, packet: &[u8]) -> PipelineResult<Value>;
}

/// Normalised extraction output: one JSON object of extracted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedData(pub Value);

impl ExtractedData {
    /// Picks the extracted record out of a collaborator response.
    ///
    /// Responses may wrap the record as `{"result": [record]}` or
    /// `{"result": record}`, and leaves may carry citation wrappers
    /// `{"value": x, "citations": [...]}`.
    pub fn from_response(response: &Value) -> PipelineResult<Self> {
        let record = match response.get("result") {
            Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
            Some(other) => other.clone(),
            None => response.clone(),
        };

        match unwrap_citations(record) {
            Value::Object(map) => Ok(Self(Value::Object(map))),
            Value::Null => Ok(Self(Value::Object(Map::new()))),
            other => Err(PipelineError::Extraction(format!(
                "extractor result must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

fn unwrap_citations(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("citations") && map.contains_key("value") => {
            unwrap_citations(map.remove("value").unwrap_or(Value::Null))
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, unwrap_citations(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_citations).collect()),
        other => other,
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Runs an external program that reads the packet on stdin and prints the
/// extraction response as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line on whitespace into program and arguments.
    pub fn from_command_line(command_line: &str) -> PipelineResult<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            PipelineError::Input("extractor command line is empty".to_string())
        })?;
        Ok(Self::new(program, parts.map(ToOwned::to_owned).collect()))
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, packet: &[u8]) -> PipelineResult<Value> {
        debug!(program = %self.program.display(), bytes = packet.len(), "invoking extractor");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                PipelineError::Extraction(format!(
                    "failed to execute extractor {}: {err}",
                    self.program.display()
                ))
            })?;

        // Feed stdin from a separate thread so a chatty extractor cannot
        // deadlock on a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let payload = packet.to_vec();
            thread::spawn(move || stdin.write_all(&payload))
        });

        let output = child.wait_with_output().map_err(|err| {
            PipelineError::Extraction(format!("failed to collect extractor output: {err}"))
        })?;

        let write_result = match writer.map(|handle| handle.join()) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(err))) => Err(err),
            Some(Err(_)) => {
                return Err(PipelineError::Extraction(
                    "extractor stdin writer panicked".to_string(),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Extraction(format!(
                "extractor {} failed ({}): {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        // An extractor may answer without reading the whole packet.
        match write_result {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!(program = %self.program.display(), "extractor closed stdin early");
            }
            Err(err) => {
                return Err(PipelineError::Extraction(format!(
                    "failed to stream packet to extractor: {err}"
                )));
            }
            Ok(()) => {}
        }

        let response: Value = serde_json::from_slice(&output.stdout).map_err(|err| {
            PipelineError::Extraction(format!("extractor output is not valid JSON: {err}"))
        })?;
        info!(program = %self.program.display(), "extractor returned response");

        Ok(response)
    }
}

/// Replays a stored extraction response.
#[derive(Debug, Clone)]
pub struct StaticExtractor {
    response: Result<Value, String>,
}

impl StaticExtractor {
    pub fn new(response: Value) -> Self {
        Self {
            response: Ok(response),
        }
    }

    #[cfg(test)]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
        }
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let raw = fs::read(path).map_err(|err| {
            PipelineError::Input(format!("failed to read {}: {err}", path.display()))
        })?;
        let response = serde_json::from_slice(&raw).map_err(|err| {
            PipelineError::Input(format!("failed to parse {}: {err}", path.display()))
        })?;
        Ok(Self::new(response))
    }
}

impl Extractor for StaticExtractor {
    fn extract(&self, _packet: &[u8]) -> PipelineResult<Value> {
        self.response
            .clone()
            .map_err(PipelineError::Extraction)
    }
}
