//! Line-oriented post-processing of engine output.
//!
//! Commands embed control markers in stdout: log lines routed to the relay's
//! own log, a template hint for the downstream renderer, and a `JSON` flag
//! that switches the body to a single decoded JSON value. Unmarked lines are
//! retained in order and become the response body.

use serde_json::{json, Value};

use crate::engines::{EngineError, ExecOutput};
use crate::protocol::{ExecutionRequest, ExecutionResponse};

const INVALID_JSON_MSG: &str = "Command returned invalid JSON.";

enum Marker {
    LogDebug,
    LogInfo,
    LogWarn,
    LogError,
    Template,
}

/// Marker rules in priority order. The first matching rule consumes the line.
const RULES: &[(&str, Marker)] = &[
    ("COGCMD_DEBUG:", Marker::LogDebug),
    ("COGCMD_INFO:", Marker::LogInfo),
    ("COGCMD_WARN:", Marker::LogWarn),
    ("COGCMD_ERR:", Marker::LogError),
    ("COGCMD_ERROR:", Marker::LogError),
    ("COG_TEMPLATE:", Marker::Template),
];

/// Fold an engine result into `response`: apply marker lines, then shape the
/// body from whatever was retained.
pub fn parse_output(
    result: Result<ExecOutput, EngineError>,
    response: &mut ExecutionResponse,
    request: &ExecutionRequest,
) {
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            response.set_error(err.to_string());
            return;
        }
    };

    let mut retained: Vec<String> = Vec::new();
    if !output.stdout.is_empty() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.strip_suffix('\n').unwrap_or(&stdout);
        for line in stdout.split('\n') {
            if !consume_marker(line, response, request) {
                retained.push(line.to_string());
            }
        }
    }

    if !output.stderr.is_empty() {
        response.set_error(String::from_utf8_lossy(&output.stderr).into_owned());
        return;
    }

    if response.is_json {
        let joined = retained.join("\n");
        match serde_json::from_str::<Value>(&joined) {
            Ok(value) => response.body = Some(value),
            Err(_) => response.set_error(INVALID_JSON_MSG),
        }
    } else if !retained.is_empty() {
        response.body = Some(json!([{ "body": retained }]));
    }
}

fn consume_marker(line: &str, response: &mut ExecutionResponse, request: &ExecutionRequest) -> bool {
    if line == "JSON" {
        response.is_json = true;
        return true;
    }
    for (prefix, marker) in RULES {
        if let Some(rest) = line.strip_prefix(prefix) {
            let message = rest.trim_matches(' ');
            match marker {
                Marker::LogDebug => tracing::debug!(
                    pipeline = %request.pipeline_id,
                    command = %request.command,
                    "{message}"
                ),
                Marker::LogInfo => tracing::info!(
                    pipeline = %request.pipeline_id,
                    command = %request.command,
                    "{message}"
                ),
                Marker::LogWarn => tracing::warn!(
                    pipeline = %request.pipeline_id,
                    command = %request.command,
                    "{message}"
                ),
                Marker::LogError => tracing::error!(
                    pipeline = %request.pipeline_id,
                    command = %request.command,
                    "{message}"
                ),
                Marker::Template => response.template = Some(message.to_string()),
            }
            return true;
        }
    }
    false
}
