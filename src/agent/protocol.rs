//! Agent stdout line protocol
//!
//! Agents may report structured events by printing one JSON object per line:
//!
//! ```text
//! {"type":"progress","percent":40}
//! {"type":"log","message":"running tests"}
//! {"type":"result","output":"all green"}
//! ```
//!
//! Anything else is plain output.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonLine {
    Progress { percent: f64 },
    Log { message: String },
    Result { output: String },
}

/// One parsed line of agent stdout
#[derive(Debug, Clone, PartialEq)]
pub enum AgentLine {
    /// Progress percentage, clamped to 0-100
    Progress(u8),
    /// Diagnostic log message
    Log(String),
    /// Final output, replacing anything printed before
    Result(String),
    /// Plain output text
    Text(String),
}

/// Parse a single stdout line
pub fn parse_line(line: &str) -> AgentLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return AgentLine::Text(line.to_string());
    }

    match serde_json::from_str::<JsonLine>(trimmed) {
        Ok(JsonLine::Progress { percent }) => AgentLine::Progress(clamp_percent(percent)),
        Ok(JsonLine::Log { message }) => AgentLine::Log(message),
        Ok(JsonLine::Result { output }) => AgentLine::Result(output),
        Err(_) => AgentLine::Text(line.to_string()),
    }
}

fn clamp_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_lines() {
        assert_eq!(
            parse_line(r#"{"type":"progress","percent":42}"#),
            AgentLine::Progress(42)
        );
        assert_eq!(
            parse_line(r#"{"type":"log","message":"compiling"}"#),
            AgentLine::Log("compiling".to_string())
        );
        assert_eq!(
            parse_line(r#"  {"type":"result","output":"done"}"#),
            AgentLine::Result("done".to_string())
        );
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(parse_line(r#"{"type":"progress","percent":250}"#), AgentLine::Progress(100));
        assert_eq!(parse_line(r#"{"type":"progress","percent":-5}"#), AgentLine::Progress(0));
    }

    #[test]
    fn test_unknown_json_is_text() {
        let line = r#"{"type":"unknown"}"#;
        assert_eq!(parse_line(line), AgentLine::Text(line.to_string()));
        assert_eq!(
            parse_line("plain words"),
            AgentLine::Text("plain words".to_string())
        );
    }
}
