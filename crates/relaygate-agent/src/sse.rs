//! Line-level SSE parsing, shared by both vendor adapters.

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Parse a single SSE line (`event: <type>` or `data: <json>`).
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: response.completed") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "response.completed"),
            _ => panic!("expected Event"),
        }
        match parse_sse_line("data: {\"a\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"a\":1}"),
            _ => panic!("expected Data"),
        }
    }

    #[test]
    fn non_sse_lines_are_ignored() {
        assert!(parse_sse_line(": keep-alive").is_none());
    }
}
