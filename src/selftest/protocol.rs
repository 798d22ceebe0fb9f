// ABOUTME: Correlation-tagged wire protocol between the harness and the bot.
// ABOUTME: "TEST_QUESTION <id>: ..." out, "TEST_RESPONSE <id>: ..." back.

/// Marker prefixing every outgoing test question. Stable across releases:
/// operators read these tags in channel logs to follow a run.
pub const TEST_QUESTION_MARKER: &str = "TEST_QUESTION";

/// Marker prefixing every reply the bot sends to a tagged question.
pub const TEST_RESPONSE_MARKER: &str = "TEST_RESPONSE";

pub fn format_question(id: usize, question: &str) -> String {
    format!("{} {}: {}", TEST_QUESTION_MARKER, id, question)
}

pub fn format_response(id: usize, text: &str) -> String {
    format!("{} {}: {}", TEST_RESPONSE_MARKER, id, text)
}

/// Parse a tagged question into its correlation id and inner text.
pub fn parse_question(text: &str) -> Option<(usize, &str)> {
    parse_tagged(text, TEST_QUESTION_MARKER)
}

/// Parse a tagged response into its correlation id and inner text.
pub fn parse_response(text: &str) -> Option<(usize, &str)> {
    parse_tagged(text, TEST_RESPONSE_MARKER)
}

fn parse_tagged<'a>(text: &'a str, marker: &str) -> Option<(usize, &'a str)> {
    let rest = text.trim_start().strip_prefix(marker)?;
    let rest = rest.strip_prefix(' ')?;
    let (id_part, body) = rest.split_once(':')?;
    let id = id_part.trim().parse::<usize>().ok()?;
    Some((id, body.strip_prefix(' ').unwrap_or(body)))
}
