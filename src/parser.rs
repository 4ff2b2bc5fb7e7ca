//! Extracts at most one executable command from a free-form model reply.
//!
//! Models are instructed to wrap commands in `<command>...</command>` tags,
//! but routinely ignore the requested format. Extraction therefore runs a
//! fixed-priority sequence of independent matchers over the whole reply:
//! the structured delimiter pair first, then a shell-flavored fenced code
//! block, then a plausible inline backtick run. The first well-formed match
//! by priority class wins; malformed constructs (an open tag with no close,
//! a fence that never closes) are skipped and left visible in the display
//! text rather than silently swallowed.
//!
//! Everything here is pure: identical input always yields identical output,
//! no I/O, no side effects.

use std::ops::Range;

/// Canonical open marker for a structured command.
pub const COMMAND_OPEN: &str = "<command>";
/// Canonical close marker for a structured command.
pub const COMMAND_CLOSE: &str = "</command>";

/// Fence languages that hint at a shell command. The empty string covers
/// unlabeled blocks.
const SHELL_LANGS: [&str; 4] = ["", "bash", "sh", "shell"];

/// One extracted command and the byte span its construct occupied in the
/// original reply (markup included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: String,
    pub span: Range<usize>,
}

/// Result of parsing one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// The single extracted command, if any.
    pub command: Option<ParsedCommand>,
    /// The reply with the winning construct's markup removed. Prose is
    /// preserved; later constructs remain verbatim.
    pub display_text: String,
}

impl ParsedResponse {
    fn explanation_only(text: &str) -> Self {
        Self {
            command: None,
            display_text: text.to_string(),
        }
    }
}

/// A raw matcher hit before post-processing.
struct RawMatch {
    /// Inner text of the construct, untrimmed.
    inner: String,
    /// Byte span of the whole construct, markup included.
    span: Range<usize>,
    /// What the construct becomes in the display text. Delimited and fenced
    /// constructs vanish entirely (the command is surfaced separately);
    /// inline runs keep their content, minus the backticks, so the
    /// surrounding sentence still reads.
    replacement: String,
}

/// The prioritized matcher sequence. Order is the extraction priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matcher {
    DelimiterPair,
    FencedBlock,
    InlineBacktick,
}

impl Matcher {
    const PRIORITY: [Matcher; 3] = [
        Matcher::DelimiterPair,
        Matcher::FencedBlock,
        Matcher::InlineBacktick,
    ];

    fn find(self, text: &str) -> Option<RawMatch> {
        match self {
            Matcher::DelimiterPair => find_delimiter_pair(text),
            Matcher::FencedBlock => find_fenced_block(text),
            Matcher::InlineBacktick => find_inline_run(text),
        }
    }
}

/// Parse one model reply. At most one command is extracted; every other
/// construct stays in the display text untouched.
pub fn parse_response(text: &str) -> ParsedResponse {
    if text.is_empty() {
        return ParsedResponse {
            command: None,
            display_text: String::new(),
        };
    }

    for matcher in Matcher::PRIORITY {
        // An empty construct carries nothing executable; skip it in place
        // and keep scanning within the same class, so a later well-formed
        // construct still wins over the next class.
        let mut from = 0;
        while let Some(found) = matcher.find(&text[from..]) {
            let span = found.span.start + from..found.span.end + from;
            let command = normalize_command(&found.inner);
            if command.is_empty() {
                from = span.end;
                continue;
            }

            let mut display = String::with_capacity(text.len());
            display.push_str(&text[..span.start]);
            display.push_str(&found.replacement);
            display.push_str(&text[span.end..]);

            return ParsedResponse {
                command: Some(ParsedCommand { command, span }),
                display_text: display,
            };
        }
    }

    ParsedResponse::explanation_only(text)
}

/// First well-formed `<command>...</command>` pair. Each close tag pairs
/// with the nearest preceding open tag, so a dangling open before a
/// well-formed pair does not swallow it. An open tag with no close (or a
/// close with no open) is not a match — the marker stays visible.
fn find_delimiter_pair(text: &str) -> Option<RawMatch> {
    let mut close_from = 0;
    while let Some(rel) = text[close_from..].find(COMMAND_CLOSE) {
        let close = close_from + rel;
        if let Some(open) = text[..close].rfind(COMMAND_OPEN) {
            let inner_start = open + COMMAND_OPEN.len();
            return Some(RawMatch {
                inner: text[inner_start..close].to_string(),
                span: open..close + COMMAND_CLOSE.len(),
                replacement: String::new(),
            });
        }
        close_from = close + COMMAND_CLOSE.len();
    }
    None
}

/// First closed fenced code block whose declared language hints at a shell.
/// Non-shell blocks are skipped whole; a fence that never closes matches
/// nothing.
fn find_fenced_block(text: &str) -> Option<RawMatch> {
    // (fence line start, content start, language is shell-like)
    let mut open: Option<(usize, usize, bool)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let stripped = line.trim_end_matches(['\n', '\r']).trim();

        match open {
            Some((start, content_start, is_shell)) => {
                if stripped == "```" {
                    if is_shell {
                        let fence_end =
                            line_start + line.trim_end_matches(['\n', '\r']).len();
                        return Some(RawMatch {
                            inner: text[content_start..line_start].to_string(),
                            span: start..fence_end,
                            replacement: String::new(),
                        });
                    }
                    open = None;
                }
            }
            None => {
                if let Some(rest) = stripped.strip_prefix("```") {
                    let lang = rest.trim().to_ascii_lowercase();
                    open = Some((line_start, offset, SHELL_LANGS.contains(&lang.as_str())));
                }
            }
        }
    }

    None
}

/// First single-line inline backtick run that looks plausibly executable.
/// Implausible runs (quoted sentences, capitalized prose) are skipped, but
/// on genuine ambiguity extraction wins — a wrong-looking suggestion can be
/// rejected by the user, silence cannot.
fn find_inline_run(text: &str) -> Option<RawMatch> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('`') {
        let open = search_from + rel;
        let inner_start = open + 1;
        let close_rel = text[inner_start..].find('`')?;
        let inner_end = inner_start + close_rel;
        let inner = &text[inner_start..inner_end];

        if !inner.contains('\n') && is_plausible_command(inner) {
            return Some(RawMatch {
                inner: inner.to_string(),
                span: open..inner_end + 1,
                replacement: inner.trim().to_string(),
            });
        }
        search_from = inner_end + 1;
    }
    None
}

/// Cheap plausibility heuristic for inline runs. Prose quoted back at the
/// user ("I think so", "Yes.") starts with a quote or a capital; commands
/// essentially never do.
fn is_plausible_command(run: &str) -> bool {
    let trimmed = run.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with('"') || trimmed.starts_with('\'') {
        return false;
    }
    match trimmed.chars().next() {
        Some(first) => !first.is_uppercase(),
        None => false,
    }
}

/// Trim surrounding blank lines, strip shell-prompt markers, and collapse a
/// wrapping quote pair. Internal newlines survive so multi-line commands
/// stay intact.
fn normalize_command(raw: &str) -> String {
    let trimmed = trim_blank_lines(raw);
    let without_markers = strip_prompt_markers(trimmed);
    collapse_wrapping_quotes(without_markers.trim()).to_string()
}

/// Drop leading and trailing whitespace-only lines without touching
/// anything in between.
fn trim_blank_lines(s: &str) -> &str {
    let mut start = 0;
    let mut end = s.len();

    while let Some(nl) = s[start..end].find('\n') {
        if s[start..start + nl].trim().is_empty() {
            start += nl + 1;
        } else {
            break;
        }
    }
    while let Some(nl) = s[start..end].rfind('\n') {
        if s[start + nl + 1..end].trim().is_empty() {
            end = start + nl;
        } else {
            break;
        }
    }

    &s[start..end]
}

/// Remove the `$ ` / `# ` prompt markers models sometimes copy from their
/// own examples. On multi-line commands only `$ ` is stripped — a leading
/// `# ` there is a comment, not a prompt.
fn strip_prompt_markers(command: &str) -> String {
    let mut lines = command.lines();
    let first = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();

    if rest.is_empty() {
        return first
            .strip_prefix("$ ")
            .or_else(|| first.strip_prefix("# "))
            .unwrap_or(first)
            .to_string();
    }

    let mut out: Vec<&str> = Vec::with_capacity(rest.len() + 1);
    out.push(first.strip_prefix("$ ").unwrap_or(first));
    for line in rest {
        out.push(line.strip_prefix("$ ").unwrap_or(line));
    }
    out.join("\n")
}

/// Collapse one pair of quotes only when it wraps the entire command and
/// the quote character does not reappear inside.
fn collapse_wrapping_quotes(command: &str) -> &str {
    if command.len() < 2 {
        return command;
    }
    let first = command.as_bytes()[0];
    let last = command.as_bytes()[command.len() - 1];
    if first == last && (first == b'"' || first == b'\'') {
        let inner = &command[1..command.len() - 1];
        if !inner.contains(first as char) {
            return inner;
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_has_no_command_and_empty_display() {
        let parsed = parse_response("");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.display_text, "");
    }

    #[test]
    fn delimiter_pair_extracts_multiline_command() {
        let reply = "Sure, run:\n<command>\nfor f in *.log; do echo $f; done\n</command>\nThis lists log files.";
        let parsed = parse_response(reply);
        assert_eq!(
            parsed.command.as_ref().unwrap().command,
            "for f in *.log; do echo $f; done"
        );
        assert_eq!(parsed.display_text, "Sure, run:\n\nThis lists log files.");
    }

    #[test]
    fn display_text_contains_no_delimiter_markup() {
        let reply = "Try this:\n<command>ls -la</command>\nDone.";
        let parsed = parse_response(reply);
        assert!(!parsed.display_text.contains(COMMAND_OPEN));
        assert!(!parsed.display_text.contains(COMMAND_CLOSE));
        assert_eq!(parsed.command.unwrap().command, "ls -la");
    }

    #[test]
    fn span_covers_the_whole_construct() {
        let reply = "A\n<command>ls</command>\nB";
        let parsed = parse_response(reply);
        let span = parsed.command.unwrap().span;
        assert_eq!(&reply[span], "<command>ls</command>");
    }

    #[test]
    fn only_first_delimiter_pair_is_extracted() {
        let reply = "<command>ls</command> then <command>rm -rf /</command>";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "ls");
        // The second pair stays in the display text verbatim.
        assert!(parsed.display_text.contains("<command>rm -rf /</command>"));
    }

    #[test]
    fn dangling_open_does_not_swallow_a_later_pair() {
        let reply = "Use <command>ls but unsure. Then <command>pwd</command> instead.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.as_ref().unwrap().command, "pwd");
        // The dangling marker stays visible in the prose.
        assert!(parsed.display_text.contains("<command>ls but unsure"));
    }

    #[test]
    fn empty_pair_is_skipped_in_favor_of_a_later_pair() {
        let reply = "<command></command> ok, actually: <command>ls -la</command>";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.as_ref().unwrap().command, "ls -la");
        assert!(parsed.display_text.starts_with("<command></command>"));
    }

    #[test]
    fn dangling_open_marker_stays_visible() {
        let reply = "I would run <command>ls but I am not sure.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command, None);
        assert!(parsed.display_text.contains("<command>"));
    }

    #[test]
    fn malformed_delimiter_falls_through_to_fenced_block() {
        let reply = "<command>broken\n\n```bash\ngit status\n```\n";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "git status");
        assert!(parsed.display_text.contains("<command>broken"));
    }

    #[test]
    fn fenced_shell_block_extracted_verbatim() {
        let reply = "Run:\n```bash\nfor f in *.txt; do\n  wc -l \"$f\"\ndone\n```\nThat counts lines.";
        let parsed = parse_response(reply);
        assert_eq!(
            parsed.command.unwrap().command,
            "for f in *.txt; do\n  wc -l \"$f\"\ndone"
        );
        assert!(!parsed.display_text.contains("```"));
        assert!(parsed.display_text.contains("That counts lines."));
    }

    #[test]
    fn unlabeled_fence_counts_as_shell() {
        let reply = "```\ndu -sh .\n```";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "du -sh .");
    }

    #[test]
    fn non_shell_fence_is_skipped() {
        let reply = "```python\nprint('hi')\n```\nand then `ls -la` works";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "ls -la");
        assert!(parsed.display_text.contains("print('hi')"));
    }

    #[test]
    fn later_shell_fence_wins_over_earlier_python_fence() {
        let reply = "```python\nx = 1\n```\n```sh\necho done\n```";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "echo done");
    }

    #[test]
    fn unclosed_fence_matches_nothing() {
        let reply = "```bash\nls -la";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.display_text, reply);
    }

    #[test]
    fn delimiter_pair_wins_over_fenced_block() {
        let reply = "<command>uptime</command>\n```bash\necho no\n```";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "uptime");
        assert!(parsed.display_text.contains("echo no"));
    }

    #[test]
    fn inline_backtick_command_extracted() {
        let reply = "You can check with `df -h` if you like.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "df -h");
        // Backticks are stripped but the sentence still reads.
        assert_eq!(
            parsed.display_text,
            "You can check with df -h if you like."
        );
    }

    #[test]
    fn inline_prose_is_not_a_command() {
        let parsed = parse_response("`I think so`");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.display_text, "`I think so`");
    }

    #[test]
    fn inline_quoted_sentence_is_rejected() {
        let parsed = parse_response("It prints `\"hello world\"` to stdout.");
        assert_eq!(parsed.command, None);
    }

    #[test]
    fn implausible_run_skipped_in_favor_of_later_plausible_run() {
        let reply = "`Yes`, use `git log --oneline` for that.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "git log --oneline");
    }

    #[test]
    fn leading_prompt_marker_is_stripped() {
        let parsed = parse_response("<command>$ ls -la</command>");
        assert_eq!(parsed.command.unwrap().command, "ls -la");
        let parsed = parse_response("<command># whoami</command>");
        assert_eq!(parsed.command.unwrap().command, "whoami");
    }

    #[test]
    fn hash_marker_kept_on_multiline_commands() {
        let reply = "<command>\n# count files\nls | wc -l\n</command>";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "# count files\nls | wc -l");
    }

    #[test]
    fn dollar_marker_stripped_from_every_line() {
        let reply = "<command>\n$ cd /tmp\n$ ls\n</command>";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command.unwrap().command, "cd /tmp\nls");
    }

    #[test]
    fn wrapping_quotes_collapse_only_when_spanning() {
        let parsed = parse_response("<command>\"ls -la\"</command>");
        assert_eq!(parsed.command.unwrap().command, "ls -la");

        let parsed = parse_response("<command>echo \"a\" \"b\"</command>");
        assert_eq!(parsed.command.unwrap().command, "echo \"a\" \"b\"");
    }

    #[test]
    fn empty_delimiter_pair_extracts_nothing() {
        let reply = "<command></command> sorry, nothing to run.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command, None);
        assert!(parsed.display_text.contains("<command>"));
    }

    #[test]
    fn pure_explanation_passes_through() {
        let reply = "The load average reflects runnable processes.";
        let parsed = parse_response(reply);
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.display_text, reply);
    }

    #[test]
    fn parser_is_idempotent() {
        let reply = "Run `uptime` then:\n```sh\nfree -m\n```";
        let first = parse_response(reply);
        let second = parse_response(reply);
        assert_eq!(first, second);
    }

    #[test]
    fn trim_blank_lines_preserves_interior() {
        assert_eq!(trim_blank_lines("\n\na\n\nb\n\n"), "a\n\nb");
        assert_eq!(trim_blank_lines("a"), "a");
        assert_eq!(trim_blank_lines("\n  \n"), "");
    }
}
