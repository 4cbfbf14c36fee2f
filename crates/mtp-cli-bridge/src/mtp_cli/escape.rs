//! Escaping for strings embedded in MTP CLI sub-commands.
//!
//! The CLI receives its sub-commands double-quoted (`"get \"src\" \"dst\""`), and the whole
//! line goes through `sh` once more. Its quote parser has quirks, so the replacement strings
//! below are the ones that round-trip through the CLI, not the ones a POSIX grammar would
//! predict. Keep them byte-for-byte.

/// Which pre-existing escape pattern was detected in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeCase {
    /// Both `\"` and `"\` appear.
    BothQuoteEscapes,
    /// `"\"` appears.
    QuoteBackslashQuote,
    /// Only `\"` appears.
    BackslashQuote,
    /// Only `"\` appears.
    QuoteBackslash,
    /// None of the above.
    Plain,
}

struct EscapeRule {
    case: EscapeCase,
    matches: fn(&str) -> bool,
    /// Replacement for each `\` (applied after backticks are escaped).
    backslash: &'static str,
    /// Replacement for each `"` (applied last).
    quote: &'static str,
}

const BACKSLASH_X3: &str = r"\\\";
const BACKSLASH_X4: &str = r"\\\\";
const QUOTE_AFTER_X3: &str = r#"\\\""#;
const QUOTE_AFTER_X4: &str = r#"\\\\""#;

fn has_both(s: &str) -> bool {
    s.contains(r#"\""#) && s.contains(r#""\"#)
}

fn has_quote_backslash_quote(s: &str) -> bool {
    s.contains(r#""\""#)
}

fn has_backslash_quote(s: &str) -> bool {
    s.contains(r#"\""#)
}

fn has_quote_backslash(s: &str) -> bool {
    s.contains(r#""\"#)
}

fn always(_: &str) -> bool {
    true
}

/// Evaluated top to bottom; the first match wins.
static RULES: [EscapeRule; 5] = [
    EscapeRule {
        case: EscapeCase::BothQuoteEscapes,
        matches: has_both,
        backslash: BACKSLASH_X4,
        quote: QUOTE_AFTER_X3,
    },
    EscapeRule {
        case: EscapeCase::QuoteBackslashQuote,
        matches: has_quote_backslash_quote,
        backslash: BACKSLASH_X4,
        quote: QUOTE_AFTER_X3,
    },
    EscapeRule {
        case: EscapeCase::BackslashQuote,
        matches: has_backslash_quote,
        backslash: BACKSLASH_X3,
        quote: QUOTE_AFTER_X4,
    },
    EscapeRule {
        case: EscapeCase::QuoteBackslash,
        matches: has_quote_backslash,
        backslash: BACKSLASH_X4,
        quote: QUOTE_AFTER_X3,
    },
    EscapeRule {
        case: EscapeCase::Plain,
        matches: always,
        backslash: BACKSLASH_X3,
        quote: QUOTE_AFTER_X3,
    },
];

fn rule_for(raw: &str) -> &'static EscapeRule {
    // The last rule always matches.
    RULES
        .iter()
        .find(|rule| (rule.matches)(raw))
        .unwrap_or(&RULES[RULES.len() - 1])
}

/// Returns which escaping branch `raw` goes through.
pub fn escape_case(raw: &str) -> EscapeCase {
    rule_for(raw).case
}

/// Escapes `raw` for use inside a quoted MTP CLI sub-command.
///
/// Backticks get a backslash first, and that backslash is multiplied along with every other
/// backslash in the next step. Quotes are replaced last so their added backslashes stay as-is.
pub fn escape_shell_mtp(raw: &str) -> String {
    let rule = rule_for(raw);
    raw.replace('`', r"\`")
        .replace('\\', rule.backslash)
        .replace('"', rule.quote)
}
