//! Turn human-entered header text into safe column identifiers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest identifier we emit; matches the common SQL identifier limit
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Prepended when a sanitized identifier would start with a digit
pub const DIGIT_PREFIX: &str = "col_";

static INVALID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").unwrap());
static REPEATED_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// Sanitize an arbitrary header string into an identifier matching
/// `^[a-z_][a-z0-9_]{0,63}$`.
///
/// Deterministic for every input that contains at least one usable character;
/// input that sanitizes to nothing gets a `column_<token>` name unique to this
/// call. `sanitize(sanitize(x)) == sanitize(x)` for all `x`.
pub fn sanitize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
    let mut ident = collapsed.trim_matches('_').to_string();

    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident = format!("{}{}", DIGIT_PREFIX, ident);
    }

    if ident.len() > MAX_IDENTIFIER_LEN {
        // Everything left is ASCII, so byte truncation is char-safe
        ident.truncate(MAX_IDENTIFIER_LEN);
        ident = ident.trim_end_matches('_').to_string();
    }

    if ident.is_empty() {
        return fallback_identifier();
    }

    ident
}

/// Whether `ident` is already a valid sanitized identifier
pub fn is_valid_identifier(ident: &str) -> bool {
    static VALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,63}$").unwrap());
    VALID.is_match(ident)
}

fn fallback_identifier() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("column_{}", &token[..12])
}
