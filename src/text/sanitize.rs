use std::sync::LazyLock;

use regex::Regex;
use unicode_general_category::{get_general_category, GeneralCategory};

/// Punctuation that survives sanitizing, on top of letters, digits and
/// space / newline / tab.
const ALLOWED_PUNCTUATION: &str = ".,!?;:-—()[]{}\"'";

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ ]{2,}").expect("space-run pattern is valid"));

/// Strip everything a game UI cannot render from model output.
///
/// Keeps letters and numbers of any script (general categories `L*` and
/// `N*`), `' '`, `'\n'`, `'\t'` and [`ALLOWED_PUNCTUATION`]. Control (`Cc`)
/// and format (`Cf`) characters, combining marks and symbols are dropped.
/// Runs of spaces collapse to one (newlines are left alone) and the result is
/// trimmed.
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let kept: String = text.chars().filter(|&ch| is_allowed(ch)).collect();

    SPACE_RUN.replace_all(&kept, " ").trim().to_string()
}

fn is_allowed(ch: char) -> bool {
    if matches!(ch, ' ' | '\n' | '\t') || ALLOWED_PUNCTUATION.contains(ch) {
        return true;
    }
    is_letter_or_number(get_general_category(ch))
}

fn is_letter_or_number(category: GeneralCategory) -> bool {
    use GeneralCategory::*;
    matches!(
        category,
        UppercaseLetter
            | LowercaseLetter
            | TitlecaseLetter
            | ModifierLetter
            | OtherLetter
            | DecimalNumber
            | LetterNumber
            | OtherNumber
    )
}
