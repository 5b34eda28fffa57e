//! Label and transcript cleanup shared by the text-hint extractor and the
//! structural extractors.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Collapse all whitespace runs to single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

static RE_HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Strip HTML markup from a label.
///
/// draw.io wraps label text in `<div>`, `<b>`, `<br>` and friends and
/// HTML-escapes the rest; what the graph wants is the visible text.
pub fn strip_html(label: &str) -> String {
    let text = RE_HTML_TAG.replace_all(label, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    collapse_whitespace(&text)
}

/// Russian function words that legitimately stand alone; a trailing 1–2
/// letter token matching one of these is a real word, not a severed suffix.
static RU_SHORT_WORDS: &[&str] = &[
    "и", "в", "с", "к", "о", "у", "а", "я", "на", "не", "но", "по", "до", "за", "из", "от", "ли",
    "ни", "же", "бы", "во", "ко",
];

static RE_BROKEN_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w{2,}) (\w{1,2})\b").unwrap());

/// Rejoin words that SVG line-wrapping split across tspans:
/// "Подтверждени е" → "Подтверждение", while "операции и" stays intact.
pub fn join_broken_words(s: &str) -> String {
    RE_BROKEN_WORD
        .replace_all(s, |caps: &Captures<'_>| {
            let right = caps[2].to_lowercase();
            if RU_SHORT_WORDS.contains(&right.as_str()) {
                caps[0].to_string()
            } else {
                format!("{}{}", &caps[1], &caps[2])
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_drawio_markup_and_entities() {
        assert_eq!(
            strip_html("<div><b>Проверить</b>&nbsp;данные</div>"),
            "Проверить данные"
        );
        assert_eq!(strip_html("A &amp; B &lt;= C"), "A & B <= C");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[test]
    fn rejoins_severed_suffix() {
        assert_eq!(join_broken_words("Подтверждени е"), "Подтверждение");
        assert_eq!(join_broken_words("Выполнени е операции"), "Выполнение операции");
    }

    #[test]
    fn keeps_genuine_short_words() {
        assert_eq!(join_broken_words("операции и данные"), "операции и данные");
        assert_eq!(join_broken_words("запись в журнал"), "запись в журнал");
    }

    #[test]
    fn collapse_whitespace_flattens_newlines() {
        assert_eq!(collapse_whitespace("  a\n\t b   c "), "a b c");
    }
}
