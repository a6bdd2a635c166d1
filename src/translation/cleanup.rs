/*!
 * Removal of backend noise from translated text.
 *
 * Local models occasionally drift into Chinese, Japanese or Korean midway
 * through a line. The drifted tail is never salvageable, so a CJK run and the
 * rest of its line are dropped unless the target language itself is written
 * in CJK script. This runs on the still-protected text, so code spans are not
 * affected.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::language_utils::is_cjk_language;

static CJK_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}][^\n]*")
        .expect("valid CJK pattern")
});

/// Drop CJK runs and the remainder of their line, then trim
pub fn strip_noise(text: &str, target_language: &str) -> String {
    if is_cjk_language(target_language) || !CJK_TAIL.is_match(text) {
        return text.trim().to_string();
    }

    let cleaned = CJK_TAIL.replace_all(text, "");
    let removed = text.len() - cleaned.len();
    debug!("Removed {} bytes of CJK noise from backend output", removed);

    cleaned
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripNoise_shouldDropCjkTailOfLine() {
        let text = "Перший рядок 这是噪音 ще текст\nДругий рядок";
        assert_eq!(strip_noise(text, "uk"), "Перший рядок\nДругий рядок");
    }

    #[test]
    fn test_stripNoise_withCjkTarget_shouldKeepText() {
        let text = "  这是中文  ";
        assert_eq!(strip_noise(text, "zh"), "这是中文");
    }

    #[test]
    fn test_stripNoise_withoutNoise_shouldOnlyTrim() {
        assert_eq!(strip_noise("\n Текст ⟦P0⟧\n\n", "uk"), "Текст ⟦P0⟧");
    }
}
