use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for ISO language code handling
///
/// Validates and normalizes ISO 639-1 (2-letter) and ISO 639-2 (3-letter)
/// codes so that `uk`, `ukr` and `UK` all name the same target language.

// ISO 639-2/B codes that differ from their 639-2/T form
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

// Languages whose script is CJK; the noise filter must leave them alone
const CJK_LANGUAGES: &[&str] = &["zho", "jpn", "kor"];

fn bibliographic_to_terminology(code: &str) -> Option<&'static str> {
    BIBLIOGRAPHIC_CODES
        .iter()
        .find(|(b, _)| *b == code)
        .map(|(_, t)| *t)
}

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    let normalized_code = code.trim().to_lowercase();

    match normalized_code.len() {
        2 => {
            if let Some(lang) = Language::from_639_1(&normalized_code) {
                return Ok(lang.to_639_3().to_string());
            }
        }
        3 => {
            if Language::from_639_3(&normalized_code).is_some() {
                return Ok(normalized_code);
            }
            if let Some(part2t) = bibliographic_to_terminology(&normalized_code) {
                return Ok(part2t.to_string());
            }
        }
        _ => {}
    }

    Err(anyhow!("Cannot normalize invalid language code: {}", code))
}

/// Check if two language codes match (represent the same language)
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_to_part2t(code1), normalize_to_part2t(code2)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Get the language name from a code
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_to_part2t(code)?;
    let lang = Language::from_639_3(&normalized)
        .ok_or_else(|| anyhow!("Failed to get language from code: {}", normalized))?;

    Ok(lang.to_name().to_string())
}

/// Whether the language is written in a CJK script
pub fn is_cjk_language(code: &str) -> bool {
    normalize_to_part2t(code)
        .map(|c| CJK_LANGUAGES.contains(&c.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizeToPart2t_withVariousForms_shouldAgree() {
        assert_eq!(normalize_to_part2t("uk").unwrap(), "ukr");
        assert_eq!(normalize_to_part2t(" UKR ").unwrap(), "ukr");
        assert_eq!(normalize_to_part2t("ger").unwrap(), "deu");
        assert!(normalize_to_part2t("xx").is_err());
        assert!(normalize_to_part2t("english").is_err());
    }

    #[test]
    fn test_languageCodesMatch_shouldCompareNormalizedCodes() {
        assert!(language_codes_match("en", "eng"));
        assert!(language_codes_match("fr", "fre"));
        assert!(!language_codes_match("en", "uk"));
        assert!(!language_codes_match("zz", "zz"));
    }

    #[test]
    fn test_getLanguageName_shouldReturnEnglishName() {
        assert_eq!(get_language_name("uk").unwrap(), "Ukrainian");
        assert_eq!(get_language_name("en").unwrap(), "English");
    }

    #[test]
    fn test_isCjkLanguage_shouldDetectCjkTargets() {
        assert!(is_cjk_language("ja"));
        assert!(is_cjk_language("zh"));
        assert!(is_cjk_language("kor"));
        assert!(!is_cjk_language("uk"));
    }
}
