/*!
 * Optional second backend pass that puts leaked technical terms back.
 *
 * The backend is shown the original and the restored translation and answers
 * with `translated fragment => original term` lines. A line becomes an edit
 * only when both sides agree it is terminology: the term occurs in the source
 * and the protector recognizes it as a technical token, and the fragment is a
 * short phrase found in the translation. Everything else is ignored, so the
 * pass cannot rewrite ordinary prose.
 */

use log::{debug, warn};
use regex::{NoExpand, Regex};

use crate::providers::{Provider, TermReviewRequest};
use crate::translation::protector::TermProtector;

// Longer fragments are sentences, not leaked terms
const MAX_FRAGMENT_WORDS: usize = 4;

/// One accepted `fragment => term` replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermCorrection {
    pub fragment: String,
    pub term: String,
}

/// Parse the review answer into candidate corrections
pub fn parse_review(answer: &str) -> Vec<TermCorrection> {
    answer
        .lines()
        .filter_map(|line| {
            let line = line
                .trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_ascii_digit() || c == '.' || c == ')')
                .trim();
            let (fragment, term) = line.split_once("=>")?;
            let fragment = strip_quotes(fragment);
            let term = strip_quotes(term);
            if fragment.is_empty() || term.is_empty() || fragment == term {
                return None;
            }
            Some(TermCorrection {
                fragment: fragment.to_string(),
                term: term.to_string(),
            })
        })
        .collect()
}

fn strip_quotes(text: &str) -> &str {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '«' | '»' | '“' | '”'))
        .trim()
}

/// Keep only corrections both sides agree on
pub fn accepted_corrections(
    candidates: Vec<TermCorrection>,
    source: &str,
    translated: &str,
    protector: &TermProtector,
) -> Vec<TermCorrection> {
    candidates
        .into_iter()
        .filter(|c| {
            let bounded = c.fragment.chars().next().is_some_and(char::is_alphanumeric)
                && c.fragment.chars().last().is_some_and(char::is_alphanumeric);
            let short = c.fragment.split_whitespace().count() <= MAX_FRAGMENT_WORDS;
            let accepted = bounded
                && short
                && translated.contains(&c.fragment)
                && source.contains(&c.term)
                && protector.is_terminology(&c.term);
            if !accepted {
                debug!("Ignoring term correction {:?} => {:?}", c.fragment, c.term);
            }
            accepted
        })
        .collect()
}

/// Apply corrections on word boundaries
pub fn apply_corrections(translated: &str, corrections: &[TermCorrection]) -> String {
    let mut out = translated.to_string();
    for correction in corrections {
        let pattern = format!(r"\b{}\b", regex::escape(&correction.fragment));
        match Regex::new(&pattern) {
            Ok(re) => out = re.replace_all(&out, NoExpand(&correction.term)).into_owned(),
            Err(e) => warn!("Cannot apply term correction {:?}: {}", correction.fragment, e),
        }
    }
    out
}

/// Run the review pass. Backend failures keep the translation unchanged.
pub async fn review_and_fix(
    provider: &dyn Provider,
    protector: &TermProtector,
    request: &TermReviewRequest,
) -> (String, Vec<TermCorrection>) {
    let answer = match provider.review_terms(request).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Term review failed, keeping the translation as is: {}", e);
            return (request.translated.clone(), Vec::new());
        }
    };

    if answer.trim().eq_ignore_ascii_case("none") {
        return (request.translated.clone(), Vec::new());
    }

    let corrections = accepted_corrections(
        parse_review(&answer),
        &request.source,
        &request.translated,
        protector,
    );
    let fixed = apply_corrections(&request.translated, &corrections);
    (fixed, corrections)
}
