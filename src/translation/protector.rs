/*!
 * Protection of non-translatable spans across a backend call.
 *
 * Every recognizer is an independent rule with a priority. All rules run over
 * the text, their matches are merged into one non-overlapping set (the higher
 * priority wins, then the earlier match), and each accepted span is replaced
 * by a placeholder token such as `⟦P3⟧`. The bracket characters come from
 * blocks that do not occur in prose; if the text already contains them an
 * alternative pair is used.
 *
 * Restoration never fails. Exact tokens are substituted first; tokens the
 * backend altered (`[P3]`, `⟦ Р3 ⟧`) are matched by number or else by order
 * among the spans still unresolved; anything left over becomes a
 * `TermRestorationWarning`.
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::ForcedTerm;
use crate::errors::TermRestorationWarning;

/// Bracket pairs tried in order when issuing tokens
const TOKEN_BRACKETS: &[(char, char)] = &[('⟦', '⟧'), ('⟪', '⟫'), ('⦃', '⦄')];

/// Multi-word phrases that stay in the source language
pub const KEEP_PHRASES: &[&str] = &[
    "software architect",
    "software architecture",
    "software engineering",
    "software developer",
    "software development",
    "event-driven",
    "CI/CD",
];

struct ProtectionRule {
    name: &'static str,
    pattern: Regex,
    // Capture group holding the span; 0 for the whole match
    group: usize,
}

impl ProtectionRule {
    fn new(name: &'static str, pattern: &str, group: usize) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("valid protection rule"),
            group,
        }
    }
}

// Rules in priority order. The keep-terms rule is configuration dependent and
// is slotted in by `TermProtector::new` at `KEEP_TERMS_PRIORITY`.
static RULES: Lazy<Vec<ProtectionRule>> = Lazy::new(|| {
    vec![
        ProtectionRule::new("fenced_code", r"(?s)```.*?```", 0),
        ProtectionRule::new("inline_code", r"`[^`\n]+`", 0),
        ProtectionRule::new(
            "url",
            r#"(?:\b(?:https?|ftp)://|\bwww\.)[^\s<>"'`]*[^\s<>"'`.,;:!?)\]]"#,
            0,
        ),
        ProtectionRule::new("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", 0),
        ProtectionRule::new(
            "path",
            r"(?:^|[\s(])((?:~|\.{1,2})?(?:/[\w.-]*[\w-])+/?)",
            1,
        ),
        ProtectionRule::new(
            "file_name",
            r"\b[\w-]+(?:/[\w.-]+)*\.(?:rs|py|js|ts|tsx|jsx|java|go|kt|rb|swift|cpp|hpp|cs|json|ya?ml|toml|xml|md|sh|sql|html|css|cfg|ini|txt|log|lock|gradle|proto)\b",
            0,
        ),
        ProtectionRule::new("function_call", r"\b[A-Za-z_][\w.:]*\([^()\n]{0,60}\)", 0),
        ProtectionRule::new("dotted_identifier", r"\b[A-Za-z_]\w+(?:\.[A-Za-z_]\w+)+\b", 0),
        ProtectionRule::new(
            "generic_type",
            r"\b[A-Z]\w*<[\w?\[\]<>]+(?:,\s*[\w?\[\]<>]+)*>",
            0,
        ),
        ProtectionRule::new(
            "version",
            r"\bv\d+(?:\.\d+)*\b|\b\d+\.\d+\.\d+(?:[-.][0-9A-Za-z]+)*\b",
            0,
        ),
        ProtectionRule::new("hex", r"\b0[xX][0-9A-Fa-f]+\b", 0),
        ProtectionRule::new("flag", r"(?:^|\s)(--?[A-Za-z][\w-]*(?:=\S+)?)", 1),
        ProtectionRule::new(
            "identifier",
            r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b|\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b|\b[a-z][a-z0-9]*(?:[A-Z][a-z0-9]*)+\b|\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+\b",
            0,
        ),
        ProtectionRule::new(
            "operator",
            r"===|!==|==|!=|<=|>=|=>|->|::|&&|\|\||\+\+|<<|>>|\?\?|\+=|-=|\*=|/=",
            0,
        ),
        ProtectionRule::new("acronym", r"\b[A-Z][A-Z0-9]{1,5}s?\b", 0),
        ProtectionRule::new("sigil", r"[@$#%][A-Za-z_]\w*", 0),
    ]
});

// Keep terms rank just above the generic identifier rules
const KEEP_TERMS_PRIORITY: usize = 12;

// Tokens the backend rewrote: other brackets, spaces, lowercase or Cyrillic P
static LOOSE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[⟦⟪⦃\[]\s*[PpРр]\s*(\d{1,4})\s*[⟧⟫⦄\]]").expect("valid token pattern")
});

/// One protected span, scoped to a single backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpan {
    pub token: String,
    pub original: String,
    /// Order of appearance in the protected text
    pub rank: usize,
    /// Name of the rule that matched
    pub rule: &'static str,
}

/// Text with non-translatable spans replaced by tokens
#[derive(Debug, Clone)]
pub struct ProtectedText {
    pub text: String,
    pub spans: Vec<PlaceholderSpan>,
    brackets: (char, char),
}

/// Result of restoring a backend response
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub text: String,
    /// Tokens restored by exact match
    pub exact: usize,
    /// Tokens restored through the loose or positional fallback
    pub recovered: usize,
    pub warnings: Vec<TermRestorationWarning>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    end: usize,
    priority: usize,
    rule: &'static str,
}

impl Candidate {
    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Encodes and decodes non-translatable spans
pub struct TermProtector {
    keep_terms: Option<Regex>,
}

impl TermProtector {
    /// Create a protector with extra single-word keep terms
    pub fn new(keep_terms: &[String]) -> Self {
        Self {
            keep_terms: build_keep_terms(keep_terms),
        }
    }

    /// Replace every recognized span with a placeholder token
    pub fn protect(&self, text: &str) -> ProtectedText {
        let Some(brackets) = TOKEN_BRACKETS
            .iter()
            .copied()
            .find(|(open, close)| !text.contains(*open) && !text.contains(*close))
        else {
            warn!("Text contains every placeholder bracket pair, sending it unprotected");
            return ProtectedText {
                text: text.to_string(),
                spans: Vec::new(),
                brackets: TOKEN_BRACKETS[0],
            };
        };

        let accepted = self.select_spans(text);

        let mut out = String::with_capacity(text.len());
        let mut spans = Vec::with_capacity(accepted.len());
        let mut cursor = 0;
        for (rank, candidate) in accepted.iter().enumerate() {
            out.push_str(&text[cursor..candidate.start]);
            let token = format_token(brackets, rank);
            out.push_str(&token);
            spans.push(PlaceholderSpan {
                token,
                original: text[candidate.start..candidate.end].to_string(),
                rank,
                rule: candidate.rule,
            });
            cursor = candidate.end;
        }
        out.push_str(&text[cursor..]);

        ProtectedText {
            text: out,
            spans,
            brackets,
        }
    }

    /// Whether the whole term is something the protector would keep as-is
    pub fn is_terminology(&self, term: &str) -> bool {
        let term = term.trim();
        if term.is_empty() {
            return false;
        }
        let spans = self.select_spans(term);
        spans.len() == 1 && spans[0].start == 0 && spans[0].end == term.len()
    }

    fn select_spans(&self, text: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (index, rule) in RULES.iter().enumerate() {
            let priority = if index >= KEEP_TERMS_PRIORITY { index + 1 } else { index };
            collect_candidates(&mut candidates, text, &rule.pattern, rule.group, priority, rule.name);
        }
        if let Some(keep) = &self.keep_terms {
            collect_candidates(&mut candidates, text, keep, 0, KEEP_TERMS_PRIORITY, "keep_term");
        }

        candidates.sort_by_key(|c| (c.priority, c.start));
        let mut accepted: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if !accepted.iter().any(|a| a.overlaps(&candidate)) {
                accepted.push(candidate);
            }
        }
        accepted.sort_by_key(|c| c.start);
        accepted
    }
}

impl Default for TermProtector {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ProtectedText {
    /// Put the original spans back into a backend response
    pub fn restore(&self, translated: &str) -> RestoreReport {
        if self.spans.is_empty() {
            return RestoreReport {
                text: translated.to_string(),
                ..Default::default()
            };
        }

        let mut resolved = vec![false; self.spans.len()];
        // (start, end, replacement span index or None to leave as-is)
        let mut edits: Vec<(usize, usize, Option<usize>)> = Vec::new();
        let mut report = RestoreReport::default();

        // Well-formed tokens with an unknown number join the fallback below
        let mut loose: Vec<(usize, usize, usize)> = Vec::new();

        let exact = exact_token_regex(self.brackets);
        for caps in exact.captures_iter(translated) {
            let Some(whole) = caps.get(0) else { continue };
            match caps[1].parse::<usize>().ok().filter(|i| *i < self.spans.len()) {
                Some(i) => {
                    resolved[i] = true;
                    report.exact += 1;
                    edits.push((whole.start(), whole.end(), Some(i)));
                }
                None => loose.push((whole.start(), whole.end(), usize::MAX)),
            }
        }

        for caps in LOOSE_TOKEN.captures_iter(translated) {
            let Some(whole) = caps.get(0) else { continue };
            let claimed = edits
                .iter()
                .map(|(s, e, _)| (*s, *e))
                .chain(loose.iter().map(|(s, e, _)| (*s, *e)))
                .any(|(s, e)| whole.start() < e && s < whole.end());
            if claimed {
                continue;
            }
            let number = caps[1].parse::<usize>().unwrap_or(usize::MAX);
            loose.push((whole.start(), whole.end(), number));
        }
        loose.sort_by_key(|(start, _, _)| *start);

        for (start, end, number) in loose {
            let target = if number < self.spans.len() && !resolved[number] {
                Some(number)
            } else {
                resolved.iter().position(|r| !r)
            };
            match target {
                Some(i) => {
                    resolved[i] = true;
                    report.recovered += 1;
                    debug!(
                        "Recovered altered placeholder {:?} as {}",
                        &translated[start..end],
                        self.spans[i].token
                    );
                    edits.push((start, end, Some(i)));
                }
                None => report.warnings.push(TermRestorationWarning {
                    token: translated[start..end].to_string(),
                    original: String::new(),
                    reason: "does not correspond to any unresolved placeholder".to_string(),
                }),
            }
        }

        edits.sort_by_key(|(start, _, _)| *start);
        let mut out = String::with_capacity(translated.len());
        let mut cursor = 0;
        for (start, end, replacement) in edits {
            out.push_str(&translated[cursor..start]);
            match replacement {
                Some(i) => out.push_str(&self.spans[i].original),
                None => out.push_str(&translated[start..end]),
            }
            cursor = end;
        }
        out.push_str(&translated[cursor..]);

        for (span, done) in self.spans.iter().zip(&resolved) {
            if !done {
                report.warnings.push(TermRestorationWarning {
                    token: span.token.clone(),
                    original: span.original.clone(),
                    reason: "was dropped by the backend".to_string(),
                });
            }
        }

        report.text = out;
        report
    }
}

/// Rewrites target-language renderings of keep-as-is terms back to the source term
pub struct SourceTermRewriter {
    rules: Vec<(Regex, String)>,
}

impl SourceTermRewriter {
    /// Compile the table; invalid patterns are skipped with a warning
    pub fn new(terms: &[ForcedTerm]) -> Self {
        let rules = terms
            .iter()
            .filter_map(|t| match Regex::new(&format!("(?i){}", t.pattern)) {
                Ok(re) => Some((re, t.term.clone())),
                Err(e) => {
                    warn!("Skipping forced term pattern {:?}: {}", t.pattern, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, term) in &self.rules {
            if pattern.is_match(&out) {
                out = pattern.replace_all(&out, regex::NoExpand(term)).into_owned();
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn collect_candidates(
    candidates: &mut Vec<Candidate>,
    text: &str,
    pattern: &Regex,
    group: usize,
    priority: usize,
    rule: &'static str,
) {
    for caps in pattern.captures_iter(text) {
        if let Some(m) = caps.get(group) {
            if m.start() < m.end() {
                candidates.push(Candidate {
                    start: m.start(),
                    end: m.end(),
                    priority,
                    rule,
                });
            }
        }
    }
}

fn build_keep_terms(extra: &[String]) -> Option<Regex> {
    let mut words: Vec<&str> = extra.iter().map(String::as_str).filter(|w| !w.trim().is_empty()).collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));

    let mut phrases: Vec<&str> = KEEP_PHRASES.to_vec();
    phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));

    let mut alternatives = Vec::new();
    alternatives.push(format!(
        "(?i:{})",
        phrases.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join("|")
    ));
    alternatives.extend(words.iter().map(|w| regex::escape(w)));

    let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Keep terms could not be compiled: {}", e);
            None
        }
    }
}

fn format_token((open, close): (char, char), rank: usize) -> String {
    format!("{}P{}{}", open, rank, close)
}

fn exact_token_regex((open, close): (char, char)) -> Regex {
    let pattern = format!(
        "{}P(\\d+){}",
        regex::escape(&open.to_string()),
        regex::escape(&close.to_string())
    );
    Regex::new(&pattern).expect("valid token pattern")
}
