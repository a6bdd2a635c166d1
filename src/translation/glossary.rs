/*!
 * Built-in technical glossary.
 *
 * The glossary serves three purposes:
 * - listing the terminology (`glossary` command and the `--glossary` side file)
 * - annotating the first use of each translated term with its source term,
 *   e.g. `зв'язаність (coupling)`
 * - feeding terminology context to the prompt
 *
 * Only an English to Ukrainian table ships with the crate; other language
 * pairs get an empty glossary.
 */

use std::collections::HashSet;

use crate::language_utils::language_codes_match;

/// Source term, target term
pub const TECH_GLOSSARY_UK: &[(&str, &str)] = &[
    ("architect", "архітектор"),
    ("developer", "розробник"),
    ("stakeholder", "зацікавлена сторона"),
    ("stakeholders", "зацікавлені сторони"),
    ("architecture characteristics", "архітектурні характеристики"),
    ("architecture characteristic", "архітектурна характеристика"),
    ("architectural quantum", "архітектурний квант"),
    ("architectural quanta", "архітектурні кванти"),
    ("fitness function", "фітнес-функція"),
    ("fitness functions", "фітнес-функції"),
    ("bounded context", "обмежений контекст"),
    ("bounded contexts", "обмежені контексти"),
    ("component", "компонент"),
    ("components", "компоненти"),
    ("deployment unit", "одиниця розгортання"),
    ("scalability", "масштабованість"),
    ("availability", "доступність"),
    ("reliability", "надійність"),
    ("maintainability", "зручність супроводу"),
    ("testability", "тестованість"),
    ("deployability", "придатність до розгортання"),
    ("agility", "гнучкість"),
    ("elasticity", "еластичність"),
    ("performance", "продуктивність"),
    ("security", "безпека"),
    ("observability", "спостережуваність"),
    ("fault tolerance", "відмовостійкість"),
    ("recoverability", "відновлюваність"),
    ("coupling", "зв'язаність"),
    ("cohesion", "зчепленість"),
    ("modularity", "модульність"),
    ("abstraction", "абстракція"),
    ("encapsulation", "інкапсуляція"),
    ("connascence", "конасценція"),
    ("afferent coupling", "доцентрова зв'язаність"),
    ("efferent coupling", "відцентрова зв'язаність"),
    ("abstractness", "абстрактність"),
    ("instability", "нестабільність"),
    ("distance from the main sequence", "відстань від головної послідовності"),
    ("layered architecture", "шарувата архітектура"),
    ("microkernel architecture", "мікроядерна архітектура"),
    ("service-based architecture", "сервісно-орієнтована архітектура"),
    ("event-driven architecture", "подієво-орієнтована архітектура"),
    ("space-based architecture", "просторово-орієнтована архітектура"),
    ("pipeline architecture", "конвеєрна архітектура"),
    ("microservices architecture", "мікросервісна архітектура"),
    ("microservices", "мікросервіси"),
    ("big ball of mud", "великий клубок бруду"),
    ("trade-off", "компроміс"),
    ("trade-offs", "компроміси"),
    ("anti-pattern", "антипатерн"),
    ("anti-patterns", "антипатерни"),
    ("design pattern", "патерн проєктування"),
    ("design patterns", "патерни проєктування"),
    ("broker topology", "топологія брокера"),
    ("mediator topology", "топологія медіатора"),
    ("orchestration", "оркестрація"),
    ("choreography", "хореографія"),
    ("saga", "сага"),
    ("sagas", "саги"),
    ("continuous delivery", "безперервне постачання"),
    ("continuous integration", "безперервна інтеграція"),
    ("continuous deployment", "безперервне розгортання"),
    ("refactoring", "рефакторинг"),
    ("technical debt", "технічний борг"),
    ("code review", "перегляд коду"),
    ("pull request", "запит на злиття"),
    ("architecture decision record", "запис архітектурного рішення"),
    ("architecture decision records", "записи архітектурних рішень"),
    ("risk assessment", "оцінка ризиків"),
    ("risk matrix", "матриця ризиків"),
    ("risk storming", "штурм ризиків"),
    ("team topology", "топологія команди"),
    ("domain-driven design", "предметно-орієнтоване проєктування"),
    ("extreme programming", "екстремальне програмування"),
];

// Generic single words are listed but never annotated
const NOT_ANNOTATED: &[&str] = &[
    "architect",
    "developer",
    "stakeholder",
    "stakeholders",
    "component",
    "components",
    "performance",
    "security",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
}

/// Glossary for one language pair
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// Built-in glossary for translating from English into the target language
    pub fn builtin(source_language: &str, target_language: &str) -> Self {
        if !language_codes_match(source_language, "en") || !language_codes_match(target_language, "uk") {
            return Self::default();
        }
        Self::from_pairs(TECH_GLOSSARY_UK)
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(s, t)| GlossaryEntry {
                    source: s.to_string(),
                    target: t.to_string(),
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Markdown table of the glossary, sorted by source term
    pub fn to_markdown(&self, title: &str) -> String {
        let mut sorted: Vec<&GlossaryEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.source.to_lowercase().cmp(&b.source.to_lowercase()));

        let mut lines = vec![
            format!("## {}", title),
            String::new(),
            "| Source term | Translation |".to_string(),
            "|---|---|".to_string(),
        ];
        lines.extend(sorted.iter().map(|e| format!("| {} | {} |", e.source, e.target)));
        lines.join("\n") + "\n"
    }

    /// Annotate the first use of each target term outside code blocks.
    ///
    /// Occurrences already followed by a parenthesis are left alone, so running
    /// it twice changes nothing. Returns the text and the annotated terms.
    pub fn annotate_first_use(&self, text: &str) -> (String, Vec<String>) {
        let mut entries: Vec<&GlossaryEntry> = self
            .entries
            .iter()
            .filter(|e| !NOT_ANNOTATED.contains(&e.source.as_str()))
            .collect();
        // Longer terms first so "afferent coupling" claims its words before "coupling"
        entries.sort_by_key(|e| std::cmp::Reverse(e.target.chars().count()));

        let mut out = text.to_string();
        let mut seen: HashSet<String> = HashSet::new();
        let mut annotated = Vec::new();

        for entry in entries {
            let key = entry.target.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }

            let code = code_ranges(&out);
            let Some((start, end)) = find_first_free(&out, &key, &code) else {
                continue;
            };

            let insertion = format!(" ({})", entry.source);
            out.insert_str(end, &insertion);
            annotated.push(format!("{} ({})", &out[start..end], entry.source));
        }

        (out, annotated)
    }
}

// Byte ranges of fenced code blocks
fn code_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut search_from = 0;
    while let Some(open) = text[search_from..].find("```") {
        let start = search_from + open;
        match text[start + 3..].find("```") {
            Some(close) => {
                let end = start + 3 + close + 3;
                ranges.push((start, end));
                search_from = end;
            }
            None => {
                ranges.push((start, text.len()));
                break;
            }
        }
    }
    ranges
}

// First case-insensitive, word-bounded occurrence outside code, or None when
// that occurrence already carries an annotation. `needle` is lowercase.
fn find_first_free(text: &str, needle: &str, code: &[(usize, usize)]) -> Option<(usize, usize)> {
    let lower = text.to_lowercase();
    // Lowercasing can change byte lengths; fall back to no annotation then
    if lower.len() != text.len() {
        return None;
    }

    let mut from = 0;
    while let Some(pos) = lower[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        from = end;

        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        let bounded = !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);
        let in_code = code.iter().any(|(s, e)| start >= *s && start < *e);

        if bounded && !in_code {
            if text[end..].trim_start().starts_with('(') {
                return None;
            }
            return Some((start, end));
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}
