/*!
 * Tests for placeholder protection with the configured keep terms
 */

use booktrans::app_config::Config;
use booktrans::translation::TermProtector;

fn protector() -> TermProtector {
    TermProtector::new(&Config::default().glossary.keep_terms)
}

const SAMPLE: &str = "Deploy the service with `kubectl apply -f app.yaml` on Kubernetes.\n\n\
Read https://example.com/docs/setup and call load_config() before the HTTP server starts.\n\n\
```\nfn main() {\n    println!(\"hello\");\n}\n```\n\n\
Version 1.2.3 of the SDK talks to Redis through the RedisClient::connect method.";

/// Protect then restore with an identity backend gives the original back
#[test]
fn test_protect_withIdentityBackend_shouldRestoreExactly() {
    let protected = protector().protect(SAMPLE);
    assert!(!protected.spans.is_empty());
    assert!(!protected.text.contains("kubectl"));
    assert!(!protected.text.contains("println!"));

    let report = protected.restore(&protected.text);
    assert_eq!(report.text, SAMPLE);
    assert!(report.is_clean());
    assert_eq!(report.exact, protected.spans.len());
}

/// Configured keep terms are protected as whole words only
#[test]
fn test_protect_withKeepTerms_shouldProtectWholeWords() {
    let protected = protector().protect("Kubernetes runs on Kubernetesque clusters near Redis.");
    let originals: Vec<&str> = protected.spans.iter().map(|s| s.original.as_str()).collect();

    assert!(originals.contains(&"Kubernetes"));
    assert!(originals.contains(&"Redis"));
    assert!(protected.text.contains("Kubernetesque"));
}

/// A backend that moves tokens around still gets every span back
#[test]
fn test_restore_withReorderedTokens_shouldRestoreAll() {
    let protected = protector().protect("Use `git rebase` with Docker and call init_repo() first.");
    assert_eq!(protected.spans.len(), 3);

    let reordered = format!(
        "{} first, then {} with {}.",
        protected.spans[2].token, protected.spans[0].token, protected.spans[1].token
    );
    let report = protected.restore(&reordered);

    assert_eq!(report.text, "init_repo() first, then `git rebase` with Docker.");
    assert!(report.is_clean());
}
