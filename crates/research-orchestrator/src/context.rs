const WORDS_PER_ARTIFACT: usize = 1_500;
/// Rough words-per-token ratio for English prose; good enough to keep the
/// context budget conservative without tokenizing per provider.
const WORDS_PER_TOKEN: f64 = 0.75;

/// One prior phase's contribution to the next phase's prompt context.
pub struct PriorPhase {
    pub phase_index: usize,
    pub title: String,
    pub leading_words: String,
}

/// Builds the context block prepended to a phase's prompt from its prior
/// phases' artifacts: each capped at 1,500 words, the whole block capped at
/// 80% of the target model's context window, oldest phases dropped first
/// when the combined total still doesn't fit.
pub fn build_context(mut prior: Vec<PriorPhase>, target_context_window_tokens: usize) -> String {
    let word_budget = ((target_context_window_tokens as f64) * 0.80 * WORDS_PER_TOKEN) as usize;

    prior.sort_by_key(|p| p.phase_index);
    let mut included: Vec<&PriorPhase> = prior.iter().collect();

    let word_count = |phases: &[&PriorPhase]| -> usize {
        phases.iter().map(|p| p.leading_words.split_whitespace().count()).sum()
    };

    while word_count(&included) > word_budget && !included.is_empty() {
        included.remove(0);
    }

    if included.is_empty() {
        return String::new();
    }

    let body = included
        .iter()
        .map(|p| format!("## Prior phase: {}\n\n{}", p.title, p.leading_words))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("Context from previous phases:\n{body}")
}

/// Truncates one artifact's markdown body to the per-artifact word cap before
/// it is handed to `build_context`.
pub fn cap_words(markdown_body: &str) -> String {
    markdown_body
        .split_whitespace()
        .take(WORDS_PER_ARTIFACT)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_phases_first_when_over_budget() {
        let prior = vec![
            PriorPhase { phase_index: 0, title: "Discovery".into(), leading_words: "word ".repeat(400) },
            PriorPhase { phase_index: 1, title: "Analysis".into(), leading_words: "word ".repeat(400) },
            PriorPhase { phase_index: 2, title: "Synthesis".into(), leading_words: "word ".repeat(400) },
        ];
        // Tiny context window forces the budget below the combined 1200 words.
        let context = build_context(prior, 100);
        assert!(!context.contains("Discovery"));
        assert!(context.contains("Synthesis"));
    }

    #[test]
    fn keeps_everything_when_comfortably_under_budget() {
        let prior = vec![PriorPhase { phase_index: 0, title: "Discovery".into(), leading_words: "hello world".into() }];
        let context = build_context(prior, 128_000);
        assert!(context.contains("Discovery"));
        assert!(context.contains("hello world"));
    }

    #[test]
    fn prepends_the_prior_phases_banner_when_there_is_any_prior_context() {
        let prior = vec![PriorPhase { phase_index: 0, title: "Discovery".into(), leading_words: "hello world".into() }];
        let context = build_context(prior, 128_000);
        assert!(context.starts_with("Context from previous phases:\n"));
    }

    #[test]
    fn omits_the_banner_when_no_prior_phase_survives_the_budget() {
        let context = build_context(Vec::new(), 128_000);
        assert!(context.is_empty());
    }

    #[test]
    fn cap_words_truncates_to_the_per_artifact_limit() {
        let body = "w ".repeat(2_000);
        let capped = cap_words(&body);
        assert_eq!(capped.split_whitespace().count(), WORDS_PER_ARTIFACT);
    }
}
