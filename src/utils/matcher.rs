//! Title similarity scoring for title-search-based sources.
//!
//! Title searches against mirrors and aggregators return false
//! positives; a candidate is only accepted when its title scores above
//! a threshold against the requested one. Scoring is token-based
//! Jaro-Winkler with a case-aware discount: a lowercase common word is
//! not good evidence for a proper-noun token like "LLaMA", even though
//! the two compare equal case-insensitively.

use strsim::jaro_winkler;

pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Discount applied to a token pair that only matches once case is
/// folded away and the requested token carries interior capitals.
const CASE_FOLD_DISCOUNT: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct TitleMatcher {
    threshold: f64,
}

impl TitleMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score candidate against requested title, in [0, 1].
    ///
    /// Each requested token is matched to its best candidate token;
    /// contributions are weighted by token length so stopwords barely
    /// count.
    pub fn score(&self, requested: &str, candidate: &str) -> f64 {
        let req_tokens = tokenize(requested);
        let cand_tokens = tokenize(candidate);
        if req_tokens.is_empty() || cand_tokens.is_empty() {
            return 0.0;
        }

        let mut weighted = 0.0;
        let mut weight_total = 0.0;
        for req in &req_tokens {
            let weight = req.len() as f64;
            let mut best = 0.0f64;
            for cand in &cand_tokens {
                let mut s = jaro_winkler(&req.to_lowercase(), &cand.to_lowercase());
                if s > 0.99 && req != cand && has_interior_caps(req) {
                    s *= CASE_FOLD_DISCOUNT;
                }
                best = best.max(s);
            }
            weighted += best * weight;
            weight_total += weight;
        }

        // Penalize candidates much shorter than the request; "llama"
        // alone should not stand in for a seven-word title.
        let coverage =
            (cand_tokens.len() as f64 / req_tokens.len() as f64).min(1.0);
        let base = weighted / weight_total;
        base * (0.5 + 0.5 * coverage)
    }

    /// Accept/reject against the configured threshold.
    pub fn accepts(&self, requested: &str, candidate: &str) -> bool {
        self.score(requested, candidate) >= self.threshold
    }
}

impl Default for TitleMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// True for tokens like "LLaMA" or "BioBERT" whose capitalization is
/// part of the name, as opposed to ordinary title-case words.
fn has_interior_caps(token: &str) -> bool {
    token.chars().skip(1).any(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let m = TitleMatcher::default();
        let t = "Attention Is All You Need";
        assert!(m.score(t, t) > 0.99);
        assert!(m.accepts(t, t));
    }

    #[test]
    fn test_llama_false_positive_rejected() {
        let m = TitleMatcher::default();
        let requested = "LLaMA: Open and Efficient Foundation Language Models";
        let candidate = "llama husbandry guide";
        let score = m.score(requested, candidate);
        assert!(score < 0.70, "score was {score}");
        assert!(!m.accepts(requested, candidate));
    }

    #[test]
    fn test_case_insensitive_same_work_accepted() {
        let m = TitleMatcher::default();
        let requested = "LLaMA: Open and Efficient Foundation Language Models";
        let candidate = "LLaMA: Open and Efficient Foundation Language Models.";
        assert!(m.accepts(requested, candidate));
    }

    #[test]
    fn test_unrelated_rejected() {
        let m = TitleMatcher::default();
        assert!(!m.accepts(
            "Deep Residual Learning for Image Recognition",
            "A Survey of Crop Rotation Practices in Northern Europe"
        ));
    }

    #[test]
    fn test_subtitle_variation_accepted() {
        let m = TitleMatcher::default();
        assert!(m.accepts(
            "BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding",
            "BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding (NAACL 2019)"
        ));
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let m = TitleMatcher::default();
        assert_eq!(m.score("", "anything"), 0.0);
        assert_eq!(m.score("anything", ""), 0.0);
    }

    #[test]
    fn test_threshold_clamped() {
        let m = TitleMatcher::new(7.0);
        assert_eq!(m.threshold(), 1.0);
    }
}
