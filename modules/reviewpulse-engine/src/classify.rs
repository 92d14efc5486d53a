//! Classification stage: relevance filtering, sentiment, quality scoring.
//!
//! Two tiers with identical output schemas, an LLM-backed primary and a
//! rule-based fallback, so downstream stages never know which one ran.

use std::sync::Arc;
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use ai_client::Claude;
use reviewpulse_common::scoring::{quality_score, SourceWeights};
use reviewpulse_common::types::{
    CanonicalItem, ClassifiedItem, RejectReason, RelevanceVerdict, SentimentLabel,
};

pub struct ClassifyContext {
    pub product_name: String,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify every canonical item. The output covers all inputs:
    /// rejected items are returned with their reason, never dropped.
    async fn classify(
        &self,
        items: &[CanonicalItem],
        ctx: &ClassifyContext,
    ) -> Result<Vec<ClassifiedItem>>;
}

// ---------------------------------------------------------------------------
// Rule-based fallback
// ---------------------------------------------------------------------------

const MIN_RELEVANT_CHARS: usize = 10;

const NEGATIVE_MARKERS: &[&str] = &[
    "crash", "bug", "broken", "terrible", "awful", "slow", "cancel", "refund", "worst",
    "useless", "hate", "disappointed", "expensive", "unusable", "data loss",
];

const POSITIVE_MARKERS: &[&str] = &[
    "great", "love", "excellent", "amazing", "fantastic", "reliable", "fast", "recommend",
    "best", "solid",
];

fn spam_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(buy now|click here|discount|promo code|affiliate|sponsored)\b|https?://\S+|\b(dm me|contact me at)\b",
        )
        .expect("valid regex")
    })
}

/// Local heuristic classifier. Always available; used directly when no LLM is
/// configured and as the degradation target when the LLM tier fails.
pub struct RuleClassifier {
    weights: SourceWeights,
}

impl RuleClassifier {
    pub fn new(weights: SourceWeights) -> Self {
        Self { weights }
    }

    fn sentiment_of(text: &str) -> (SentimentLabel, f64) {
        let lower = text.to_lowercase();
        let neg = NEGATIVE_MARKERS
            .iter()
            .filter(|m| lower.contains(*m))
            .count() as i32;
        let pos = POSITIVE_MARKERS
            .iter()
            .filter(|m| lower.contains(*m))
            .count() as i32;
        let diff = pos - neg;
        let label = if diff > 0 {
            SentimentLabel::Positive
        } else if diff < 0 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        let confidence = (0.5 + 0.1 * diff.unsigned_abs() as f64).min(0.95);
        (label, confidence)
    }

    fn classify_one(&self, item: &CanonicalItem) -> ClassifiedItem {
        let verdict = if item.text.trim().chars().count() < MIN_RELEVANT_CHARS {
            RelevanceVerdict::Rejected {
                reason: RejectReason::TooShort,
            }
        } else if spam_re().is_match(&item.text) {
            RelevanceVerdict::Rejected {
                reason: RejectReason::Spam,
            }
        } else {
            RelevanceVerdict::Kept
        };
        let (sentiment, sentiment_confidence) = Self::sentiment_of(&item.text);
        let quality = quality_score(&item.text, item.engagement, self.weights.weight(item.source));
        ClassifiedItem {
            item: item.clone(),
            verdict,
            sentiment,
            sentiment_confidence,
            quality,
        }
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        items: &[CanonicalItem],
        _ctx: &ClassifyContext,
    ) -> Result<Vec<ClassifiedItem>> {
        Ok(items.iter().map(|item| self.classify_one(item)).collect())
    }
}

// ---------------------------------------------------------------------------
// LLM-backed primary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct RelevanceDecisions {
    decisions: Vec<RelevanceDecision>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelevanceDecision {
    /// Zero-based index into the submitted list.
    index: usize,
    /// False when the text is about something other than the product.
    relevant: bool,
    sentiment: SentimentLabel,
    /// 0.0-1.0.
    confidence: f64,
}

pub struct LlmClassifier {
    ai: Claude,
    weights: SourceWeights,
}

impl LlmClassifier {
    pub fn new(ai: Claude, weights: SourceWeights) -> Self {
        Self { ai, weights }
    }
}

const CLASSIFY_SYSTEM_PROMPT: &str = "You are a data-filtering assistant for product feedback research. \
For every numbered text decide whether it is genuine user feedback about the named product \
(features, bugs, pricing, support, or use cases). Mark text about unrelated products, politics, \
or promotional spam as not relevant. For relevant text, judge the sentiment toward the product \
and your confidence in that judgement.";

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        items: &[CanonicalItem],
        ctx: &ClassifyContext,
    ) -> Result<Vec<ClassifiedItem>> {
        let numbered: String = items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let text: String = item.text.chars().take(400).collect();
                format!("[{idx}] {text}")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user_prompt = format!(
            "Product: \"{}\"\n\nTexts to classify:\n\n{}",
            ctx.product_name, numbered
        );

        let result: RelevanceDecisions =
            self.ai.extract(CLASSIFY_SYSTEM_PROMPT, user_prompt).await?;

        let mut decisions: Vec<Option<&RelevanceDecision>> = vec![None; items.len()];
        for decision in &result.decisions {
            if decision.index < items.len() {
                decisions[decision.index] = Some(decision);
            }
        }

        let classified = items
            .iter()
            .zip(decisions)
            .map(|(item, decision)| {
                // An item the model skipped defaults to kept/neutral rather
                // than silently vanishing.
                let (verdict, sentiment, confidence) = match decision {
                    Some(d) if d.relevant => {
                        (RelevanceVerdict::Kept, d.sentiment, d.confidence.clamp(0.0, 1.0))
                    }
                    Some(d) => (
                        RelevanceVerdict::Rejected {
                            reason: RejectReason::OffTopic,
                        },
                        d.sentiment,
                        d.confidence.clamp(0.0, 1.0),
                    ),
                    None => (RelevanceVerdict::Kept, SentimentLabel::Neutral, 0.5),
                };
                let quality =
                    quality_score(&item.text, item.engagement, self.weights.weight(item.source));
                ClassifiedItem {
                    item: item.clone(),
                    verdict,
                    sentiment,
                    sentiment_confidence: confidence,
                    quality,
                }
            })
            .collect();
        Ok(classified)
    }
}

// ---------------------------------------------------------------------------
// Two-tier strategy
// ---------------------------------------------------------------------------

pub struct ClassificationOutcome {
    pub items: Vec<ClassifiedItem>,
    /// Present when the primary tier failed and the fallback ran instead.
    pub degraded: Option<String>,
}

/// Primary/fallback pair with matching output schemas. A primary failure is
/// a recoverable degradation, never a stage failure.
pub struct ClassifierStack {
    primary: Option<Arc<dyn Classifier>>,
    fallback: Arc<dyn Classifier>,
}

impl ClassifierStack {
    pub fn new(primary: Option<Arc<dyn Classifier>>, fallback: Arc<dyn Classifier>) -> Self {
        Self { primary, fallback }
    }

    pub fn rule_only(weights: SourceWeights) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(RuleClassifier::new(weights)),
        }
    }

    pub async fn classify(
        &self,
        items: &[CanonicalItem],
        ctx: &ClassifyContext,
    ) -> Result<ClassificationOutcome> {
        if let Some(primary) = &self.primary {
            match primary.classify(items, ctx).await {
                Ok(classified) => {
                    info!(items = classified.len(), "Primary classifier succeeded");
                    return Ok(ClassificationOutcome {
                        items: classified,
                        degraded: None,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Primary classifier failed, falling back to rules");
                    let classified = self.fallback.classify(items, ctx).await?;
                    return Ok(ClassificationOutcome {
                        items: classified,
                        degraded: Some(e.to_string()),
                    });
                }
            }
        }
        let classified = self.fallback.classify(items, ctx).await?;
        Ok(ClassificationOutcome {
            items: classified,
            degraded: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewpulse_common::types::{ItemKey, SourceId};

    fn canonical(text: &str, engagement: u32) -> CanonicalItem {
        CanonicalItem {
            text: text.to_string(),
            source: SourceId::Reddit,
            engagement,
            members: vec![ItemKey {
                source: SourceId::Reddit,
                source_key: format!("k-{engagement}"),
            }],
            cluster_confidence: 1.0,
            first_seen: None,
        }
    }

    fn ctx() -> ClassifyContext {
        ClassifyContext {
            product_name: "Acme Notes".to_string(),
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(
            &self,
            _items: &[CanonicalItem],
            _ctx: &ClassifyContext,
        ) -> Result<Vec<ClassifiedItem>> {
            anyhow::bail!("inference backend unreachable")
        }
    }

    #[tokio::test]
    async fn rules_reject_spam_and_short_text() {
        let classifier = RuleClassifier::new(SourceWeights::default());
        let items = vec![
            canonical("Buy now with promo code SAVE50, click here!!", 1),
            canonical("meh", 1),
            canonical("The new sync engine finally made this reliable for me", 4),
        ];
        let out = classifier.classify(&items, &ctx()).await.unwrap();

        assert_eq!(out.len(), 3, "rejected items are retained");
        assert_eq!(
            out[0].verdict,
            RelevanceVerdict::Rejected {
                reason: RejectReason::Spam
            }
        );
        assert_eq!(
            out[1].verdict,
            RelevanceVerdict::Rejected {
                reason: RejectReason::TooShort
            }
        );
        assert!(out[2].verdict.is_kept());
    }

    #[tokio::test]
    async fn rules_label_sentiment_from_markers() {
        let classifier = RuleClassifier::new(SourceWeights::default());
        let items = vec![
            canonical("I love it, excellent and reliable product overall", 1),
            canonical("Constant crashes and terrible support, total data loss", 1),
            canonical("It exists and does some things I suppose, nothing remarkable", 1),
        ];
        let out = classifier.classify(&items, &ctx()).await.unwrap();
        assert_eq!(out[0].sentiment, SentimentLabel::Positive);
        assert_eq!(out[1].sentiment, SentimentLabel::Negative);
        assert_eq!(out[2].sentiment, SentimentLabel::Neutral);
        assert!(out[1].sentiment_confidence > out[2].sentiment_confidence);
    }

    #[tokio::test]
    async fn stack_degrades_when_primary_fails() {
        let stack = ClassifierStack::new(
            Some(Arc::new(FailingClassifier)),
            Arc::new(RuleClassifier::new(SourceWeights::default())),
        );
        let items = vec![canonical("sync is broken and support is slow to reply", 2)];
        let out = stack.classify(&items, &ctx()).await.unwrap();

        assert_eq!(out.items.len(), 1);
        let reason = out.degraded.expect("degradation recorded");
        assert!(reason.contains("unreachable"));
    }

    #[tokio::test]
    async fn rule_only_stack_is_not_degraded() {
        let stack = ClassifierStack::rule_only(SourceWeights::default());
        let items = vec![canonical("perfectly ordinary remark about the product", 0)];
        let out = stack.classify(&items, &ctx()).await.unwrap();
        assert!(out.degraded.is_none());
    }
}
