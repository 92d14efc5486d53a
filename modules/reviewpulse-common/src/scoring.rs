//! Pure scoring primitives: quality score, weighted sentiment aggregation,
//! ICE prioritization, and revenue-risk math. No I/O, fully deterministic.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};

use crate::types::{
    Aspect, AspectSentiment, ChurnRiskEvent, ClassifiedItem, FinancialImpact, PriorityItem,
    SentimentLabel, SourceId,
};

// ---------------------------------------------------------------------------
// Quality score
// ---------------------------------------------------------------------------

/// Baseline every item starts from before bonuses.
pub const BASE_SCORE: f64 = 0.5;
/// Texts at or above this length earn the length bonus.
pub const LENGTH_BONUS_THRESHOLD: usize = 50;
pub const LENGTH_BONUS: f64 = 0.1;
/// Engagement bonus saturates at this weight.
pub const ENGAGEMENT_SATURATION: f64 = 10.0;
pub const ENGAGEMENT_BONUS_MAX: f64 = 0.2;

/// Per-source credibility multipliers applied to the base quality signals.
#[derive(Debug, Clone)]
pub struct SourceWeights(HashMap<SourceId, f64>);

impl Default for SourceWeights {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert(SourceId::HackerNews, 1.0);
        weights.insert(SourceId::Reddit, 0.9);
        weights.insert(SourceId::AppStore, 0.8);
        weights.insert(SourceId::WebSearch, 0.7);
        Self(weights)
    }
}

impl SourceWeights {
    pub fn new(weights: HashMap<SourceId, f64>) -> Self {
        Self(weights)
    }

    pub fn weight(&self, source: SourceId) -> f64 {
        self.0.get(&source).copied().unwrap_or(0.7)
    }
}

/// Quality score for a canonical item, bounded to [0, 1].
///
/// Additive signals (base + length bonus + engagement bonus) multiplied by
/// the per-source credibility weight, then clamped. Monotonically
/// non-decreasing in engagement for fixed text and source.
pub fn quality_score(text: &str, engagement: u32, source_weight: f64) -> f64 {
    let length_bonus = if text.trim().chars().count() >= LENGTH_BONUS_THRESHOLD {
        LENGTH_BONUS
    } else {
        0.0
    };
    let engagement_bonus = if engagement as f64 >= ENGAGEMENT_SATURATION {
        ENGAGEMENT_BONUS_MAX
    } else {
        engagement as f64 / ENGAGEMENT_SATURATION * ENGAGEMENT_BONUS_MAX
    };
    ((BASE_SCORE + length_bonus + engagement_bonus) * source_weight).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Sentiment aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentAggregate {
    /// Weighted aggregate score, 0-10. 5.0 for an empty input.
    pub weighted_score: f64,
    pub overall_label: SentimentLabel,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    pub total: u32,
}

/// Weighted aggregate sentiment across classified items.
/// Each item contributes `label.value() * quality * confidence`.
pub fn aggregate_sentiment(items: &[ClassifiedItem]) -> SentimentAggregate {
    if items.is_empty() {
        return SentimentAggregate {
            weighted_score: 5.0,
            overall_label: SentimentLabel::Neutral,
            positive_pct: 0.0,
            neutral_pct: 0.0,
            negative_pct: 0.0,
            total: 0,
        };
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut counts: HashMap<SentimentLabel, u32> = HashMap::new();

    for item in items {
        let weight = item.quality * item.sentiment_confidence;
        weighted_sum += item.sentiment.value() * weight;
        total_weight += weight;
        *counts.entry(item.sentiment).or_insert(0) += 1;
    }

    let raw = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.5
    };

    // Majority label; ties resolved in positive > neutral > negative order.
    let mut overall_label = SentimentLabel::Neutral;
    let mut best = 0u32;
    for label in [
        SentimentLabel::Positive,
        SentimentLabel::Neutral,
        SentimentLabel::Negative,
    ] {
        let count = counts.get(&label).copied().unwrap_or(0);
        if count > best {
            best = count;
            overall_label = label;
        }
    }

    let total = items.len() as u32;
    let pct = |label: SentimentLabel| {
        counts.get(&label).copied().unwrap_or(0) as f64 / total as f64 * 100.0
    };

    SentimentAggregate {
        weighted_score: raw * 10.0,
        overall_label,
        positive_pct: pct(SentimentLabel::Positive),
        neutral_pct: pct(SentimentLabel::Neutral),
        negative_pct: pct(SentimentLabel::Negative),
        total,
    }
}

/// Keyword table driving aspect bucketing.
pub fn aspect_keywords(aspect: Aspect) -> &'static [&'static str] {
    match aspect {
        Aspect::Pricing => &[
            "price", "pricing", "expensive", "cost", "subscription", "billing", "overpriced",
        ],
        Aspect::Performance => &["slow", "fast", "performance", "lag", "speed", "latency"],
        Aspect::Reliability => &[
            "crash", "bug", "broken", "outage", "unstable", "unreliable", "data loss",
        ],
        Aspect::Support => &[
            "support", "customer service", "help desk", "response time", "ticket",
        ],
        Aspect::Features => &[
            "feature", "missing", "integration", "api", "functionality", "roadmap",
        ],
        Aspect::Ux => &[
            "ui", "ux", "interface", "design", "confusing", "intuitive", "usability",
        ],
    }
}

/// Detect which aspects a text mentions. Deterministic enum order.
pub fn detect_aspects(text: &str) -> Vec<Aspect> {
    let lower = text.to_lowercase();
    Aspect::all()
        .into_iter()
        .filter(|aspect| {
            aspect_keywords(*aspect)
                .iter()
                .any(|kw| lower.contains(kw))
        })
        .collect()
}

/// Per-aspect weighted sentiment. Aspects with no mentions are omitted.
/// Output order follows the fixed aspect enum order.
pub fn aspect_breakdown(items: &[ClassifiedItem]) -> Vec<AspectSentiment> {
    let mut out = Vec::new();
    for aspect in Aspect::all() {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut mentions = 0u32;
        for item in items {
            if !detect_aspects(&item.item.text).contains(&aspect) {
                continue;
            }
            let weight = item.quality * item.sentiment_confidence;
            weighted_sum += item.sentiment.value() * weight;
            total_weight += weight;
            mentions += 1;
        }
        if mentions == 0 {
            continue;
        }
        let raw = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.5
        };
        out.push(AspectSentiment {
            aspect,
            score: raw * 10.0,
            mention_count: mentions,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// ICE prioritization
// ---------------------------------------------------------------------------

/// Impact x Confidence x Ease, each clamped to 1-10.
pub fn ice_score(impact: u8, confidence: u8, ease: u8) -> u32 {
    impact.clamp(1, 10) as u32 * confidence.clamp(1, 10) as u32 * ease.clamp(1, 10) as u32
}

/// Recompute scores, sort descending, and assign 1-based ranks.
///
/// Tie-break chain: higher impact, then earlier first mention (unknown
/// timestamps last), then gap text. The final content tie-break makes the
/// ranking independent of input order.
pub fn rank_priorities(mut items: Vec<PriorityItem>) -> Vec<PriorityItem> {
    for item in &mut items {
        item.ice_score = ice_score(item.impact, item.confidence, item.ease);
    }
    items.sort_by(|a, b| {
        b.ice_score
            .cmp(&a.ice_score)
            .then(b.impact.cmp(&a.impact))
            .then_with(|| match (a.first_mentioned, b.first_mentioned) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.gap.cmp(&b.gap))
    });
    for (idx, item) in items.iter_mut().enumerate() {
        item.rank = idx as u32 + 1;
    }
    items
}

// ---------------------------------------------------------------------------
// Revenue risk
// ---------------------------------------------------------------------------

/// Phrases that signal explicit churn intent.
pub const CHURN_KEYWORDS: &[&str] = &[
    "cancel",
    "cancelled",
    "cancelling",
    "switching",
    "switched",
    "refund",
    "leaving",
    "unsubscribed",
    "moved to",
    "migrated to",
    "replacing",
    "dropped",
    "quit",
];

/// Churn keywords present in a text, in table order.
pub fn churn_keywords_in(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    CHURN_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lower.contains(kw))
        .collect()
}

pub fn estimated_monthly_price(arpu: Option<f64>, default_price: f64) -> f64 {
    match arpu {
        Some(v) if v > 0.0 => v,
        _ => default_price,
    }
}

/// Severity of a category bucket: weighted share of negative events.
/// `weighted_negative` and `total_weight` are sums of `quality * confidence`.
pub fn severity_score(weighted_negative: f64, total_weight: f64) -> f64 {
    if total_weight <= 0.0 {
        return 0.0;
    }
    (weighted_negative / total_weight).clamp(0.0, 1.0)
}

/// Revenue at risk for one event. Stored verbatim so the figure is always
/// reproducible from its inputs.
pub fn revenue_risk(severity: f64, monthly_price: f64) -> f64 {
    severity * monthly_price
}

/// Calibrated financial impact when MAU and ARPU are both supplied.
pub fn financial_impact(
    mau: i64,
    arpu: f64,
    churn_rate_pct: f64,
    avg_quality: f64,
) -> FinancialImpact {
    let at_risk_users = (mau as f64 * (churn_rate_pct / 100.0) * avg_quality) as i64;
    let monthly = at_risk_users as f64 * arpu;
    FinancialImpact {
        at_risk_users,
        monthly_revenue_at_risk: monthly,
        annual_revenue_at_risk: monthly * 12.0,
    }
}

/// Calendar-month bucket key for the incident timeline.
pub fn month_bucket(t: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", t.year(), t.month())
}

/// Chronological order, stable ties by category name.
pub fn sort_churn_events(events: &mut [ChurnRiskEvent]) {
    events.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalItem, ItemKey, RelevanceVerdict, RiskCategory};
    use chrono::TimeZone;

    fn classified(
        text: &str,
        sentiment: SentimentLabel,
        confidence: f64,
        quality: f64,
    ) -> ClassifiedItem {
        ClassifiedItem {
            item: CanonicalItem {
                text: text.to_string(),
                source: SourceId::Reddit,
                engagement: 0,
                members: vec![ItemKey {
                    source: SourceId::Reddit,
                    source_key: "k".to_string(),
                }],
                cluster_confidence: 1.0,
                first_seen: None,
            },
            verdict: RelevanceVerdict::Kept,
            sentiment,
            sentiment_confidence: confidence,
            quality,
        }
    }

    fn priority(gap: &str, impact: u8, confidence: u8, ease: u8) -> PriorityItem {
        PriorityItem {
            gap: gap.to_string(),
            impact,
            confidence,
            ease,
            ice_score: 0,
            rank: 0,
            evidence_quote: None,
            first_mentioned: None,
        }
    }

    #[test]
    fn quality_monotone_in_engagement() {
        let text = "a review that is comfortably longer than fifty characters in total";
        let mut prev = 0.0;
        for engagement in 0..30 {
            let score = quality_score(text, engagement, 0.9);
            assert!(
                score >= prev,
                "quality dropped at engagement {engagement}: {score} < {prev}"
            );
            prev = score;
        }
    }

    #[test]
    fn quality_engagement_saturates_at_ten() {
        let text = "short";
        assert_eq!(
            quality_score(text, 10, 1.0),
            quality_score(text, 10_000, 1.0)
        );
    }

    #[test]
    fn quality_length_bonus_applies() {
        let long = "x".repeat(60);
        let short = "x".repeat(10);
        assert!(quality_score(&long, 0, 1.0) > quality_score(&short, 0, 1.0));
    }

    #[test]
    fn quality_bounded() {
        let long = "y".repeat(500);
        let score = quality_score(&long, 1_000, 5.0);
        assert!(score <= 1.0);
        assert!(quality_score("", 0, 0.0) >= 0.0);
    }

    #[test]
    fn sentiment_all_positive_scores_ten() {
        let items = vec![
            classified("great", SentimentLabel::Positive, 0.9, 0.8),
            classified("love it", SentimentLabel::Positive, 0.8, 0.7),
        ];
        let agg = aggregate_sentiment(&items);
        assert!((agg.weighted_score - 10.0).abs() < 1e-9);
        assert_eq!(agg.overall_label, SentimentLabel::Positive);
        assert_eq!(agg.positive_pct, 100.0);
    }

    #[test]
    fn sentiment_empty_is_neutral_five() {
        let agg = aggregate_sentiment(&[]);
        assert_eq!(agg.weighted_score, 5.0);
        assert_eq!(agg.overall_label, SentimentLabel::Neutral);
        assert_eq!(agg.total, 0);
    }

    #[test]
    fn sentiment_high_quality_negative_outweighs_low_quality_positive() {
        let items = vec![
            classified("bad", SentimentLabel::Negative, 0.9, 0.9),
            classified("fine", SentimentLabel::Positive, 0.3, 0.2),
        ];
        let agg = aggregate_sentiment(&items);
        assert!(agg.weighted_score < 5.0, "score {}", agg.weighted_score);
    }

    #[test]
    fn aspects_detected_from_keywords() {
        let aspects = detect_aspects("The pricing is insane and the UI is confusing");
        assert!(aspects.contains(&Aspect::Pricing));
        assert!(aspects.contains(&Aspect::Ux));
        assert!(!aspects.contains(&Aspect::Support));
    }

    #[test]
    fn aspect_breakdown_buckets_by_keyword() {
        let items = vec![
            classified(
                "The pricing is way too expensive",
                SentimentLabel::Negative,
                0.9,
                0.8,
            ),
            classified("support was wonderful", SentimentLabel::Positive, 0.9, 0.8),
        ];
        let breakdown = aspect_breakdown(&items);
        let pricing = breakdown
            .iter()
            .find(|a| a.aspect == Aspect::Pricing)
            .unwrap();
        let support = breakdown
            .iter()
            .find(|a| a.aspect == Aspect::Support)
            .unwrap();
        assert!(pricing.score < 1.0);
        assert!(support.score > 9.0);
        assert_eq!(pricing.mention_count, 1);
    }

    #[test]
    fn ice_clamps_factors() {
        assert_eq!(ice_score(0, 5, 5), 25); // impact clamped up to 1
        assert_eq!(ice_score(15, 10, 10), 1000);
    }

    #[test]
    fn ranking_is_total_and_order_independent() {
        let a = priority("export is broken", 9, 8, 4);
        let b = priority("no dark mode", 3, 9, 9);
        let c = priority("slow search", 9, 8, 4); // same ICE as `a`, tie-broken by gap

        let ranked1 = rank_priorities(vec![a.clone(), b.clone(), c.clone()]);
        let ranked2 = rank_priorities(vec![c, b, a]);

        let gaps1: Vec<_> = ranked1.iter().map(|p| p.gap.clone()).collect();
        let gaps2: Vec<_> = ranked2.iter().map(|p| p.gap.clone()).collect();
        assert_eq!(gaps1, gaps2);
        assert_eq!(ranked1[0].rank, 1);
        assert_eq!(ranked1[2].rank, 3);
        // Descending ICE order.
        assert!(ranked1[0].ice_score >= ranked1[1].ice_score);
    }

    #[test]
    fn ranking_ties_prefer_earlier_first_mention() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let mut early = priority("gap a", 5, 5, 5);
        early.first_mentioned = Some(t1);
        let mut late = priority("gap b", 5, 5, 5);
        late.first_mentioned = Some(t2);

        let ranked = rank_priorities(vec![late, early]);
        assert_eq!(ranked[0].gap, "gap a");
    }

    #[test]
    fn risk_amount_round_trips_exactly() {
        let severity = 0.37;
        let price = 49.99;
        let amount = revenue_risk(severity, price);
        assert_eq!(amount, severity * price);
    }

    #[test]
    fn severity_is_weighted_negative_share() {
        assert_eq!(severity_score(0.0, 0.0), 0.0);
        assert_eq!(severity_score(1.0, 2.0), 0.5);
        assert_eq!(severity_score(5.0, 2.0), 1.0); // clamped
    }

    #[test]
    fn churn_keywords_detected() {
        let found = churn_keywords_in("I cancelled and I'm switching to a rival");
        assert!(found.contains(&"cancelled"));
        assert!(found.contains(&"switching"));
        assert!(churn_keywords_in("works fine").is_empty());
    }

    #[test]
    fn financial_impact_math() {
        let fi = financial_impact(10_000, 20.0, 5.0, 0.8);
        assert_eq!(fi.at_risk_users, 400);
        assert_eq!(fi.monthly_revenue_at_risk, 8_000.0);
        assert_eq!(fi.annual_revenue_at_risk, 96_000.0);
    }

    #[test]
    fn churn_events_sort_chronologically_then_by_category() {
        let t1 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut events = vec![
            ChurnRiskEvent {
                category: RiskCategory::Support,
                severity: 0.2,
                monthly_revenue_at_risk: 10.0,
                occurred_at: t2,
            },
            ChurnRiskEvent {
                category: RiskCategory::Pricing,
                severity: 0.4,
                monthly_revenue_at_risk: 20.0,
                occurred_at: t1,
            },
            ChurnRiskEvent {
                category: RiskCategory::Bugs,
                severity: 0.6,
                monthly_revenue_at_risk: 30.0,
                occurred_at: t2,
            },
        ];
        sort_churn_events(&mut events);
        assert_eq!(events[0].category, RiskCategory::Pricing);
        assert_eq!(events[1].category, RiskCategory::Bugs);
        assert_eq!(events[2].category, RiskCategory::Support);
    }

    #[test]
    fn month_bucket_format() {
        let t = Utc.with_ymd_and_hms(2026, 5, 17, 12, 0, 0).unwrap();
        assert_eq!(month_bucket(t), "2026-05");
    }
}
