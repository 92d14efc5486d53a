use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Reddit,
    HackerNews,
    WebSearch,
    AppStore,
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::Reddit => write!(f, "reddit"),
            SourceId::HackerNews => write!(f, "hacker_news"),
            SourceId::WebSearch => write!(f, "web_search"),
            SourceId::AppStore => write!(f, "app_store"),
        }
    }
}

impl std::error::Error for SourceId {}

impl SourceId {
    pub fn all() -> [SourceId; 4] {
        [
            SourceId::Reddit,
            SourceId::HackerNews,
            SourceId::WebSearch,
            SourceId::AppStore,
        ]
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reddit" => Some(Self::Reddit),
            "hn" | "hackernews" | "hacker_news" => Some(Self::HackerNews),
            "web" | "web_search" | "search" => Some(Self::WebSearch),
            "app_store" | "appstore" => Some(Self::AppStore),
            _ => None,
        }
    }
}

// --- Raw feedback ---

/// One piece of raw user feedback as collected from a source.
/// Identity is `(source, source_key)`; immutable once collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub source: SourceId,
    /// Source-specific unique key (URL, post id).
    pub source_key: String,
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
    /// Engagement weight: upvotes, points, rating count.
    pub engagement: u32,
    pub author: Option<String>,
    pub platform: String,
}

impl ReviewItem {
    pub fn identity(&self) -> ItemKey {
        ItemKey {
            source: self.source,
            source_key: self.source_key.clone(),
        }
    }
}

/// The `(source, source_key)` identity of a ReviewItem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub source: SourceId,
    pub source_key: String,
}

// --- Canonical (deduplicated) feedback ---

/// One or more ReviewItems merged by the dedup engine.
/// Never mutated after creation within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalItem {
    /// Representative text: longest member, ties broken by earliest timestamp.
    pub text: String,
    pub source: SourceId,
    /// Combined engagement weight across all members.
    pub engagement: u32,
    /// Identities of every merged member; first entry is the representative.
    pub members: Vec<ItemKey>,
    /// Average pairwise similarity within the cluster; 1.0 for singletons.
    pub cluster_confidence: f64,
    pub first_seen: Option<DateTime<Utc>>,
}

impl CanonicalItem {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

// --- Classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Numeric value used by weighted aggregation.
    pub fn value(&self) -> f64 {
        match self {
            SentimentLabel::Positive => 1.0,
            SentimentLabel::Neutral => 0.5,
            SentimentLabel::Negative => 0.0,
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SentimentLabel::Positive => write!(f, "positive"),
            SentimentLabel::Neutral => write!(f, "neutral"),
            SentimentLabel::Negative => write!(f, "negative"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Spam,
    TooShort,
    OffTopic,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Spam => write!(f, "spam"),
            RejectReason::TooShort => write!(f, "too_short"),
            RejectReason::OffTopic => write!(f, "off_topic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RelevanceVerdict {
    Kept,
    Rejected { reason: RejectReason },
}

impl RelevanceVerdict {
    pub fn is_kept(&self) -> bool {
        matches!(self, RelevanceVerdict::Kept)
    }
}

/// A CanonicalItem after classification. Rejected items are retained with
/// their reason so every input's fate stays reconstructible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub item: CanonicalItem,
    pub verdict: RelevanceVerdict,
    pub sentiment: SentimentLabel,
    /// Classifier confidence in the sentiment label, 0.0-1.0.
    pub sentiment_confidence: f64,
    /// Quality score, 0.0-1.0.
    pub quality: f64,
}

// --- Jobs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Collecting,
    Classifying,
    Analyzing,
    Rendering,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Collecting => "collecting",
            JobState::Classifying => "classifying",
            JobState::Analyzing => "analyzing",
            JobState::Rendering => "rendering",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "collecting" => Some(Self::Collecting),
            "classifying" => Some(Self::Classifying),
            "analyzing" => Some(Self::Analyzing),
            "rendering" => Some(Self::Rendering),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A research job. Owned exclusively by the worker running it; read-only to
/// external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub product_name: String,
    /// Monthly active users, used to calibrate revenue-risk numbers.
    pub mau: Option<i64>,
    /// Average revenue per user per month.
    pub arpu: Option<f64>,
    /// Preferred sources; None means all configured sources.
    pub sources: Option<Vec<SourceId>>,
    pub state: JobState,
    /// 0-100, monotonically non-decreasing; reaches 100 only in `done`.
    pub progress: i16,
    /// Human-readable description of the current stage.
    pub stage: String,
    pub error: Option<String>,
    pub result: Option<AnalysisResult>,
    /// Full classified item set, written once after classification. Together
    /// with each item's member list this reconstructs every input item's
    /// fate: merged, kept, or rejected (with reason).
    pub items: Option<Vec<ClassifiedItem>>,
    pub report_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry in a job's append-only state-transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTransition {
    pub job_id: Uuid,
    pub seq: i32,
    pub state: JobState,
    pub progress: i16,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Terminal result of running a job through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Done,
    Failed,
    Cancelled,
}

// --- Analysis result ---

/// Aggregated output of the analysis stage. Each section is produced by an
/// independent agent; a failed agent leaves its section as None.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: Option<SentimentReport>,
    pub priorities: Option<PriorityReport>,
    pub competitors: Option<CompetitorReport>,
    pub risk: Option<RiskReport>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.sentiment.is_none()
            && self.priorities.is_none()
            && self.competitors.is_none()
            && self.risk.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    Significant,
    Critical,
}

/// Feature category used for aspect-level sentiment buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Pricing,
    Performance,
    Reliability,
    Support,
    Features,
    Ux,
}

impl Aspect {
    pub fn all() -> [Aspect; 6] {
        [
            Aspect::Pricing,
            Aspect::Performance,
            Aspect::Reliability,
            Aspect::Support,
            Aspect::Features,
            Aspect::Ux,
        ]
    }
}

impl std::fmt::Display for Aspect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aspect::Pricing => write!(f, "pricing"),
            Aspect::Performance => write!(f, "performance"),
            Aspect::Reliability => write!(f, "reliability"),
            Aspect::Support => write!(f, "support"),
            Aspect::Features => write!(f, "features"),
            Aspect::Ux => write!(f, "ux"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectSentiment {
    pub aspect: Aspect,
    /// Weighted sentiment for this aspect, 0-10.
    pub score: f64,
    pub mention_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentReport {
    /// Weighted aggregate score, 0-10.
    pub weighted_score: f64,
    pub overall_label: SentimentLabel,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    pub total: u32,
    pub aspects: Vec<AspectSentiment>,
    pub market_position: String,
    pub revenue_risk_level: RiskLevel,
}

/// A ranked gap/issue. The ICE sub-factors are stored alongside the score so
/// the ranking is independently auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityItem {
    pub gap: String,
    /// 1-10.
    pub impact: u8,
    /// 1-10.
    pub confidence: u8,
    /// 1-10.
    pub ease: u8,
    pub ice_score: u32,
    /// 1-based rank, assigned after sorting.
    pub rank: u32,
    pub evidence_quote: Option<String>,
    pub first_mentioned: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TechnicalGap {
    pub gap: String,
    pub impact: String,
    pub suggested_fix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityReport {
    pub items: Vec<PriorityItem>,
    pub technical_gaps: Vec<TechnicalGap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    HighConfidence,
    MediumConfidence,
    LowConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorReport {
    pub competitor_name: String,
    /// Metric names; scores arrays are index-aligned with this.
    pub metrics: Vec<String>,
    pub our_scores: Vec<u8>,
    pub competitor_scores: Vec<u8>,
    pub data_quality: DataQuality,
    pub key_differentiators: Vec<String>,
    /// All competitor names surfaced in the feedback.
    pub discovered: Vec<String>,
}

/// Category used for churn-risk bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Pricing,
    Bugs,
    Support,
    Features,
}

impl RiskCategory {
    pub fn all() -> [RiskCategory; 4] {
        [
            RiskCategory::Pricing,
            RiskCategory::Bugs,
            RiskCategory::Support,
            RiskCategory::Features,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Pricing => "pricing",
            RiskCategory::Bugs => "bugs",
            RiskCategory::Support => "support",
            RiskCategory::Features => "features",
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected churn-risk signal with its estimated revenue impact.
/// `monthly_revenue_at_risk` is always `severity * estimated_monthly_price`
/// of the containing report, with no hidden adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnRiskEvent {
    pub category: RiskCategory,
    /// 0.0-1.0.
    pub severity: f64,
    pub monthly_revenue_at_risk: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// Calendar period, e.g. "2026-05".
    pub period: String,
    pub incident_count: u32,
    pub dominant_sentiment: SentimentLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialImpact {
    pub at_risk_users: i64,
    pub monthly_revenue_at_risk: f64,
    pub annual_revenue_at_risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub churn_events: Vec<ChurnRiskEvent>,
    pub timeline: Vec<TimelineBucket>,
    pub estimated_monthly_price: f64,
    /// Present only when MAU and ARPU were supplied.
    pub financial_impact: Option<FinancialImpact>,
    pub churn_signal_count: u32,
    pub churn_rate_pct: f64,
    pub summary: String,
}

/// Reference to a rendered report artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_terminal_set() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Analyzing.is_terminal());
    }

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [
            JobState::Queued,
            JobState::Collecting,
            JobState::Classifying,
            JobState::Analyzing,
            JobState::Rendering,
            JobState::Done,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(JobState::from_str_loose(state.as_str()), Some(state));
        }
    }

    #[test]
    fn sentiment_values() {
        assert_eq!(SentimentLabel::Positive.value(), 1.0);
        assert_eq!(SentimentLabel::Neutral.value(), 0.5);
        assert_eq!(SentimentLabel::Negative.value(), 0.0);
    }

    #[test]
    fn verdict_serializes_tagged() {
        let kept = serde_json::to_value(RelevanceVerdict::Kept).unwrap();
        assert_eq!(kept["verdict"], "kept");
        let rejected = serde_json::to_value(RelevanceVerdict::Rejected {
            reason: RejectReason::Spam,
        })
        .unwrap();
        assert_eq!(rejected["verdict"], "rejected");
        assert_eq!(rejected["reason"], "spam");
    }

    #[test]
    fn source_id_from_str_loose() {
        assert_eq!(SourceId::from_str_loose("hn"), Some(SourceId::HackerNews));
        assert_eq!(SourceId::from_str_loose("Reddit"), Some(SourceId::Reddit));
        assert_eq!(SourceId::from_str_loose("gopher"), None);
    }
}
