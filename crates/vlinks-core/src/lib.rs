//! Core domain model for VentriLinks: remote record rows, the local VC/match schema
//! and the client-facing views served from it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "vlinks-core";

/// Logical tables in the remote record store.
pub mod tables {
    pub const STARTUP_SUBMISSIONS: &str = "Startup Submissions";
    pub const VC_DATABASE: &str = "VC Database";
    pub const MATCHES: &str = "Startup-VC Matches (POST GPT PRE-SCAN)";
    pub const PREMIUM_APPLICATIONS: &str = "Premium Support Applications";
}

pub mod vc_fields {
    pub const NAME: &str = "VC/Investor Name";
    pub const FIRM: &str = "Firm";
    pub const FIRM_NAME: &str = "Firm Name";
    pub const EMAIL: &str = "Email";
    pub const PHONE: &str = "Phone";
    pub const LINKEDIN: &str = "LinkedIn";
    pub const WEBSITE_URL: &str = "Website URL";
    pub const WEBSITE: &str = "Website";
    pub const WEBSITE_LOWER: &str = "website";
    pub const INVESTMENT_FOCUS: &str = "Investment Focus";
    pub const INVESTMENT_STAGE: &str = "Investment Stage";
    pub const GEOGRAPHY: &str = "Geography";
    pub const PORTFOLIO_SIZE: &str = "Portfolio Size";
    pub const DESCRIPTION: &str = "Description";
}

pub mod match_fields {
    pub const STARTUP: &str = "Startup";
    pub const VC_INVESTOR: &str = "VC Investor";
    pub const STARTUP_EMAIL: &str = "Startup Email";
    pub const CLIENT_ACCESS: &str = "Client Access";
    pub const MATCH_REASONING: &str = "Match Reasoning";
    pub const PORTFOLIO_REASONING: &str = "Match Reasoning (Portfolio)";
    pub const NOTES: &str = "Notes";
    pub const ASSIGNED_AT: &str = "Assigned At";
    pub const OUTREACH_STATUS: &str = "Outreach Status";
    pub const OUTREACH_NOTES: &str = "Outreach Notes";
    pub const LAST_UPDATED: &str = "Last Updated";
    pub const STARTUP_SAYS_GOOD: &str = "Startup Says Good";
    pub const STARTUP_FEEDBACK: &str = "Startup Feedback";
}

pub mod startup_fields {
    pub const STARTUP_NAME: &str = "Startup Name";
    pub const EMAIL: &str = "Email";
    pub const OVERALL_SCORE: &str = "Overall Score";
    pub const TECHNOLOGY_SCORE: &str = "Technology Score";
    pub const MARKET_SCORE: &str = "Market Score";
    pub const TEAM_SCORE: &str = "Team Score";
    pub const TECHNOLOGY_REASONING: &str = "Technology Score Reasoning";
    pub const MARKET_REASONING: &str = "Market Score Reasoning";
    pub const TEAM_REASONING: &str = "Team Score Reasoning";
    pub const ANALYSIS_SUMMARY: &str = "AI Analysis Summary";
    pub const COMPETITIVE_DIFFERENTIATION: &str = "Competitive Differentiation";
    pub const INVESTMENT_THESIS: &str = "Investment Thesis";
    pub const THERAPEUTIC_FOCUS: &str = "AI Detected Therapeutic Focus";
}

pub type FieldMap = BTreeMap<String, JsonValue>;

/// A row as returned by the remote record store. Field presence is never guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(
        default,
        rename = "createdTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: FieldMap,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }

    /// Field lookup tolerant of stray whitespace in the remote column name.
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        if let Some(value) = self.fields.get(name) {
            return Some(value);
        }
        let wanted = collapse_whitespace(name);
        self.fields
            .iter()
            .find(|(key, _)| collapse_whitespace(key) == wanted)
            .map(|(_, value)| value)
    }

    /// Stringified field value; absent, null and blank values are `None`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name)
            .and_then(json_to_text)
            .filter(|s| !s.trim().is_empty())
    }

    /// First linked record id (linked fields arrive as arrays of ids).
    pub fn linked_id(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            JsonValue::Array(items) => items
                .iter()
                .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
                .map(ToString::to_string),
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

fn json_to_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => {
            let parts = items.iter().filter_map(json_to_text).collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        JsonValue::Object(_) => Some(value.to_string()),
    }
}

/// Trim and collapse every internal whitespace run to a single space.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Local VC directory row. `external_id` is the only join key; `name` may collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcInvestor {
    pub external_id: String,
    pub name: String,
    pub firm: String,
    pub email: String,
    pub phone: String,
    pub linkedin: String,
    pub website: Option<String>,
    pub investment_focus: String,
    pub investment_stage: String,
    pub geography: String,
    pub portfolio_size: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    NotContacted,
    EmailSent,
    EmailOpened,
    Responded,
    MeetingScheduled,
    MeetingCompleted,
    DealInProgress,
    DealClosed,
    Passed,
}

impl OutreachStatus {
    pub const ALL: [OutreachStatus; 9] = [
        OutreachStatus::NotContacted,
        OutreachStatus::EmailSent,
        OutreachStatus::EmailOpened,
        OutreachStatus::Responded,
        OutreachStatus::MeetingScheduled,
        OutreachStatus::MeetingCompleted,
        OutreachStatus::DealInProgress,
        OutreachStatus::DealClosed,
        OutreachStatus::Passed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutreachStatus::NotContacted => "not_contacted",
            OutreachStatus::EmailSent => "email_sent",
            OutreachStatus::EmailOpened => "email_opened",
            OutreachStatus::Responded => "responded",
            OutreachStatus::MeetingScheduled => "meeting_scheduled",
            OutreachStatus::MeetingCompleted => "meeting_completed",
            OutreachStatus::DealInProgress => "deal_in_progress",
            OutreachStatus::DealClosed => "deal_closed",
            OutreachStatus::Passed => "passed",
        }
    }
}

impl fmt::Display for OutreachStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct InvalidVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for OutreachStatus {
    type Err = InvalidVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutreachStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| InvalidVariant {
                kind: "outreach status",
                value: s.to_string(),
            })
    }
}

/// Closed set of client verdicts on a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchQuality {
    #[serde(rename = "Good Match")]
    GoodMatch,
    #[serde(rename = "Maybe")]
    Maybe,
    #[serde(rename = "Not Sure")]
    NotSure,
    #[serde(rename = "Poor Match")]
    PoorMatch,
}

impl MatchQuality {
    pub const ALL: [MatchQuality; 4] = [
        MatchQuality::GoodMatch,
        MatchQuality::Maybe,
        MatchQuality::NotSure,
        MatchQuality::PoorMatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchQuality::GoodMatch => "Good Match",
            MatchQuality::Maybe => "Maybe",
            MatchQuality::NotSure => "Not Sure",
            MatchQuality::PoorMatch => "Poor Match",
        }
    }
}

impl FromStr for MatchQuality {
    type Err = InvalidVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchQuality::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| InvalidVariant {
                kind: "match quality",
                value: s.to_string(),
            })
    }
}

/// Local match row; visible to the client only when `client_access` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMatch {
    pub id: String,
    pub client_id: String,
    pub vc_investor_id: String,
    pub match_reasoning: String,
    pub portfolio_reasoning: String,
    pub client_access: bool,
    pub assigned_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub outreach_status: OutreachStatus,
    pub outreach_notes: Option<String>,
}

/// VC half of a joined match. Every field is null when the join target is missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcInvestorView {
    pub id: Option<String>,
    pub name: Option<String>,
    pub firm: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    pub website: Option<String>,
    pub investment_focus: Option<String>,
    pub investment_stage: Option<String>,
    pub geography: Option<String>,
    pub portfolio_size: Option<String>,
    pub description: Option<String>,
}

impl From<VcInvestor> for VcInvestorView {
    fn from(vc: VcInvestor) -> Self {
        Self {
            id: Some(vc.external_id),
            name: Some(vc.name),
            firm: Some(vc.firm),
            email: Some(vc.email),
            phone: Some(vc.phone),
            linkedin: Some(vc.linkedin),
            website: vc.website,
            investment_focus: Some(vc.investment_focus),
            investment_stage: Some(vc.investment_stage),
            geography: Some(vc.geography),
            portfolio_size: Some(vc.portfolio_size),
            description: Some(vc.description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMatchView {
    pub id: String,
    pub is_unlocked: bool,
    pub assigned_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub vc_name: Option<String>,
    pub match_reasoning: String,
    pub portfolio_reasoning: String,
    pub outreach_status: OutreachStatus,
    pub outreach_notes: Option<String>,
    pub vc_investor: VcInvestorView,
}

impl ClientMatchView {
    /// Left-join semantics: a dangling `vc_investor_id` yields an all-null `vc_investor`.
    pub fn from_join(client_match: ClientMatch, vc: Option<VcInvestor>) -> Self {
        let vc_investor = vc.map(VcInvestorView::from).unwrap_or_default();
        Self {
            id: client_match.id,
            is_unlocked: client_match.client_access,
            assigned_at: client_match.assigned_at,
            notes: client_match.notes,
            vc_name: vc_investor.name.clone(),
            match_reasoning: client_match.match_reasoning,
            portfolio_reasoning: client_match.portfolio_reasoning,
            outreach_status: client_match.outreach_status,
            outreach_notes: client_match.outreach_notes,
            vc_investor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistSignup {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// VC whose website could not be resolved, with the nearest fallback-table name if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingWebsite {
    pub external_id: String,
    pub name: String,
    pub closest_fallback_name: Option<String>,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub total_vcs: usize,
    pub with_remote_website: usize,
    pub with_fallback_only: usize,
    pub without_website: usize,
    pub website_completion_rate: u32,
    pub missing: Vec<MissingWebsite>,
    pub generated_at: DateTime<Utc>,
}

/// `round(100 * resolved / total)` with round-half-up; zero when `total` is zero.
pub fn completion_rate(resolved: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let resolved = resolved.min(total) as u64;
    let total = total as u64;
    ((200 * resolved + total) / (2 * total)) as u32
}

/// Outcome of a write that targets the remote store. `persisted` is false when the
/// service acknowledged the request locally but the remote write did not land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWrite<T> {
    pub persisted: bool,
    #[serde(flatten)]
    pub value: T,
}

impl<T> RemoteWrite<T> {
    pub fn persisted(value: T) -> Self {
        Self {
            persisted: true,
            value,
        }
    }

    pub fn not_persisted(value: T) -> Self {
        Self {
            persisted: false,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAck {
    pub match_id: String,
    pub match_quality: MatchQuality,
    pub feedback_text: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachUpdate {
    pub match_id: String,
    pub status: OutreachStatus,
    pub last_updated: String,
    pub notes: Option<String>,
}
