use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use vlinks_core::{tables, FieldMap};
use vlinks_storage::{FetchError, RecordStore};

const MAX_PRIORITY: u8 = 10;
const HIGH_VALUE_INDUSTRIES: [&str; 4] = ["oncology", "immunology", "rare-diseases", "neurology"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PremiumApplication {
    pub company_name: String,
    pub founder_name: String,
    pub email: String,
    pub phone: String,
    pub linkedin_profile: String,
    pub current_stage: String,
    pub funding_goal: String,
    pub previous_funding_raised: String,
    pub current_revenue: String,
    pub team_size: String,
    pub industry_focus: String,
    pub pitch_deck_status: String,
    pub fundraising_timeline: String,
    pub specific_challenges: String,
    pub why_premium_support: String,
    pub additional_info: String,
}

#[derive(Debug, Error)]
pub enum PremiumError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

impl PremiumApplication {
    pub fn validate(&self) -> Result<(), PremiumError> {
        for (value, name) in [
            (&self.company_name, "companyName"),
            (&self.founder_name, "founderName"),
            (&self.email, "email"),
        ] {
            if value.trim().is_empty() {
                return Err(PremiumError::Missing(name));
            }
        }
        Ok(())
    }
}

fn stage_points(stage: &str) -> u8 {
    match stage {
        "pre-seed" => 1,
        "seed" => 2,
        "series-a" => 4,
        "series-b" | "series-c" => 5,
        _ => 0,
    }
}

fn funding_points(goal: &str) -> u8 {
    let goal = goal.to_lowercase();
    if !goal.contains('m') {
        return 0;
    }
    let digits = goal.chars().filter(char::is_ascii_digit).collect::<String>();
    let amount = digits
        .parse::<u64>()
        .ok()
        .or_else(|| (!digits.is_empty()).then_some(u64::MAX));
    match amount {
        Some(10..=100) => 3,
        Some(n) if n >= 5 => 2,
        _ => 1,
    }
}

fn timeline_points(timeline: &str) -> u8 {
    match timeline {
        "immediate" => 3,
        "short-term" => 2,
        "medium-term" => 1,
        _ => 0,
    }
}

fn pitch_deck_points(status: &str) -> u8 {
    match status {
        "needs-refinement" => 3,
        "ready-to-present" | "first-draft" => 2,
        "not-started" => 1,
        _ => 0,
    }
}

/// Bounded triage score in `0..=10`.
pub fn priority_score(app: &PremiumApplication) -> u8 {
    let industry = if HIGH_VALUE_INDUSTRIES.contains(&app.industry_focus.as_str()) {
        2
    } else {
        0
    };
    let total = stage_points(&app.current_stage)
        + funding_points(&app.funding_goal)
        + industry
        + timeline_points(&app.fundraising_timeline)
        + pitch_deck_points(&app.pitch_deck_status);
    total.min(MAX_PRIORITY)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumReceipt {
    pub application_id: String,
    pub table: String,
    pub priority_score: u8,
}

fn application_fields(app: &PremiumApplication, score: u8, submitted_at: &str) -> FieldMap {
    let pairs = [
        ("Company Name", json!(app.company_name)),
        ("Founder Name", json!(app.founder_name)),
        ("Email", json!(app.email)),
        ("Phone", json!(app.phone)),
        ("LinkedIn Profile", json!(app.linkedin_profile)),
        ("Current Stage", json!(app.current_stage)),
        ("Funding Goal", json!(app.funding_goal)),
        ("Previous Funding Raised", json!(app.previous_funding_raised)),
        ("Current Revenue", json!(app.current_revenue)),
        ("Team Size", json!(app.team_size)),
        ("Industry Focus", json!(app.industry_focus)),
        ("Pitch Deck Status", json!(app.pitch_deck_status)),
        ("Fundraising Timeline", json!(app.fundraising_timeline)),
        ("Specific Challenges", json!(app.specific_challenges)),
        ("Why Premium Support", json!(app.why_premium_support)),
        ("Additional Info", json!(app.additional_info)),
        ("Application Status", json!("Under Review")),
        ("Submitted At", json!(submitted_at)),
        ("Priority Score", json!(score)),
    ];
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Condensed shape written to the submissions table when the dedicated table is unreachable.
fn submission_fields(app: &PremiumApplication, submitted_at: &str) -> FieldMap {
    let notes = format!(
        "PREMIUM SUPPORT APPLICATION\n\nChallenges: {}\n\nWhy Premium: {}\n\n\
         Timeline: {}\n\nPitch Deck Status: {}",
        app.specific_challenges,
        app.why_premium_support,
        app.fundraising_timeline,
        app.pitch_deck_status
    );
    let pairs = [
        ("Startup Name", json!(app.company_name)),
        ("Contact Name", json!(app.founder_name)),
        ("Email", json!(app.email)),
        ("Phone", json!(app.phone)),
        ("Application Type", json!("Premium Support")),
        ("Stage", json!(app.current_stage)),
        ("Funding Goal", json!(app.funding_goal)),
        ("Industry Focus", json!(app.industry_focus)),
        ("Additional Notes", json!(notes)),
        ("Submitted At", json!(submitted_at)),
    ];
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub async fn submit_premium_application(
    records: &dyn RecordStore,
    app: &PremiumApplication,
    now: DateTime<Utc>,
) -> Result<PremiumReceipt, PremiumError> {
    app.validate()?;
    let score = priority_score(app);
    let submitted_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    let (record, table) = match records
        .create(tables::PREMIUM_APPLICATIONS, application_fields(app, score, &submitted_at))
        .await
    {
        Ok(record) => (record, tables::PREMIUM_APPLICATIONS),
        Err(err) if err.is_transport() => {
            warn!(error = %err, "premium table unreachable; writing to submissions table");
            let record = records
                .create(tables::STARTUP_SUBMISSIONS, submission_fields(app, &submitted_at))
                .await?;
            (record, tables::STARTUP_SUBMISSIONS)
        }
        Err(err) => return Err(err.into()),
    };

    info!(company = %app.company_name, score, table, "premium support application stored");
    Ok(PremiumReceipt {
        application_id: record.id,
        table: table.to_string(),
        priority_score: score,
    })
}
