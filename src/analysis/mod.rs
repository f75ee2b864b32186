//! LLM-backed assessments of the day's diet and recent sleep.

pub mod prompts;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::date_util::{logical_day_bounds, today_logical};
use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

/// One night of sleep handed to the sleep assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepAnalysisInput {
    pub date: String,
    pub duration_hours: f64,
    #[serde(default)]
    pub fall_asleep_minutes: Option<u32>,
    #[serde(default)]
    pub efficiency_pct: Option<f64>,
}

/// Create a mixtape Agent configured from the database's LLM settings.
pub async fn create_agent(db: &Database) -> Result<mixtape_core::Agent> {
    let (provider, model) = db
        .reader()
        .call(|conn| {
            let provider = repository::get_config(conn, "llm_provider")?;
            let model = repository::get_config(conn, "llm_model")?;
            Ok::<(Option<String>, Option<String>), rusqlite::Error>((provider, model))
        })
        .await?;

    let provider = provider.as_deref().unwrap_or("bedrock");
    let model_name = model.as_deref().unwrap_or("claude-sonnet-4-5");

    build_agent(provider, model_name).await
}

async fn build_agent(provider: &str, model_name: &str) -> Result<mixtape_core::Agent> {
    // Each combination needs its own builder call since the model types are different.
    match (provider, model_name) {
        ("bedrock", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("bedrock", _) => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", _) => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        (other, _) => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

/// Food eaten today, by the logical-day clock.
pub async fn today_food_entries(db: &Database) -> Result<Vec<repository::FoodEntry>> {
    let cutoff = db
        .reader()
        .call(|conn| repository::get_cutoff_hour(conn))
        .await?;
    let today = today_logical(cutoff, &Local);
    let (start, end) = logical_day_bounds(today, cutoff, &Local).ok_or_else(|| {
        Error::Analysis(format!("could not compute day bounds for {today}"))
    })?;
    let (start, end) = (start.to_utc(), end.to_utc());
    Ok(db
        .reader()
        .call(move |conn| repository::list_food_entries_between(conn, &start, &end))
        .await?)
}

/// Assess today's nutrition from the logged food entries.
///
/// An empty day is an error the caller can show verbatim; the model is
/// never called without data.
pub async fn analyze_nutrition(db: &Database, agent: &mixtape_core::Agent) -> Result<String> {
    let entries = today_food_entries(db).await?;
    if entries.is_empty() {
        return Err(Error::Analysis("今日の食事記録がありません".into()));
    }

    let prompt = prompts::nutrition_prompt(&entries);
    let response = agent
        .run(&prompt)
        .await
        .map_err(|e| Error::Llm(e.to_string()))?;
    Ok(response.text().trim().to_string())
}

/// Assess the given nights of sleep. The caller supplies the data,
/// typically read from recent sleep summaries.
pub async fn analyze_sleep(
    data: &[SleepAnalysisInput],
    agent: &mixtape_core::Agent,
) -> Result<String> {
    if data.is_empty() {
        return Err(Error::Analysis("睡眠データが提供されていません".into()));
    }

    let prompt = prompts::sleep_prompt(data);
    let response = agent
        .run(&prompt)
        .await
        .map_err(|e| Error::Llm(e.to_string()))?;
    Ok(response.text().trim().to_string())
}
