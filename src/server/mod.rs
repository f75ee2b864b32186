//! REST surface for the phone client: food entry intake, today's log,
//! and the LLM assessments.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::{self, SleepAnalysisInput};
use crate::error::Error;
use crate::storage::repository::{self, NewFoodEntry};
use crate::storage::Database;

/// State shared across handlers. The database handle is a pair of
/// pooled connections, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/food_entries", post(create_food_entry))
        .route("/food_entries/today", get(today_food_entries))
        .route("/food_entries/analyze_nutrition", post(analyze_nutrition))
        .route("/health/analyze", post(analyze))
        .route("/up", get(up))
        .with_state(state)
}

/// Wrapped intake body, `{"food_entry": {...}}`.
#[derive(Debug, Deserialize)]
struct CreateFoodEntryBody {
    food_entry: FoodEntryParams,
}

#[derive(Debug, Deserialize)]
struct FoodEntryParams {
    food_name: String,
    protein: f64,
    fat: f64,
    carbs: f64,
    calories: f64,
    #[serde(default)]
    consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Vec<SleepAnalysisInput>>,
}

#[derive(Serialize)]
struct UpResponse {
    status: &'static str,
    version: &'static str,
}

async fn up() -> Json<UpResponse> {
    Json(UpResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn unprocessable(message: impl Into<String>) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn internal(e: Error) -> Response {
    log::error!("Request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

async fn create_food_entry(
    State(state): State<AppState>,
    Json(body): Json<CreateFoodEntryBody>,
) -> Response {
    let params = body.food_entry;
    let entry = NewFoodEntry {
        food_name: params.food_name,
        protein: params.protein,
        fat: params.fat,
        carbs: params.carbs,
        calories: params.calories,
        consumed_at: params.consumed_at.unwrap_or_else(Utc::now),
    };
    if let Err(message) = entry.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "errors": [message] })),
        )
            .into_response();
    }

    match state
        .db
        .writer()
        .call(move |conn| repository::insert_food_entry(conn, &entry))
        .await
    {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => internal(Error::from(e)),
    }
}

async fn today_food_entries(State(state): State<AppState>) -> Response {
    match analysis::today_food_entries(&state.db).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal(e),
    }
}

/// Combined assessment endpoint. `type` selects the analysis; sleep
/// requires the caller to attach its nights in `data`.
async fn analyze(State(state): State<AppState>, Json(body): Json<AnalyzeBody>) -> Response {
    let result = match body.kind.as_str() {
        "nutrition" => match analysis::create_agent(&state.db).await {
            Ok(agent) => analysis::analyze_nutrition(&state.db, &agent).await,
            Err(e) => Err(e),
        },
        "sleep" => {
            let Some(data) = body.data else {
                return unprocessable("睡眠データが提供されていません");
            };
            match analysis::create_agent(&state.db).await {
                Ok(agent) => analysis::analyze_sleep(&data, &agent).await,
                Err(e) => Err(e),
            }
        }
        _ => {
            return unprocessable(
                "無効なタイプです。'nutrition' または 'sleep' を指定してください。",
            );
        }
    };

    match result {
        Ok(text) => Json(json!({ "analysis": text })).into_response(),
        Err(Error::Analysis(message)) => unprocessable(message),
        Err(e) => internal(e),
    }
}

/// Older client path, same behavior as `type = "nutrition"`.
async fn analyze_nutrition(State(state): State<AppState>) -> Response {
    let result = match analysis::create_agent(&state.db).await {
        Ok(agent) => analysis::analyze_nutrition(&state.db, &agent).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(text) => Json(json!({ "analysis": text })).into_response(),
        Err(Error::Analysis(message)) => unprocessable(message),
        Err(e) => internal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state() -> AppState {
        AppState {
            db: Database::open_memory().await.unwrap(),
        }
    }

    fn params(name: &str, calories: f64) -> CreateFoodEntryBody {
        CreateFoodEntryBody {
            food_entry: FoodEntryParams {
                food_name: name.to_string(),
                protein: 20.0,
                fat: 5.0,
                carbs: 10.0,
                calories,
                consumed_at: Some(Utc::now()),
            },
        }
    }

    #[tokio::test]
    async fn test_create_food_entry_created() {
        let state = state().await;
        let response =
            create_food_entry(State(state.clone()), Json(params("鶏むね肉", 150.0))).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let count = state
            .db
            .reader()
            .call(|conn| repository::count_food_entries(conn))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_create_food_entry_rejects_invalid() {
        let state = state().await;
        let mut body = params("", 150.0);
        body.food_entry.food_name = String::new();
        let response = create_food_entry(State(state.clone()), Json(body)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let mut body = params("プロテイン", 120.0);
        body.food_entry.calories = -1.0;
        let response = create_food_entry(State(state), Json(body)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_today_lists_created_entries() {
        let state = state().await;
        create_food_entry(State(state.clone()), Json(params("白米", 250.0))).await;

        let response = today_food_entries(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let entries: Vec<repository::FoodEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].food_name, "白米");
    }

    #[tokio::test]
    async fn test_analyze_rejects_unknown_type_and_missing_sleep_data() {
        let state = state().await;

        let response = analyze(
            State(state.clone()),
            Json(AnalyzeBody {
                kind: "steps".into(),
                data: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = analyze(
            State(state),
            Json(AnalyzeBody {
                kind: "sleep".into(),
                data: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
