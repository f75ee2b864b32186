//! Prompt builders for the diet and sleep assessments. The prompts are
//! in Japanese, matching the audience the advice is written for.

use crate::storage::repository::FoodEntry;

use super::SleepAnalysisInput;

pub fn nutrition_prompt(entries: &[FoodEntry]) -> String {
    let total_calories: f64 = entries.iter().map(|e| e.calories).sum();
    let total_protein: f64 = entries.iter().map(|e| e.protein).sum();
    let total_fat: f64 = entries.iter().map(|e| e.fat).sum();
    let total_carbs: f64 = entries.iter().map(|e| e.carbs).sum();

    let food_list = entries
        .iter()
        .map(|e| format!("{}({}kcal)", e.food_name, e.calories))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "今日摂取した食事の栄養バランスを評価してください。\n\
         \n\
         【摂取した食事】\n\
         {food_list}\n\
         \n\
         【合計栄養素】\n\
         - カロリー: {total_calories}kcal\n\
         - タンパク質: {total_protein}g\n\
         - 脂質: {total_fat}g\n\
         - 炭水化物: {total_carbs}g\n\
         \n\
         【評価してほしい内容】\n\
         1. 栄養バランスの評価（良い点・改善点）\n\
         2. 不足している栄養素があれば指摘\n\
         3. 今後の食事に対する具体的なアドバイス\n\
         \n\
         300文字程度で分かりやすく回答してください。"
    )
}

pub fn sleep_prompt(data: &[SleepAnalysisInput]) -> String {
    let lines = data
        .iter()
        .map(|d| {
            let fall_asleep = d
                .fall_asleep_minutes
                .map(|m| m.to_string())
                .unwrap_or_else(|| "不明".into());
            let efficiency = d
                .efficiency_pct
                .map(|p| format!("{p:.0}"))
                .unwrap_or_else(|| "不明".into());
            format!(
                "日付: {}, 睡眠時間: {:.1}時間, 寝付き時間: {}分, 睡眠効率: {}%",
                d.date, d.duration_hours, fall_asleep, efficiency
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "以下の睡眠データを分析して、睡眠の質や改善点について評価してください。\n\
         \n\
         【睡眠データ】\n\
         {lines}\n\
         \n\
         【評価してほしい内容】\n\
         1. 睡眠時間・質の評価\n\
         2. 改善すべき点があれば指摘\n\
         3. より良い睡眠のための具体的なアドバイス\n\
         \n\
         300文字程度で分かりやすく回答してください。"
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_nutrition_prompt_lists_foods_and_totals() {
        let entries = vec![
            FoodEntry {
                id: 1,
                food_name: "鶏むね肉".into(),
                protein: 30.0,
                fat: 3.0,
                carbs: 0.0,
                calories: 150.0,
                consumed_at: Utc::now(),
            },
            FoodEntry {
                id: 2,
                food_name: "白米".into(),
                protein: 4.0,
                fat: 0.5,
                carbs: 55.0,
                calories: 250.0,
                consumed_at: Utc::now(),
            },
        ];
        let prompt = nutrition_prompt(&entries);
        assert!(prompt.contains("鶏むね肉(150kcal), 白米(250kcal)"));
        assert!(prompt.contains("カロリー: 400kcal"));
        assert!(prompt.contains("タンパク質: 34g"));
        assert!(prompt.contains("脂質: 3.5g"));
        assert!(prompt.contains("炭水化物: 55g"));
    }

    #[test]
    fn test_sleep_prompt_handles_missing_fields() {
        let data = vec![SleepAnalysisInput {
            date: "2024-01-05".into(),
            duration_hours: 7.5,
            fall_asleep_minutes: None,
            efficiency_pct: Some(91.4),
        }];
        let prompt = sleep_prompt(&data);
        assert!(prompt.contains("日付: 2024-01-05, 睡眠時間: 7.5時間, 寝付き時間: 不明分, 睡眠効率: 91%"));
    }
}
