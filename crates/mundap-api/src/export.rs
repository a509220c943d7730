use axum::{
    Extension,
    extract::State,
    http::header,
    response::IntoResponse,
};

use mundap_db::models::AnswerDetailRow;
use mundap_db::rotation::{service_day, service_today};

use crate::error::AppResult;
use crate::middleware::ActivePair;
use crate::state::AppState;

/// Byte-order mark so spreadsheet apps pick UTF-8 for the Korean text.
const BOM: &str = "\u{feff}";
const HEADER: &str = "date,question,category,author,role,answer";

/// Every answer of the caller's pair as a CSV download.
pub async fn export_csv(
    State(state): State<AppState>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
) -> AppResult<impl IntoResponse> {
    let offset = state.settings.utc_offset_hours;
    let rows = state.store.all_answers_for_pair(pair.id).await?;
    let body = render(&rows, offset);

    let filename = format!(
        "attachment; filename=\"mundapdari-answers-{}.csv\"",
        service_today(offset)
    );
    tracing::info!("Exported {} answers for pair {}", rows.len(), pair.id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}

pub fn render(rows: &[AnswerDetailRow], utc_offset_hours: i32) -> String {
    let mut out = String::with_capacity(BOM.len() + HEADER.len() + rows.len() * 128);
    out.push_str(BOM);
    out.push_str(HEADER);
    out.push_str("\r\n");

    for row in rows {
        let day = service_day(row.answer.answered_at, utc_offset_hours).to_string();
        let fields = [
            day.as_str(),
            row.question_content.as_str(),
            row.category.as_str(),
            row.author_name.as_str(),
            row.author_role.as_str(),
            row.answer.content.as_str(),
        ];
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_field(&mut out, field);
        }
        out.push_str("\r\n");
    }
    out
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mundap_db::models::AnswerRow;
    use mundap_types::models::Role;
    use uuid::Uuid;

    fn row(content: &str) -> AnswerDetailRow {
        // 16:00 UTC is already the next day in Seoul
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap();
        AnswerDetailRow {
            answer: AnswerRow {
                id: Uuid::new_v4(),
                question_id: 1,
                user_id: Uuid::new_v4(),
                pair_id: Uuid::new_v4(),
                content: content.into(),
                answered_at: at,
                updated_at: at,
            },
            author_name: "김엄마".into(),
            author_role: Role::Parent,
            question_content: "오늘 가장 기억에 남는 일은?".into(),
            category: "daily".into(),
        }
    }

    #[test]
    fn starts_with_bom_and_header() {
        let csv = render(&[], 9);
        assert_eq!(csv, format!("{BOM}{HEADER}\r\n"));
    }

    #[test]
    fn rows_use_service_day_and_quote_when_needed() {
        let csv = render(&[row("맛있는 \"김치\", 그리고\n밥")], 9);
        let line = csv.lines().nth(1).unwrap();
        assert!(line.starts_with("2026-03-02,오늘 가장 기억에 남는 일은?,daily,김엄마,parent,"));
        assert!(csv.contains("\"맛있는 \"\"김치\"\", 그리고\n밥\""));
    }
}
