use crate::domain::models::{HazardLevel, ReportDetails, ReportItem};
use crate::domain::navigation::Screen;
use crate::error::SafetyResult;
use crate::state::SharedState;
use crate::time_utils::SiteTimezone;
use crate::web::session::UserSession;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_UNITS: [&str; 6] = ["采矿厂", "选矿厂", "冶炼厂", "生产技术部", "质检计量部", "后勤保障部"];
const HISTORY_PERIODS: usize = 6;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Range {
    #[default]
    Monthly,
    Quarterly,
}

impl Range {
    fn months(self) -> u32 {
        match self {
            Range::Monthly => 1,
            Range::Quarterly => 3,
        }
    }

    /// First day of the period containing `date`.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        let month0 = date.month0() / self.months() * self.months();
        NaiveDate::from_ymd_opt(date.year(), month0 + 1, 1).unwrap_or(date)
    }

    /// Start of the period `back` periods before the one starting at `start`.
    fn shift_back(self, start: NaiveDate, back: u32) -> NaiveDate {
        let total = start.year() * 12 + start.month0() as i32 - (back * self.months()) as i32;
        NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1).unwrap_or(start)
    }
}

#[derive(Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub range: Range,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UnitStats {
    pub name: String,
    pub total: usize,
    pub major: usize,
    pub general: usize,
    pub violations: usize,
    /// Hazard counts for the last periods, oldest first, ending with the current one.
    pub history: Vec<usize>,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsView {
    pub range: Range,
    pub period_start: NaiveDate,
    pub total_hazards: usize,
    pub major_hazards: usize,
    pub total_violations: usize,
    pub units: Vec<UnitStats>,
    pub updated_at: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new().route("/", get(dashboard)).with_state(state)
}

pub fn summarize(items: &[ReportItem], range: Range, today: NaiveDate, tz: SiteTimezone) -> AnalyticsView {
    let current = range.period_start(today);
    let starts: Vec<i64> = (0..HISTORY_PERIODS as u32)
        .rev()
        .map(|back| tz.start_of_day(range.shift_back(current, back)).timestamp_millis())
        .collect();
    let current_from = starts[HISTORY_PERIODS - 1];

    let mut units: Vec<UnitStats> = DEFAULT_UNITS
        .iter()
        .map(|name| UnitStats {
            name: name.to_string(),
            total: 0,
            major: 0,
            general: 0,
            violations: 0,
            history: vec![0; HISTORY_PERIODS],
        })
        .collect();

    for item in items.iter().filter(|i| i.created_at >= starts[0]) {
        let idx = match units.iter().position(|u| u.name == item.unit) {
            Some(idx) => idx,
            None => {
                units.push(UnitStats {
                    name: item.unit.clone(),
                    total: 0,
                    major: 0,
                    general: 0,
                    violations: 0,
                    history: vec![0; HISTORY_PERIODS],
                });
                units.len() - 1
            }
        };
        let unit = &mut units[idx];
        match &item.details {
            ReportDetails::Hazard { level, .. } => {
                let period = starts.iter().rposition(|start| item.created_at >= *start).unwrap_or(0);
                unit.history[period] += 1;
                if item.created_at >= current_from {
                    unit.total += 1;
                    match level {
                        HazardLevel::Major => unit.major += 1,
                        HazardLevel::General => unit.general += 1,
                    }
                }
            }
            ReportDetails::Violation { .. } if item.created_at >= current_from => unit.violations += 1,
            _ => {}
        }
    }

    AnalyticsView {
        range,
        period_start: current,
        total_hazards: units.iter().map(|u| u.total).sum(),
        major_hazards: units.iter().map(|u| u.major).sum(),
        total_violations: units.iter().map(|u| u.violations).sum(),
        units,
        updated_at: String::new(),
    }
}

async fn dashboard(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<AnalyticsQuery>,
) -> SafetyResult<Json<AnalyticsView>> {
    let _shell = session.on_screen(&state, Screen::Analytics).await?;
    let items = state.reports.list().await?;
    let now = state.clock.now();
    let mut view = summarize(&items, query.range, state.tz.local_date(now), state.tz);
    view.updated_at = crate::time_utils::format_local_time(state.tz, now.timestamp_millis());
    Ok(Json(view))
}
