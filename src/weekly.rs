//! Day-of-week CPU baseline for batch rows
//!
//! Some phases are routinely heavier on particular weekdays (month-end
//! Fridays, Monday catch-up runs). The median CPU per (phase, weekday)
//! tells a recurring weekday spike apart from a one-off anomaly. It is
//! informational and never feeds `batch_anomaly`.

use crate::batch::AnnotatedBatch;
use chrono::Weekday;
use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::BTreeMap;

/// Median CPU of one phase on one weekday
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyBaseline {
    pub phase: String,
    pub day_of_week: &'static str,
    pub dow_cpu_median: f64,
    pub observations: usize,
}

/// Full weekday name, as shown in reports
pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

type Groups = BTreeMap<(String, u32), (Weekday, Vec<f64>)>;

fn grouped_cpu(rows: &[AnnotatedBatch]) -> Groups {
    let mut groups = Groups::new();
    for row in rows {
        groups
            .entry((
                row.record.phase.clone(),
                row.day_of_week.num_days_from_monday(),
            ))
            .or_insert_with(|| (row.day_of_week, Vec::new()))
            .1
            .push(row.record.cpu_time_seconds);
    }
    groups
}

/// Per-(phase, weekday) medians, ordered by phase then Monday-first weekday
pub fn weekly_baseline(rows: &[AnnotatedBatch]) -> Vec<WeeklyBaseline> {
    grouped_cpu(rows)
        .into_iter()
        .map(|((phase, _), (day, cpu))| {
            let observations = cpu.len();
            WeeklyBaseline {
                phase,
                day_of_week: day_name(day),
                dow_cpu_median: Data::new(cpu).median(),
                observations,
            }
        })
        .collect()
}

/// Write `dow_cpu_median` onto every row
pub fn attach_weekly_baseline(rows: &mut [AnnotatedBatch]) {
    let medians: BTreeMap<(String, u32), f64> = grouped_cpu(rows)
        .into_iter()
        .map(|(key, (_, cpu))| (key, Data::new(cpu).median()))
        .collect();

    for row in rows.iter_mut() {
        let key = (
            row.record.phase.clone(),
            row.day_of_week.num_days_from_monday(),
        );
        row.dow_cpu_median = medians.get(&key).copied();
    }
    tracing::debug!("attached weekly baseline for {} groups", medians.len());
}
