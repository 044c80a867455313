// Search Metrics - retrieval observations, feedback, and the dashboard view
//
// Search events are written fire-and-forget after each retrieval so the hot
// path never waits on bookkeeping. Feedback writes honor the uniqueness
// invariants of the data model. The dashboard summary fetches the raw event
// window once and aggregates in-process, which keeps the bucketing, rate,
// and percentile math independent of a live database.

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::errors::ApiError;
use crate::types::{AiFeedback, SearchEvent, SearchFeedback};

/// How many zero-result queries the dashboard surfaces
const TOP_ZERO_RESULT_LIMIT: usize = 10;

/// Writes retrieval observations and feedback records
#[derive(Clone)]
pub struct MetricsRecorder {
    pool: PgPool,
}

/// One day of search volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyVolume {
    pub date: String,
    pub count: i64,
}

/// Search volume per retrieval strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub search_type: String,
    pub count: i64,
}

/// A query that repeatedly produced no results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZeroResultQuery {
    pub query: String,
    pub count: i64,
}

/// Dashboard aggregate over recent search events
#[derive(Debug, Clone, Serialize)]
pub struct SearchMetricsSummary {
    pub period_days: i64,
    pub total_searches: i64,
    pub avg_result_count: f64,
    pub avg_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    /// Percentage of searches where the judge triggered semantic retrieval
    pub semantic_trigger_rate: f64,
    /// Percentage of searches returning nothing
    pub zero_result_rate: f64,
    pub daily_volume: Vec<DailyVolume>,
    pub type_distribution: Vec<TypeCount>,
    pub top_zero_result_queries: Vec<ZeroResultQuery>,
}

/// Raw event projection the summary is computed from
#[derive(Debug, Clone, FromRow)]
struct EventRow {
    day: String,
    search_type: String,
    query: String,
    result_count: i32,
    latency_ms: i64,
    semantic_triggered: bool,
}

impl MetricsRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a search event without blocking the caller. Failures are
    /// logged and dropped.
    pub fn record_search_event(&self, event: SearchEvent) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                "INSERT INTO search_events \
                     (user_name, query, search_type, result_count, latency_ms, \
                      semantic_triggered, judge_reason, clicked_note_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&event.user_name)
            .bind(&event.query)
            .bind(event.search_type.as_str())
            .bind(event.result_count as i32)
            .bind(event.latency_ms as i64)
            .bind(event.semantic_triggered)
            .bind(&event.judge_reason)
            .bind(event.clicked_note_id)
            .execute(&pool)
            .await;

            if let Err(err) = result {
                warn!("failed to record search event: {err}");
            }
        });
    }

    /// Store a relevance signal; the (event, note, user) pair is unique and
    /// repeated submissions update the stored value
    pub async fn record_search_feedback(&self, feedback: &SearchFeedback) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO search_feedback (event_id, note_id, user_name, relevant) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (event_id, note_id, user_name) \
             DO UPDATE SET relevant = $4, created_at = now()",
        )
        .bind(feedback.event_id)
        .bind(feedback.note_id)
        .bind(&feedback.user_name)
        .bind(feedback.relevant)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a star rating on a generated answer
    pub async fn record_ai_feedback(&self, feedback: &AiFeedback) -> Result<(), ApiError> {
        feedback
            .validate()
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

        sqlx::query(
            "INSERT INTO ai_feedback (feature, rating, comment, model, request_summary) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(feedback.feature.as_str())
        .bind(feedback.rating as i16)
        .bind(&feedback.comment)
        .bind(&feedback.model)
        .bind(&feedback.request_summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dashboard aggregate over the last `days` days of search events
    pub async fn summary(&self, days: i64) -> Result<SearchMetricsSummary, ApiError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT created_at::date::text AS day, search_type, query, \
                    result_count, latency_ms, semantic_triggered \
             FROM search_events \
             WHERE created_at >= now() - make_interval(days => $1) \
             ORDER BY created_at",
        )
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(summarize(&rows, days))
    }
}

/// Aggregate an event window into the dashboard summary
fn summarize(rows: &[EventRow], period_days: i64) -> SearchMetricsSummary {
    let total = rows.len() as i64;

    let mut daily: BTreeMap<&str, i64> = BTreeMap::new();
    let mut types: HashMap<&str, i64> = HashMap::new();
    let mut zero_queries: HashMap<&str, i64> = HashMap::new();
    let mut latencies: Vec<f64> = Vec::with_capacity(rows.len());
    let mut result_count_sum: i64 = 0;
    let mut semantic_count: i64 = 0;
    let mut zero_count: i64 = 0;

    for row in rows {
        *daily.entry(&row.day).or_insert(0) += 1;
        *types.entry(&row.search_type).or_insert(0) += 1;
        latencies.push(row.latency_ms as f64);
        result_count_sum += row.result_count as i64;
        if row.semantic_triggered {
            semantic_count += 1;
        }
        if row.result_count == 0 {
            zero_count += 1;
            *zero_queries.entry(&row.query).or_insert(0) += 1;
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let daily_volume = daily
        .into_iter()
        .map(|(date, count)| DailyVolume {
            date: date.to_string(),
            count,
        })
        .collect();

    let mut type_distribution: Vec<TypeCount> = types
        .into_iter()
        .map(|(search_type, count)| TypeCount {
            search_type: search_type.to_string(),
            count,
        })
        .collect();
    type_distribution.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.search_type.cmp(&b.search_type))
    });

    let mut top_zero_result_queries: Vec<ZeroResultQuery> = zero_queries
        .into_iter()
        .map(|(query, count)| ZeroResultQuery {
            query: query.to_string(),
            count,
        })
        .collect();
    top_zero_result_queries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
    top_zero_result_queries.truncate(TOP_ZERO_RESULT_LIMIT);

    let mean = |sum: f64| if total > 0 { sum / total as f64 } else { 0.0 };
    let rate = |count: i64| {
        if total > 0 {
            round1(count as f64 / total as f64 * 100.0)
        } else {
            0.0
        }
    };

    SearchMetricsSummary {
        period_days,
        total_searches: total,
        avg_result_count: round1(mean(result_count_sum as f64)),
        avg_latency_ms: round1(mean(latencies.iter().sum())),
        latency_p50_ms: round1(percentile_cont(&latencies, 0.5)),
        latency_p95_ms: round1(percentile_cont(&latencies, 0.95)),
        semantic_trigger_rate: rate(semantic_count),
        zero_result_rate: rate(zero_count),
        daily_volume,
        type_distribution,
        top_zero_result_queries,
    }
}

/// Continuous percentile over a sorted slice (linear interpolation between
/// the two closest ranks, matching percentile_cont)
fn percentile_cont(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = quantile * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (rank - lower as f64) * (sorted[upper] - sorted[lower])
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(
        day: &str,
        search_type: &str,
        query: &str,
        result_count: i32,
        latency_ms: i64,
        semantic_triggered: bool,
    ) -> EventRow {
        EventRow {
            day: day.to_string(),
            search_type: search_type.to_string(),
            query: query.to_string(),
            result_count,
            latency_ms,
            semantic_triggered,
        }
    }

    #[test]
    fn empty_window_yields_zeroed_summary() {
        let summary = summarize(&[], 7);
        assert_eq!(summary.period_days, 7);
        assert_eq!(summary.total_searches, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.latency_p95_ms, 0.0);
        assert_eq!(summary.semantic_trigger_rate, 0.0);
        assert_eq!(summary.zero_result_rate, 0.0);
        assert!(summary.daily_volume.is_empty());
        assert!(summary.type_distribution.is_empty());
        assert!(summary.top_zero_result_queries.is_empty());
    }

    #[test]
    fn daily_volume_buckets_in_date_order() {
        let rows = vec![
            row("2026-07-30", "hybrid", "a", 3, 40, false),
            row("2026-07-29", "hybrid", "b", 2, 50, false),
            row("2026-07-30", "fts", "c", 1, 30, false),
        ];
        let summary = summarize(&rows, 7);
        assert_eq!(
            summary.daily_volume,
            vec![
                DailyVolume {
                    date: "2026-07-29".to_string(),
                    count: 1
                },
                DailyVolume {
                    date: "2026-07-30".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn type_distribution_sorts_by_count_then_name() {
        let rows = vec![
            row("2026-07-30", "semantic", "a", 1, 10, true),
            row("2026-07-30", "hybrid", "b", 1, 10, false),
            row("2026-07-30", "hybrid", "c", 1, 10, false),
            row("2026-07-30", "fts", "d", 1, 10, false),
        ];
        let summary = summarize(&rows, 7);
        assert_eq!(summary.type_distribution[0].search_type, "hybrid");
        assert_eq!(summary.type_distribution[0].count, 2);
        // equal counts break ties alphabetically
        assert_eq!(summary.type_distribution[1].search_type, "fts");
        assert_eq!(summary.type_distribution[2].search_type, "semantic");
    }

    #[test]
    fn zero_result_queries_rank_by_frequency_and_cap_at_ten() {
        let mut rows = Vec::new();
        for _ in 0..3 {
            rows.push(row("2026-07-30", "hybrid", "미토콘드리아", 0, 10, true));
        }
        rows.push(row("2026-07-30", "hybrid", "엽록체", 0, 10, true));
        for i in 0..12 {
            rows.push(row("2026-07-30", "hybrid", &format!("q{i}"), 0, 10, true));
        }
        let summary = summarize(&rows, 7);
        assert_eq!(summary.top_zero_result_queries.len(), 10);
        assert_eq!(summary.top_zero_result_queries[0].query, "미토콘드리아");
        assert_eq!(summary.top_zero_result_queries[0].count, 3);
    }

    #[test]
    fn rates_are_percentages_rounded_to_one_decimal() {
        let rows = vec![
            row("2026-07-30", "hybrid", "a", 5, 100, true),
            row("2026-07-30", "hybrid", "b", 0, 100, false),
            row("2026-07-30", "hybrid", "c", 2, 100, false),
        ];
        let summary = summarize(&rows, 7);
        // 1 of 3 semantic, 1 of 3 zero-result
        assert_eq!(summary.semantic_trigger_rate, 33.3);
        assert_eq!(summary.zero_result_rate, 33.3);
        assert_eq!(summary.avg_result_count, 2.3);
    }

    #[test]
    fn latency_percentiles_interpolate() {
        // 101 samples 0..=100 ms: ranks land on exact positions
        let rows: Vec<EventRow> = (0..=100)
            .map(|ms| row("2026-07-30", "hybrid", "q", 1, ms, false))
            .collect();
        let summary = summarize(&rows, 7);
        assert_eq!(summary.latency_p50_ms, 50.0);
        assert_eq!(summary.latency_p95_ms, 95.0);
        assert_eq!(summary.avg_latency_ms, 50.0);
    }

    #[test]
    fn percentile_cont_edge_cases() {
        assert_eq!(percentile_cont(&[], 0.5), 0.0);
        assert_eq!(percentile_cont(&[42.0], 0.5), 42.0);
        assert_eq!(percentile_cont(&[10.0, 20.0], 0.5), 15.0);
        assert_eq!(percentile_cont(&[10.0, 20.0], 1.0), 20.0);
        assert_eq!(percentile_cont(&[10.0, 20.0], 0.0), 10.0);
    }

    #[test]
    fn round1_keeps_one_decimal() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(50.46), 50.5);
        assert_eq!(round1(0.0), 0.0);
    }
}
