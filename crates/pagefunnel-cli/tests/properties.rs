//! Property tests: derived counters against an in-memory model of the lag.

mod common;

use common::*;
use pagefunnel_cli::{run_job, ReplaceMode, COUNTERS};
use pagefunnel_datagen::Page;
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct GenEvent {
    subject: usize,
    in_month: bool,
    minute: u32,
    page: Page,
    thai: bool,
}

fn event() -> impl Strategy<Value = GenEvent> {
    (
        0usize..4,
        prop::bool::weighted(0.85),
        0u32..600,
        prop::sample::select(Page::ALL.to_vec()),
        prop::bool::weighted(0.8),
    )
        .prop_map(|(subject, in_month, minute, page, thai)| GenEvent {
            subject,
            in_month,
            minute,
            page,
            thai,
        })
}

fn timestamp(e: &GenEvent) -> String {
    let day = if e.in_month { "2022-12-10" } else { "2022-11-10" };
    format!("{} {:02}:{:02}:00", day, e.minute / 60, e.minute % 60)
}

/// Expected counters per subject: time order with page name as tiebreak.
fn expected(events: &[GenEvent]) -> BTreeMap<String, Vec<i64>> {
    let mut by_subject: BTreeMap<String, Vec<(u32, &'static str)>> = BTreeMap::new();
    for e in events.iter().filter(|e| e.in_month && e.thai) {
        by_subject
            .entry(format!("S{}", e.subject))
            .or_default()
            .push((e.minute, e.page.as_str()));
    }

    by_subject
        .into_iter()
        .map(|(subject, mut visits)| {
            visits.sort();
            let mut counts = vec![0i64; COUNTERS.len()];
            let mut previous = None;
            for (_, page) in visits {
                for (i, counter) in COUNTERS.iter().enumerate() {
                    if counter.matches(previous, page) {
                        counts[i] += 1;
                    }
                }
                previous = Some(page);
            }
            (subject, counts)
        })
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_counters_match_lag_model(events in prop::collection::vec(event(), 0..40)) {
        let rows = runtime().block_on(async {
            let backend = in_memory();
            let rows: Vec<(String, String, &str, &str)> = events
                .iter()
                .map(|e| {
                    (
                        timestamp(e),
                        format!("S{}", e.subject),
                        e.page.as_str(),
                        if e.thai { "th" } else { "my" },
                    )
                })
                .collect();
            let source: Vec<Event<'_>> = rows
                .iter()
                .map(|(ts, s, p, c)| (ts.as_str(), s.as_str(), *p, *c))
                .collect();
            insert_events(&backend, &source).await;

            let (ctx, job) = compile(&params("th", 11, date(2022, 12, 31))).unwrap();
            run_job(&backend, &ctx, &job, ReplaceMode::Auto).await.unwrap();
            scope_rows(&backend, &ctx).await
        });

        let actual: BTreeMap<String, Vec<i64>> = rows
            .iter()
            .map(|r| {
                let counters = r.counters.iter().map(|c| c.unwrap_or(-1)).collect();
                (r.subject_id.clone(), counters)
            })
            .collect();

        prop_assert_eq!(actual.len(), rows.len(), "duplicate subjects in scope");
        prop_assert_eq!(actual, expected(&events));
    }

    #[test]
    fn prop_rerun_is_idempotent(
        events in prop::collection::vec(event(), 1..30),
        mode in prop::sample::select(vec![ReplaceMode::Auto, ReplaceMode::TwoStep]),
    ) {
        let (first, second) = runtime().block_on(async {
            let backend = in_memory();
            let rows: Vec<(String, String, &str)> = events
                .iter()
                .map(|e| (timestamp(e), format!("S{}", e.subject), e.page.as_str()))
                .collect();
            let source: Vec<Event<'_>> = rows
                .iter()
                .map(|(ts, s, p)| (ts.as_str(), s.as_str(), *p, "th"))
                .collect();
            insert_events(&backend, &source).await;

            let (ctx, job) = compile(&params("th", 11, date(2022, 12, 31))).unwrap();
            run_job(&backend, &ctx, &job, mode).await.unwrap();
            let first = scope_rows(&backend, &ctx).await;
            run_job(&backend, &ctx, &job, mode).await.unwrap();
            (first, scope_rows(&backend, &ctx).await)
        });

        prop_assert_eq!(first, second);
    }
}
