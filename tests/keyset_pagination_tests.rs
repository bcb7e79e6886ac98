//! Keyset and offset page walks over real storage

use chrono::{DateTime, Duration, TimeZone, Utc};
use cim_event_records::{
    EventQuery, EventQueryService, EventRecord, EventRecordStore, NewEventRecord, QueryBuilder,
    SortDirection, SortField, SqliteEventRecordStore,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap()
}

async fn seed(rows: &[(u32, u32)]) -> (Arc<SqliteEventRecordStore>, Vec<EventRecord>) {
    let store = Arc::new(SqliteEventRecordStore::in_memory().unwrap());
    let mut created = Vec::new();
    for (i, (minute, retries)) in rows.iter().enumerate() {
        let record = store
            .create(
                NewEventRecord::new(
                    format!("evt-{i:03}"),
                    json!({ "i": i }),
                    base() + Duration::minutes(i64::from(*minute)),
                )
                .with_retry_count(*retries),
            )
            .await
            .unwrap();
        created.push(record);
    }
    (store, created)
}

fn expected_order(
    records: &[EventRecord],
    field: SortField,
    direction: SortDirection,
) -> Vec<String> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        let primary = match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::RetryCount => a.retry_count.cmp(&b.retry_count),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
    if direction == SortDirection::Descending {
        sorted.reverse();
    }
    sorted.into_iter().map(|r| r.id).collect()
}

async fn walk(service: &EventQueryService, first: EventQuery) -> Vec<String> {
    let mut seen = Vec::new();
    let mut query = first;
    for _ in 0..1_000 {
        let page = service.search(&query).await.unwrap();
        seen.extend(page.items.into_iter().map(|r| r.id));
        match page.next_cursor {
            Some(cursor) => {
                query.offset = None;
                query.cursor = Some(cursor);
            }
            None => return seen,
        }
    }
    panic!("page walk did not terminate");
}

fn sort_field() -> impl Strategy<Value = SortField> {
    prop_oneof![
        Just(SortField::CreatedAt),
        Just(SortField::UpdatedAt),
        Just(SortField::RetryCount),
    ]
}

fn direction() -> impl Strategy<Value = SortDirection> {
    prop_oneof![Just(SortDirection::Ascending), Just(SortDirection::Descending)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn keyset_walk_visits_every_row_once_in_order(
        rows in prop::collection::vec((0u32..4, 0u32..3), 0..40),
        limit in 1u32..7,
        field in sort_field(),
        direction in direction(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (seen, expected) = runtime.block_on(async {
            let (store, created) = seed(&rows).await;
            let service = EventQueryService::new(store);
            let first = QueryBuilder::new().sort_by(field, direction).limit(limit).build();
            (walk(&service, first).await, expected_order(&created, field, direction))
        });
        prop_assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn keyset_pages_ignore_rows_inserted_ahead_of_the_cursor() {
    let (store, _) = seed(&[(1, 0), (2, 0), (3, 0), (4, 0)]).await;
    let service = EventQueryService::new(store.clone());

    let first = service
        .search(&QueryBuilder::new().limit(2).build())
        .await
        .unwrap();
    let ids: Vec<_> = first.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["evt-003", "evt-002"]);

    store
        .create(NewEventRecord::new("newest", json!({}), base() + Duration::hours(1)))
        .await
        .unwrap();

    let second = service
        .search(
            &QueryBuilder::new()
                .limit(2)
                .after_cursor(first.next_cursor.unwrap())
                .build(),
        )
        .await
        .unwrap();
    let ids: Vec<_> = second.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["evt-001", "evt-000"]);
    assert_eq!(second.total_count, None);
}

#[tokio::test]
async fn full_last_page_yields_an_empty_terminal_page() {
    let (store, _) = seed(&[(0, 0), (1, 0)]).await;
    let service = EventQueryService::new(store);

    let first = service
        .search(&QueryBuilder::new().limit(2).build())
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(!first.has_more);

    let last = service
        .search(
            &QueryBuilder::new()
                .limit(2)
                .after_cursor(first.next_cursor.unwrap())
                .build(),
        )
        .await
        .unwrap();
    assert!(last.items.is_empty());
    assert!(!last.has_more);
    assert!(last.next_cursor.is_none());
}

#[tokio::test]
async fn offset_past_the_end_reports_the_matching_total() {
    let (store, _) = seed(&[(0, 0), (1, 1), (2, 2)]).await;
    let service = EventQueryService::new(store);

    let page = service
        .search(&QueryBuilder::new().retries_between(1, 2).offset(50).build())
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, Some(2));
    assert!(!page.has_more);
}

#[tokio::test]
async fn offset_pages_cover_the_set_in_order() {
    let rows: Vec<_> = (0..7).map(|i| (i % 2, 0)).collect();
    let (store, created) = seed(&rows).await;
    let service = EventQueryService::new(store);

    let mut seen = Vec::new();
    for offset in (0..7).step_by(3) {
        let page = service
            .search(
                &QueryBuilder::new()
                    .sort_by(SortField::CreatedAt, SortDirection::Ascending)
                    .limit(3)
                    .offset(offset)
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, Some(7));
        assert_eq!(page.has_more, offset + 3 < 7);
        seen.extend(page.items.into_iter().map(|r| r.id));
    }
    assert_eq!(
        seen,
        expected_order(&created, SortField::CreatedAt, SortDirection::Ascending)
    );
}
