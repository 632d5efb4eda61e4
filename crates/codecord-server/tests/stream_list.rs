//! Stream list filtering, sorting and pagination

mod common;

use chrono::{Duration, Utc};
use codecord_core::{
    HostInfo, JoinConfig, LaunchMode, StreamRecord, StreamStatus,
};
use codecord_server::lifecycle::{SortField, SortOrder, StreamFilter};
use codecord_server::storage::STREAM_BUCKET;

use common::Harness;

fn record(uuid: &str, name: &str, mode: LaunchMode, status: StreamStatus) -> StreamRecord {
    StreamRecord {
        uuid: uuid.to_owned(),
        name: name.to_owned(),
        description: format!("{name} description"),
        ip: "127.0.0.1".into(),
        port: 4000,
        launch_mode: mode,
        started_at: Utc::now() - Duration::minutes(uuid.len() as i64),
        finished_at: None,
        subject: String::new(),
        status,
        join: JoinConfig::default(),
        host: HostInfo::default(),
    }
}

async fn seed(harness: &Harness, records: &[StreamRecord]) {
    for record in records {
        let bytes = serde_json::to_vec(record).unwrap();
        harness
            .stores
            .stream
            .put(STREAM_BUCKET, &record.uuid, &bytes)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_filter_by_term_mode_and_status() {
    let harness = Harness::new();
    seed(
        &harness,
        &[
            record("s-1", "alpha demo", LaunchMode::StandaloneApp, StreamStatus::Running),
            record("s-2", "beta demo", LaunchMode::DockerContainer, StreamStatus::Running),
            record("s-3", "gamma", LaunchMode::StandaloneApp, StreamStatus::Finished),
        ],
    )
    .await;

    let list = harness
        .service
        .stream_list(StreamFilter {
            search_phrase: "demo".into(),
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(list.total, 2);

    let list = harness
        .service
        .stream_list(StreamFilter {
            launch_modes: vec![LaunchMode::DockerContainer],
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.streams[0].uuid, "s-2");

    let list = harness
        .service
        .stream_list(StreamFilter {
            statuses: vec![StreamStatus::Finished],
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.streams[0].uuid, "s-3");

    // the term matches descriptions as well
    let list = harness
        .service
        .stream_list(StreamFilter {
            search_phrase: "gamma description".into(),
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(list.total, 1);
}

#[tokio::test]
async fn test_sorting_is_stable_and_reversible() {
    let harness = Harness::new();
    seed(
        &harness,
        &[
            record("s-2", "beta", LaunchMode::StandaloneApp, StreamStatus::Running),
            record("s-1", "alpha", LaunchMode::StandaloneApp, StreamStatus::Running),
            record("s-3", "gamma", LaunchMode::StandaloneApp, StreamStatus::Running),
        ],
    )
    .await;

    let list = harness
        .service
        .stream_list(StreamFilter {
            sort_by: SortField::Name,
            sort_order: SortOrder::Asc,
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    let names: Vec<&str> = list.streams.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    let list = harness
        .service
        .stream_list(StreamFilter {
            sort_by: SortField::Name,
            sort_order: SortOrder::Desc,
            ..StreamFilter::default()
        })
        .await
        .unwrap();
    let names: Vec<&str> = list.streams.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["gamma", "beta", "alpha"]);
}

#[tokio::test]
async fn test_pagination_covers_every_stream_exactly_once() {
    let harness = Harness::new();

    let records: Vec<StreamRecord> = (0..23)
        .map(|i| {
            record(
                &format!("s-{i:02}"),
                &format!("stream {i:02}"),
                LaunchMode::StandaloneApp,
                StreamStatus::Running,
            )
        })
        .collect();
    seed(&harness, &records).await;

    let page_size = 5;
    let mut collected = Vec::new();
    let mut page = 1;
    loop {
        let list = harness
            .service
            .stream_list(StreamFilter {
                sort_by: SortField::Uuid,
                page,
                page_size,
                ..StreamFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(list.total, 23);
        assert_eq!(list.page, page);
        assert_eq!(list.page_size, page_size);
        assert_eq!(list.count, list.streams.len());

        let expect_next = page * page_size < 23;
        assert_eq!(list.has_next, expect_next);

        collected.extend(list.streams.into_iter().map(|s| s.uuid));
        if !expect_next {
            break;
        }
        page += 1;
    }

    // concatenating all pages yields the full sorted list, no duplicates,
    // no omissions
    let expected: Vec<String> = (0..23).map(|i| format!("s-{i:02}")).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn test_page_beyond_the_end_is_empty() {
    let harness = Harness::new();
    seed(
        &harness,
        &[record("s-1", "alpha", LaunchMode::StandaloneApp, StreamStatus::Running)],
    )
    .await;

    let list = harness
        .service
        .stream_list(StreamFilter {
            page: 5,
            page_size: 10,
            ..StreamFilter::default()
        })
        .await
        .unwrap();

    assert_eq!(list.total, 1);
    assert_eq!(list.count, 0);
    assert!(list.streams.is_empty());
    assert!(!list.has_next);
}
