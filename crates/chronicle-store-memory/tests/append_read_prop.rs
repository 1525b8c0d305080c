use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StreamId};
use chronicle_store_memory::MemoryBackend;
use chronicle_types::Topic;
use proptest::prelude::*;

fn record(stream: &StreamId, version: u64) -> NewStoredEvent {
    NewStoredEvent::new(stream.clone(), version, Topic::new("acct#Touched"), version.to_le_bytes().to_vec())
}

proptest! {
    #[test]
    fn sequential_append_then_read_preserves_order_and_versions(count in 1usize..30) {
        tokio_test::block_on(async {
            let backend = MemoryBackend::new();
            let stream = StreamId::from("acct-1");
            for version in 0..count as u64 {
                backend.insert_events(vec![record(&stream, version)]).await.unwrap();
            }

            let read_back = backend.select_events(&stream, SelectEventsQuery::default()).await.unwrap();
            prop_assert_eq!(read_back.len(), count);
            for (i, stored) in read_back.iter().enumerate() {
                prop_assert_eq!(stored.originator_version, i as u64);
            }
            Ok(())
        })?;
    }

    #[test]
    fn paging_select_notifications_covers_the_whole_log_exactly_once(
        count in 1usize..30,
        page_size in 1usize..10,
    ) {
        tokio_test::block_on(async {
            let backend = MemoryBackend::new();
            let stream = StreamId::from("acct-1");
            for version in 0..count as u64 {
                backend.insert_events(vec![record(&stream, version)]).await.unwrap();
            }

            let mut seen = Vec::new();
            let mut cursor = 1u64;
            loop {
                let page = backend.select_notifications(cursor, page_size).await.unwrap();
                if page.is_empty() {
                    break;
                }
                cursor = page.last().unwrap().notification_id + 1;
                seen.extend(page.into_iter().map(|e| e.notification_id));
            }

            let expected: Vec<u64> = (1..=count as u64).collect();
            prop_assert_eq!(seen, expected);
            Ok(())
        })?;
    }

    #[test]
    fn duplicate_version_in_same_stream_is_rejected(version in 0u64..1000) {
        tokio_test::block_on(async {
            let backend = MemoryBackend::new();
            let stream = StreamId::from("acct-1");
            backend.insert_events(vec![record(&stream, version)]).await.unwrap();
            let err = backend.insert_events(vec![record(&stream, version)]).await.unwrap_err();
            prop_assert!(matches!(err, chronicle_store_core::StorageError::ConcurrencyConflict { .. }));
            Ok(())
        })?;
    }
}
