//! Sold-out ranking against a real Redis sorted set.
//!
//! These tests share one Redis container.
//! Run with:
//!
//! ```bash
//! cargo test -p booking --test redis_ranking -- --test-threads=1
//! ```

use std::sync::Arc;

use booking::{RedisSoldOutRanking, SoldOutRanking};
use chrono::{Duration, Utc};
use common::ScheduleId;
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("redis://{host}:{port}"),
            })
        })
        .await
        .clone()
}

async fn get_ranking(key: &str) -> RedisSoldOutRanking {
    let info = get_container_info().await;
    RedisSoldOutRanking::connect(&info.url)
        .await
        .unwrap()
        .with_key(key)
}

#[tokio::test]
#[serial]
async fn schedules_are_ordered_by_sell_out_time() {
    let ranking = get_ranking("test:ranking:order").await;
    let t0 = Utc::now();

    ranking
        .record_sold_out(ScheduleId::new(7), t0 + Duration::seconds(30))
        .await
        .unwrap();
    ranking.record_sold_out(ScheduleId::new(3), t0).await.unwrap();

    let top = ranking.top(10).await.unwrap();
    assert_eq!(
        top.iter().map(|e| e.schedule_id).collect::<Vec<_>>(),
        vec![ScheduleId::new(3), ScheduleId::new(7)]
    );
    assert_eq!(top[0].sold_out_at_ms, t0.timestamp_millis());
    assert_eq!(ranking.rank(ScheduleId::new(7)).await.unwrap(), Some(2));
    assert_eq!(ranking.rank(ScheduleId::new(99)).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn redelivered_event_keeps_first_instant() {
    let ranking = get_ranking("test:ranking:nx").await;
    let t0 = Utc::now();

    ranking.record_sold_out(ScheduleId::new(1), t0).await.unwrap();
    ranking
        .record_sold_out(ScheduleId::new(1), t0 + Duration::minutes(5))
        .await
        .unwrap();

    let top = ranking.top(10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].sold_out_at_ms, t0.timestamp_millis());
    assert!(ranking.top(0).await.unwrap().is_empty());
}
