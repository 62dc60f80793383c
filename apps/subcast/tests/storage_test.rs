mod common;

use std::sync::Arc;

use subcast::config::{StorageBackendKind, StorageSettings};
use subcast::subscriptions::storage::connect;
use subcast::subscriptions::StorageBackend;

async fn backends() -> Vec<(StorageBackendKind, Arc<dyn StorageBackend>)> {
    let mut out = Vec::new();
    for kind in [StorageBackendKind::Cache, StorageBackendKind::Sets] {
        let storage = connect(&StorageSettings::memory(kind)).await.unwrap();
        out.push((kind, storage));
    }
    out
}

#[tokio::test]
async fn stored_subscriber_round_trips() {
    for (kind, storage) in backends().await {
        let mut subscriber = common::post_subscriber("usr_author", Some("usr_1"));
        storage
            .store_subscriber(&mut subscriber, common::TOPIC)
            .await
            .unwrap();
        assert_eq!(subscriber.topic.as_deref(), Some(common::TOPIC));

        let loaded = storage
            .subscriber_by_channel(&subscriber.channel)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{kind:?}: subscriber missing"));

        assert_eq!(loaded.channel, subscriber.channel);
        assert_eq!(loaded.topic.as_deref(), Some(common::TOPIC));
        assert_eq!(loaded.args, subscriber.args);
        assert_eq!(loaded.query, subscriber.query);
        assert_eq!(loaded.operation_name.as_deref(), Some("OnPost"));
        assert_eq!(loaded.context.user().unwrap().id, "usr_1");
        assert_eq!(loaded.context.guard(), Some(subcast::auth::DEFAULT_GUARD));
    }
}

#[tokio::test]
async fn fan_out_counts_per_topic() {
    for (kind, storage) in backends().await {
        for _ in 0..3 {
            let mut s = common::post_subscriber("usr_author", None);
            storage.store_subscriber(&mut s, common::TOPIC).await.unwrap();
        }
        let mut other = common::post_subscriber("usr_author", None);
        storage
            .store_subscriber(&mut other, "ON_POST_DELETED")
            .await
            .unwrap();

        assert_eq!(
            storage.subscribers_by_topic(common::TOPIC).await.unwrap().len(),
            3,
            "{kind:?}"
        );
        assert_eq!(
            storage.subscribers_by_topic("ON_POST_DELETED").await.unwrap().len(),
            1,
            "{kind:?}"
        );
        assert!(storage.subscribers_by_topic("ON_NOTHING").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn deleted_subscriber_leaves_no_trace() {
    for (kind, storage) in backends().await {
        let mut keep = common::post_subscriber("usr_author", None);
        let mut gone = common::post_subscriber("usr_author", None);
        storage.store_subscriber(&mut keep, common::TOPIC).await.unwrap();
        storage.store_subscriber(&mut gone, common::TOPIC).await.unwrap();

        let deleted = storage.delete_subscriber(&gone.channel).await.unwrap();
        assert_eq!(deleted.map(|s| s.channel), Some(gone.channel.clone()), "{kind:?}");

        assert!(storage
            .subscriber_by_channel(&gone.channel)
            .await
            .unwrap()
            .is_none());
        let remaining: Vec<String> = storage
            .subscribers_by_topic(common::TOPIC)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.channel)
            .collect();
        assert_eq!(remaining, vec![keep.channel.clone()], "{kind:?}");

        assert!(storage.delete_subscriber(&gone.channel).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn restoring_under_a_new_topic_moves_the_channel() {
    for (kind, storage) in backends().await {
        let mut subscriber = common::post_subscriber("usr_author", None);
        storage
            .store_subscriber(&mut subscriber, common::TOPIC)
            .await
            .unwrap();
        storage
            .store_subscriber(&mut subscriber, "ON_POST_UPDATED")
            .await
            .unwrap();

        assert!(
            storage.subscribers_by_topic(common::TOPIC).await.unwrap().is_empty(),
            "{kind:?}: channel left behind in old topic"
        );
        let moved = storage.subscribers_by_topic("ON_POST_UPDATED").await.unwrap();
        assert_eq!(moved.len(), 1, "{kind:?}");
        assert_eq!(moved[0].topic.as_deref(), Some("ON_POST_UPDATED"));
    }
}
