use itertools::Itertools;
use k8s_openapi::api::networking::v1::Ingress;
use tracing::{debug, error, info};

use crate::disco::informer::EventHandler;
use crate::disco::queue::WorkQueue;
use crate::ingress::{self, ResourceKey};

/// Turns ingress notifications into queue keys.
#[derive(Clone)]
pub struct ChangeFeed {
    queue: WorkQueue,
}

impl ChangeFeed {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn enqueue(&self, ingress: &Ingress) {
        match ResourceKey::from_obj(ingress) {
            None => error!(
                namespace = ?ingress.metadata.namespace,
                "couldn't add ingress without name"
            ),
            Some(key) => self.queue.add(key),
        }
    }
}

impl EventHandler for ChangeFeed {
    fn on_add(&self, ingress: &Ingress) {
        debug!(
            namespace = ?ingress.metadata.namespace,
            name = ?ingress.metadata.name,
            "ingress added"
        );

        self.enqueue(ingress);
    }

    fn on_update(&self, old: &Ingress, new: &Ingress) {
        if !ingress::needs_update(old, new) {
            debug!(
                namespace = ?new.metadata.namespace,
                name = ?new.metadata.name,
                "nothing changed, no need to update ingress"
            );

            return;
        }

        debug!(
            namespace = ?new.metadata.namespace,
            name = ?new.metadata.name,
            "ingress updated"
        );

        self.enqueue(new);
    }

    // records are never removed, only report what the ingress governed
    fn on_delete(&self, ingress: &Ingress) {
        let hosts = ingress::hosts(ingress);

        if hosts.is_empty() {
            info!(
                namespace = ?ingress.metadata.namespace,
                name = ?ingress.metadata.name,
                "ingress was deleted and didn't contain rules for hosts"
            );

            return;
        }

        info!(
            namespace = ?ingress.metadata.namespace,
            name = ?ingress.metadata.name,
            hosts = %hosts.iter().join(", "),
            "ingress was deleted and contains rules for hosts"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ingress::fixture::ingress;

    fn feed() -> (ChangeFeed, WorkQueue) {
        let queue = WorkQueue::new(Duration::from_secs(30), Duration::from_secs(600));

        (ChangeFeed::new(queue.clone()), queue)
    }

    #[tokio::test]
    async fn add_enqueues() {
        let (feed, queue) = feed();

        feed.on_add(&ingress("default", "my-ingress", &[], &[]));
        feed.on_add(&ingress("default", "my-ingress", &[], &[]));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.get().await,
            Some(ResourceKey::from("default/my-ingress"))
        );
    }

    #[tokio::test]
    async fn unchanged_update_is_dropped() {
        let (feed, queue) = feed();

        let old = ingress("default", "my-ingress", &[("disco", "true")], &["example.com"]);
        let mut new = old.clone();
        new.metadata.resource_version = Some("2".to_string());

        feed.on_update(&old, &new);
        assert!(queue.is_empty());

        let new = ingress("default", "my-ingress", &[("disco", "true")], &["example.org"]);
        feed.on_update(&old, &new);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn delete_never_enqueues() {
        let (feed, queue) = feed();

        feed.on_delete(&ingress("default", "my-ingress", &[("disco", "true")], &["example.com"]));
        feed.on_delete(&ingress("default", "empty", &[], &[]));

        assert!(queue.is_empty());
    }
}
