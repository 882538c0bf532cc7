use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::Api;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use crate::disco::{stopped, Error};
use crate::ingress::ResourceKey;

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Receives the changes of the mirrored ingresses, on the informer task.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, ingress: &Ingress);

    fn on_update(&self, old: &Ingress, new: &Ingress);

    fn on_delete(&self, ingress: &Ingress);
}

/// Read side of the mirrored ingresses.
pub trait IngressStore: Send + Sync {
    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Ingress>, Error>;

    fn list(&self) -> Vec<Ingress>;
}

impl IngressStore for Store<Ingress> {
    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Ingress>, Error> {
        let name = key.name();
        if name.is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }

        let obj_ref = match key.namespace() {
            None => ObjectRef::new(name),
            Some(namespace) => ObjectRef::new(name).within(namespace),
        };

        Ok(self.get(&obj_ref).map(|ingress| Ingress::clone(&ingress)))
    }

    fn list(&self) -> Vec<Ingress> {
        self.state()
            .into_iter()
            .map(|ingress| Ingress::clone(&ingress))
            .collect()
    }
}

/// Becomes ready once the mirrored store holds a full listing.
#[derive(Clone)]
pub struct SyncSignal(watch::Receiver<bool>);

impl SyncSignal {
    /// Returns `false` when the informer went away before it ever synced.
    pub async fn wait(&mut self) -> bool {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                return false;
            }
        }

        true
    }

    #[cfg(test)]
    pub fn has_synced(&self) -> bool {
        *self.0.borrow()
    }
}

/// Applies watcher events to the mirrored store and tells the handler what changed.
pub struct Dispatcher<H> {
    writer: Writer<Ingress>,
    store: Store<Ingress>,
    handler: H,
    synced: watch::Sender<bool>,
}

impl<H: EventHandler> Dispatcher<H> {
    pub fn new(handler: H) -> (Self, Store<Ingress>, SyncSignal) {
        let writer = Writer::default();
        let store = writer.as_reader();
        let (synced, synced_receiver) = watch::channel(false);

        let dispatcher = Self {
            writer,
            store: store.clone(),
            handler,
            synced,
        };

        (dispatcher, store, SyncSignal(synced_receiver))
    }

    pub fn dispatch(&mut self, event: Event<Ingress>) {
        match &event {
            Event::Applied(ingress) => {
                let old = self.store.get(&ObjectRef::from_obj(ingress));

                self.writer.apply_watcher_event(&event);

                match old {
                    None => self.handler.on_add(ingress),
                    Some(old) => self.handler.on_update(&old, ingress),
                }
            }

            Event::Deleted(ingress) => {
                self.writer.apply_watcher_event(&event);

                self.handler.on_delete(ingress);
            }

            Event::Restarted(ingresses) => {
                let mut previous = self
                    .store
                    .state()
                    .into_iter()
                    .map(|ingress| Ingress::clone(&ingress))
                    .map(|ingress| (ObjectRef::from_obj(&ingress), ingress))
                    .collect::<HashMap<_, _>>();

                self.writer.apply_watcher_event(&event);

                for ingress in ingresses {
                    match previous.remove(&ObjectRef::from_obj(ingress)) {
                        None => self.handler.on_add(ingress),
                        Some(old) => self.handler.on_update(&old, ingress),
                    }
                }

                // gone while the watch was broken
                for ingress in previous.into_values() {
                    self.handler.on_delete(&ingress);
                }

                if !*self.synced.borrow() {
                    info!(count = ingresses.len(), "ingress cache synced");

                    let _ = self.synced.send(true);
                }
            }
        }
    }
}

/// The watcher events an [`Informer`] consumes.
pub type EventStream = BoxStream<'static, Result<Event<Ingress>, watcher::Error>>;

/// Watches every ingress `api` can see.
pub fn watch_ingresses(api: Api<Ingress>) -> EventStream {
    watcher(api, ListParams::default()).boxed()
}

/// Keeps the mirrored store up to date from a stream of watcher events.
pub struct Informer<H> {
    events: EventStream,
    dispatcher: Dispatcher<H>,
}

impl<H: EventHandler> Informer<H> {
    pub fn new(events: EventStream, handler: H) -> (Self, Store<Ingress>, SyncSignal) {
        let (dispatcher, store, synced) = Dispatcher::new(handler);

        (Self { events, dispatcher }, store, synced)
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("start to watch ingresses");

        loop {
            let event = tokio::select! {
                _ = stopped(&mut stop) => break,
                event = self.events.next() => event,
            };

            match event {
                None => {
                    error!("ingress watch stream finished, that should not happened");

                    break;
                }

                Some(Err(err)) => {
                    warn!(%err, "watch ingresses failed, retry later");

                    tokio::select! {
                        _ = stopped(&mut stop) => break,
                        _ = time::sleep(WATCH_RETRY_DELAY) => {}
                    }
                }

                Some(Ok(event)) => self.dispatcher.dispatch(event),
            }
        }

        info!("stop watching ingresses");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_channel::mpsc;
    use parking_lot::Mutex;

    use super::*;
    use crate::ingress::fixture::ingress;

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl EventHandler for Recorder {
        fn on_add(&self, ingress: &Ingress) {
            self.events
                .lock()
                .push(format!("add {}", ResourceKey::from_obj(ingress).unwrap()));
        }

        fn on_update(&self, old: &Ingress, new: &Ingress) {
            assert_eq!(ResourceKey::from_obj(old), ResourceKey::from_obj(new));

            self.events
                .lock()
                .push(format!("update {}", ResourceKey::from_obj(new).unwrap()));
        }

        fn on_delete(&self, ingress: &Ingress) {
            self.events
                .lock()
                .push(format!("delete {}", ResourceKey::from_obj(ingress).unwrap()));
        }
    }

    #[tokio::test]
    async fn dispatch_events() {
        let recorder = Recorder::default();
        let (mut dispatcher, store, mut synced) = Dispatcher::new(recorder.clone());

        assert!(!synced.has_synced());

        dispatcher.dispatch(Event::Restarted(vec![
            ingress("default", "a", &[], &["a.example.com"]),
            ingress("default", "b", &[], &["b.example.com"]),
        ]));

        assert!(synced.wait().await);
        assert_eq!(store.list().len(), 2);

        dispatcher.dispatch(Event::Applied(ingress("default", "a", &[], &["c.example.com"])));
        dispatcher.dispatch(Event::Applied(ingress("other", "a", &[], &[])));
        dispatcher.dispatch(Event::Deleted(ingress("default", "b", &[], &[])));

        // b is gone already, other/a disappears while the watch was broken
        dispatcher.dispatch(Event::Restarted(vec![ingress("default", "a", &[], &[])]));

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "add default/a",
                "add default/b",
                "update default/a",
                "add other/a",
                "delete default/b",
                "update default/a",
                "delete other/a",
            ]
        );
    }

    #[tokio::test]
    async fn run_until_stopped() {
        let recorder = Recorder::default();
        let (events, receiver) = mpsc::unbounded();
        let (informer, store, mut synced) = Informer::new(receiver.boxed(), recorder.clone());
        let (stop_sender, stop) = watch::channel(false);

        let task = tokio::spawn(informer.run(stop));

        events
            .unbounded_send(Ok(Event::Applied(ingress("default", "a", &[], &[]))))
            .unwrap();
        events
            .unbounded_send(Ok(Event::Restarted(vec![
                ingress("default", "a", &[], &[]),
                ingress("default", "b", &[], &[]),
            ])))
            .unwrap();

        assert!(time::timeout(Duration::from_secs(1), synced.wait())
            .await
            .unwrap());
        assert_eq!(store.list().len(), 2);

        stop_sender.send(true).unwrap();

        time::timeout(Duration::from_secs(1), task)
            .await
            .expect("informer did not stop")
            .unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec!["add default/a", "update default/a", "add default/b"]
        );
    }

    #[tokio::test]
    async fn finished_stream_never_syncs() {
        let (informer, _, mut synced) = Informer::new(
            futures_util::stream::empty().boxed(),
            Recorder::default(),
        );
        let (_stop_sender, stop) = watch::channel(false);

        informer.run(stop).await;

        assert!(!synced.wait().await);
    }

    #[tokio::test]
    async fn store_lookup_by_key() {
        let (mut dispatcher, store, _) = Dispatcher::new(Recorder::default());

        dispatcher.dispatch(Event::Applied(ingress(
            "default",
            "my-ingress",
            &[],
            &["example.com"],
        )));

        let found = store
            .get_by_key(&ResourceKey::from("default/my-ingress"))
            .unwrap()
            .unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("my-ingress"));

        assert!(store
            .get_by_key(&ResourceKey::from("other/my-ingress"))
            .unwrap()
            .is_none());

        assert!(matches!(
            store.get_by_key(&ResourceKey::from("default/")),
            Err(Error::InvalidKey(_))
        ));
    }
}
