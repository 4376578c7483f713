//! One running view of the patient store
//!
//! A view owns its engine instance and shares nothing with other views
//! except the durable blob store and the notification topic. Consistency
//! between views is persist-then-notify: a writer saves its image before
//! announcing, and every other view drops its engine on the announcement so
//! the next read rebuilds from that image.
//!
//! Views in other processes cannot reach the topic. For them the saved image
//! itself is the signal: file-backed stores are watched, and every mutation
//! first checks whether the stored image changed since this view last saw it.
//!
//! A view whose own last save failed keeps its engine on any of these
//! signals and retries the save instead, so nothing it acknowledged is lost.
//!
//! Between a save and its delivery another view can still read its older
//! in-memory state, and two views writing at the same moment overwrite each
//! other's image (last save wins). There is no cross-view locking.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use medblock_bus::{ChannelHub, Notification, NotificationBus, SubscriptionHandle, ViewId};
use medblock_query::{QueryLog, QueryResult};
use medblock_storage::{BlobStore, BlobWatch, FileBlobStore};

use crate::config::Config;
use crate::engine::EngineAdapter;
use crate::gateway::QueryGateway;
use crate::patient::{NewPatient, Patient};
use crate::persistence::{ImageWriter, WriteThrough};
use crate::repository::PatientRepository;
use crate::Result;

pub struct View {
    id: ViewId,
    config: Config,
    engine: Arc<EngineAdapter>,
    bus: Arc<NotificationBus>,
    gateway: Arc<QueryGateway>,
    repository: PatientRepository,
    /// Bumped after every handled notification
    revision: Arc<watch::Sender<u64>>,
    listener: Mutex<Option<SubscriptionHandle>>,
    /// Follows image saves made by other processes
    image_watch: Mutex<Option<JoinHandle<()>>>,
}

impl View {
    /// Open a view on `store`, joining the topic named in `config` on `hub`.
    /// The engine is initialized before this returns.
    pub async fn open(config: Config, store: Arc<dyn BlobStore>, hub: &ChannelHub) -> Result<Self> {
        config.validate()?;

        let id = ViewId::new();
        let bus = Arc::new(NotificationBus::new(hub, &config.channel_name, id)?);
        let writer = ImageWriter::new(Arc::clone(&store), config.image_key.clone());
        let engine = Arc::new(EngineAdapter::new(writer.clone(), config.seed_sample_data));

        let log = load_query_log(store.as_ref(), &config.query_log_key).await;
        let gateway = Arc::new(QueryGateway::new(
            Arc::clone(&engine),
            WriteThrough::new(writer, Arc::clone(&bus)),
            log,
            config.query_log_key.clone(),
            config.delete_policy,
        ));
        let repository = PatientRepository::new(Arc::clone(&gateway));

        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);
        let listener = start_listener(&bus, &engine, &revision);

        let view = Self {
            id,
            config,
            engine,
            bus,
            gateway,
            repository,
            revision,
            listener: Mutex::new(Some(listener)),
            image_watch: Mutex::new(None),
        };

        view.engine.engine().await?;

        match store.watch(&view.config.image_key) {
            Ok(Some(blob_watch)) => {
                let task = start_image_watch(blob_watch, &view.engine, &view.revision, id);
                *view.image_watch.lock() = Some(task);
            }
            Ok(None) => {}
            Err(e) => {
                // Mutations still check the stored image before running
                tracing::warn!(view_id = %id, error = %e, "Image watch unavailable");
            }
        }

        tracing::info!(
            view_id = %view.id,
            channel = %view.config.channel_name,
            "View opened"
        );

        Ok(view)
    }

    /// Open a view backed by files under `config.data_dir`, on the
    /// process-wide channel hub.
    pub async fn open_on_disk(config: Config) -> Result<Self> {
        let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(&config.data_dir));
        Self::open(config, store, ChannelHub::global()).await
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineAdapter> {
        &self.engine
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn repository(&self) -> &PatientRepository {
        &self.repository
    }

    pub fn query_log(&self) -> &QueryLog {
        self.gateway.query_log()
    }

    /// The query log including what other views of the store have saved.
    pub async fn shared_query_log(&self) -> &QueryLog {
        self.gateway.sync_query_log().await
    }

    // === Repository surface ===

    pub async fn add_patient(&self, candidate: NewPatient) -> Result<Patient> {
        self.repository.add_patient(candidate).await
    }

    pub async fn get_all_patients(&self) -> Result<Vec<Patient>> {
        self.repository.get_all_patients().await
    }

    pub async fn get_patient_count(&self) -> Result<i64> {
        self.repository.get_patient_count().await
    }

    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.repository.execute_query(sql).await
    }

    // === Change tracking ===

    /// Number of change notifications handled so far.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that wakes on every handled notification.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Rebuild the engine from the stored image on next access.
    pub fn refresh(&self) {
        self.engine.reset();
        self.revision.send_modify(|r| *r += 1);
    }

    /// Stop listening for notifications and image saves.
    pub fn close(&self) {
        if let Some(task) = self.image_watch.lock().take() {
            task.abort();
        }
        if let Some(mut listener) = self.listener.lock().take() {
            listener.unsubscribe();
            tracing::info!(view_id = %self.id, "View closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.lock().is_none()
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.close();
    }
}

fn start_listener(
    bus: &NotificationBus,
    engine: &Arc<EngineAdapter>,
    revision: &Arc<watch::Sender<u64>>,
) -> SubscriptionHandle {
    let view_id = bus.view_id();
    let engine = Arc::clone(engine);
    let revision = Arc::clone(revision);

    bus.subscribe_with(move |message: Notification| {
        let engine = Arc::clone(&engine);
        let revision = Arc::clone(&revision);

        async move {
            if message.origin != view_id {
                // The writer saved before announcing, so the image is current
                engine.refresh_if_stale().await;
            }
            revision.send_modify(|r| *r += 1);

            tracing::debug!(
                view_id = %view_id,
                kind = %message.kind,
                origin = %message.origin,
                "Handled change notification"
            );
        }
    })
}

fn start_image_watch(
    mut blob_watch: BlobWatch,
    engine: &Arc<EngineAdapter>,
    revision: &Arc<watch::Sender<u64>>,
    view_id: ViewId,
) -> JoinHandle<()> {
    let engine = Arc::clone(engine);
    let revision = Arc::clone(revision);

    tokio::spawn(async move {
        while blob_watch.changed().await.is_some() {
            // Our own saves land here too and compare equal
            if engine.refresh_if_stale().await {
                revision.send_modify(|r| *r += 1);
                tracing::debug!(view_id = %view_id, "Image saved by another process");
            }
        }
    })
}

async fn load_query_log(store: &dyn BlobStore, key: &str) -> QueryLog {
    let bytes = match store.load(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return QueryLog::new(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Failed to load query log");
            return QueryLog::new();
        }
    };

    match QueryLog::from_slice(&bytes) {
        Ok(log) => log,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding unreadable query log");
            QueryLog::new()
        }
    }
}
