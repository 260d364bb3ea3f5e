use crate::backend::{BackendError, BackendStore};
use crate::config::SyncConfig;
use crate::events::{EditOrigin, StoreEvent};
use crate::model::{
    Asset, Book, BookId, BookPatch, Chapter, ChapterId, ChapterPatch, ChapterStatus, PlacedModel, PlacedModelId,
};
use crate::store::EntityStore;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One backend call. Jobs run strictly in submission order on the persistence worker.
#[derive(Debug, Clone)]
pub enum SyncJob {
    /// `update` is the wire body: changed columns plus `updated_at`.
    PatchPlacedModel { id: PlacedModelId, update: serde_json::Value },
    CreatePlacedModel(PlacedModel),
    DeletePlacedModel(PlacedModelId),
    PatchChapter { id: ChapterId, patch: ChapterPatch },
    RefreshChapterCount(ChapterId),
    RefreshBookStatus(BookId),
    /// `generation` is the store's edit generation when the fetch was requested.
    FetchPlacedModels { chapter: ChapterId, generation: u64 },
    FetchAssets,
    FetchBooks,
    FetchChapters(BookId),
}

impl SyncJob {
    pub fn label(&self) -> &'static str {
        match self {
            SyncJob::PatchPlacedModel { .. } => "patch placed model",
            SyncJob::CreatePlacedModel(_) => "create placed model",
            SyncJob::DeletePlacedModel(_) => "delete placed model",
            SyncJob::PatchChapter { .. } => "patch chapter",
            SyncJob::RefreshChapterCount(_) => "refresh chapter count",
            SyncJob::RefreshBookStatus(_) => "refresh book status",
            SyncJob::FetchPlacedModels { .. } => "fetch placed models",
            SyncJob::FetchAssets => "fetch assets",
            SyncJob::FetchBooks => "fetch books",
            SyncJob::FetchChapters(_) => "fetch chapters",
        }
    }
}

/// Result of a finished job, delivered back on the UI thread by [`PersistenceSynchronizer::pump`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAck {
    PlacedModelPatched(PlacedModelId),
    PlacedModelCreated(PlacedModelId),
    PlacedModelDeleted(PlacedModelId),
    ChapterPatched(ChapterId),
    ChapterCount { chapter: ChapterId, count: u32 },
    BookStatus { book: BookId, status: ChapterStatus },
    PlacedModels { chapter: ChapterId, generation: u64, models: Vec<PlacedModel> },
    Assets(Vec<Asset>),
    Books(Vec<Book>),
    Chapters { book: BookId, chapters: Vec<Chapter> },
    Failed { job: &'static str, error: BackendError },
}

/// Status indicator for the editor chrome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Pending(usize),
    Failed(String),
}

fn execute(backend: &dyn BackendStore, job: SyncJob) -> SyncAck {
    let label = job.label();
    let result = match job {
        SyncJob::PatchPlacedModel { id, update } => {
            backend.patch_placed_model(id, &update).map(|_| SyncAck::PlacedModelPatched(id))
        }
        SyncJob::CreatePlacedModel(model) => {
            backend.create_placed_model(&model).map(|created| SyncAck::PlacedModelCreated(created.id))
        }
        SyncJob::DeletePlacedModel(id) => backend.delete_placed_model(id).map(|_| SyncAck::PlacedModelDeleted(id)),
        SyncJob::PatchChapter { id, patch } => backend.patch_chapter(id, &patch).map(|_| SyncAck::ChapterPatched(id)),
        SyncJob::RefreshChapterCount(chapter) => {
            backend.chapter_model_count(chapter).map(|count| SyncAck::ChapterCount { chapter, count })
        }
        SyncJob::RefreshBookStatus(book) => {
            backend.book_chapter_status(book).map(|status| SyncAck::BookStatus { book, status })
        }
        SyncJob::FetchPlacedModels { chapter, generation } => {
            backend.list_placed_models(chapter).map(|models| SyncAck::PlacedModels { chapter, generation, models })
        }
        SyncJob::FetchAssets => backend.list_assets().map(SyncAck::Assets),
        SyncJob::FetchBooks => backend.list_books().map(SyncAck::Books),
        SyncJob::FetchChapters(book) => {
            backend.list_chapters(book).map(|chapters| SyncAck::Chapters { book, chapters })
        }
    };
    result.unwrap_or_else(|error| SyncAck::Failed { job: label, error })
}

struct SyncWorker {
    tx: mpsc::SyncSender<SyncJob>,
    rx: mpsc::Receiver<SyncAck>,
}

impl SyncWorker {
    fn new(backend: Arc<dyn BackendStore>, depth: usize) -> Option<Self> {
        let (tx, rx) = mpsc::sync_channel::<SyncJob>(depth.max(1));
        let (ack_tx, ack_rx) = mpsc::channel();
        let builder = thread::Builder::new().name("persistence-sync".to_string());
        match builder.spawn(move || {
            while let Ok(job) = rx.recv() {
                let ack = execute(backend.as_ref(), job);
                if ack_tx.send(ack).is_err() {
                    break;
                }
            }
        }) {
            Ok(_) => Some(Self { tx, rx: ack_rx }),
            Err(err) => {
                log::error!(target: "sync", "failed to spawn persistence worker: {err:?}");
                None
            }
        }
    }
}

/// Writes accepted user edits through to the backend without blocking the caller.
///
/// Store events are turned into [`SyncJob`]s by [`observe`](Self::observe). A single worker runs them
/// in order, so edits to one model reach the backend in the order they were made. Failures only set
/// the status indicator; the local store keeps the edit.
pub struct PersistenceSynchronizer {
    backend: Arc<dyn BackendStore>,
    worker: Option<SyncWorker>,
    backlog: VecDeque<SyncJob>,
    inline_acks: Vec<SyncAck>,
    in_flight: usize,
    last_error: Option<String>,
    submitted: u64,
}

impl PersistenceSynchronizer {
    pub fn new(backend: Arc<dyn BackendStore>, config: &SyncConfig) -> Self {
        let worker = SyncWorker::new(Arc::clone(&backend), config.worker_queue_depth);
        Self {
            backend,
            worker,
            backlog: VecDeque::new(),
            inline_acks: Vec::new(),
            in_flight: 0,
            last_error: None,
            submitted: 0,
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackendStore> {
        &self.backend
    }

    /// Queues a job behind everything submitted before it.
    pub fn submit(&mut self, job: SyncJob) {
        log::debug!(target: "sync", "queued {}", job.label());
        self.submitted += 1;
        self.in_flight += 1;
        self.backlog.push_back(job);
        self.flush_backlog();
    }

    /// Total jobs submitted since creation.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    fn flush_backlog(&mut self) {
        while let Some(job) = self.backlog.pop_front() {
            let Some(worker) = &self.worker else {
                self.run_inline(job);
                continue;
            };
            match worker.tx.try_send(job) {
                Ok(()) => {}
                Err(mpsc::TrySendError::Full(job)) => {
                    self.backlog.push_front(job);
                    return;
                }
                Err(mpsc::TrySendError::Disconnected(job)) => {
                    log::warn!(target: "sync", "persistence worker is gone; running jobs inline");
                    self.worker = None;
                    self.run_inline(job);
                }
            }
        }
    }

    fn run_inline(&mut self, job: SyncJob) {
        let ack = execute(self.backend.as_ref(), job);
        self.inline_acks.push(ack);
    }

    /// Translates store events into backend jobs. Only [`EditOrigin::User`] mutations are written
    /// through; preview frames and hydrated data are not.
    pub fn observe(&mut self, events: &[StoreEvent], store: &EntityStore) {
        for event in events {
            match event {
                StoreEvent::PlacedModelPatched { id, patch, origin } if origin.persists() => {
                    log::debug!(target: "sync", "write-through {id}: {:?}", patch.changed_fields());
                    self.submit(SyncJob::PatchPlacedModel { id: *id, update: patch.to_update_json(Utc::now()) });
                }
                StoreEvent::PlacedModelAdded { id, origin } if origin.persists() => {
                    let Some(model) = store.placed_model(*id) else {
                        continue;
                    };
                    let chapter = model.chapter_id;
                    self.submit(SyncJob::CreatePlacedModel(model.clone()));
                    self.refresh_counts(chapter, store);
                }
                StoreEvent::PlacedModelRemoved { id, chapter, origin } if origin.persists() => {
                    self.submit(SyncJob::DeletePlacedModel(*id));
                    self.refresh_counts(*chapter, store);
                }
                StoreEvent::ChapterPatched { id, patch, origin } if origin.persists() => {
                    let stored = ChapterPatch { placed_model_count: None, ..patch.clone() };
                    if stored != ChapterPatch::default() {
                        self.submit(SyncJob::PatchChapter { id: *id, patch: stored });
                    }
                }
                _ => {}
            }
        }
    }

    fn refresh_counts(&mut self, chapter: ChapterId, store: &EntityStore) {
        self.submit(SyncJob::RefreshChapterCount(chapter));
        if let Some(book) = store.chapter(chapter).map(|chapter| chapter.book_id) {
            self.submit(SyncJob::RefreshBookStatus(book));
        }
    }

    /// Collects finished jobs and folds fetched data into the store with backend origin.
    pub fn pump(&mut self, store: &mut EntityStore) -> Vec<SyncAck> {
        self.flush_backlog();
        let mut acks = std::mem::take(&mut self.inline_acks);
        if let Some(worker) = &self.worker {
            while let Ok(ack) = worker.rx.try_recv() {
                acks.push(ack);
            }
        }
        for ack in &acks {
            self.apply(ack, store);
        }
        acks
    }

    /// Blocks until every submitted job has finished or `timeout` elapses.
    pub fn drain_blocking(&mut self, store: &mut EntityStore, timeout: Duration) -> Vec<SyncAck> {
        let deadline = Instant::now() + timeout;
        let mut acks = self.pump(store);
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!(target: "sync", "{} persistence jobs still pending after {timeout:?}", self.in_flight);
                break;
            }
            let Some(worker) = &self.worker else {
                acks.extend(self.pump(store));
                continue;
            };
            match worker.rx.recv_timeout(remaining.min(Duration::from_millis(50))) {
                Ok(ack) => {
                    self.apply(&ack, store);
                    acks.push(ack);
                    self.flush_backlog();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => self.flush_backlog(),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    self.worker = None;
                    self.flush_backlog();
                }
            }
        }
        acks
    }

    fn apply(&mut self, ack: &SyncAck, store: &mut EntityStore) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match ack {
            SyncAck::ChapterCount { chapter, count } => {
                store.patch_chapter(*chapter, &ChapterPatch::model_count(*count), EditOrigin::Backend);
            }
            SyncAck::BookStatus { book, status } => {
                store.patch_book(*book, &BookPatch { chapter_status: Some(*status), ..BookPatch::default() });
            }
            SyncAck::PlacedModels { chapter, generation, models } => {
                store.apply_fetched_placed_models(*chapter, *generation, models.clone())
            }
            SyncAck::Assets(assets) => store.set_assets(assets.clone()),
            SyncAck::Books(books) => store.set_books(books.clone()),
            SyncAck::Chapters { book, chapters } => store.set_chapters(Some(*book), chapters.clone()),
            SyncAck::Failed { job, error } => {
                log::warn!(target: "sync", "{job} failed: {error}");
                self.last_error = Some(format!("{job} failed: {error}"));
            }
            SyncAck::PlacedModelPatched(_)
            | SyncAck::PlacedModelCreated(_)
            | SyncAck::PlacedModelDeleted(_)
            | SyncAck::ChapterPatched(_) => {}
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Clears the failure indicator; later successes alone never do.
    pub fn acknowledge_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn status(&self) -> SyncStatus {
        match (&self.last_error, self.in_flight) {
            (Some(message), _) => SyncStatus::Failed(message.clone()),
            (None, 0) => SyncStatus::Idle,
            (None, pending) => SyncStatus::Pending(pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::model::{AssetCategory, PlacedModelPatch};
    use crate::snapshot::StageSnapshot;
    use glam::Vec3;

    const WAIT: Duration = Duration::from_secs(5);

    fn fixture() -> (Arc<MemoryBackend>, EntityStore, PlacedModelId) {
        let book = Book::new("Forest Tales", "Mina");
        let chapter = Chapter::new(book.id, "Chapter 1", 0);
        let asset = Asset::new("Fox", "mem://fox", AssetCategory::Character);
        let model = PlacedModel::placed(chapter.id, asset.id, "Fox", Vec3::ZERO, 0);
        let id = model.id;
        let snapshot = StageSnapshot {
            assets: vec![asset.clone()],
            books: vec![book.clone()],
            chapters: vec![chapter.clone()],
            placed_models: vec![model.clone()],
        };
        let mut store = EntityStore::new();
        store.add_asset(asset);
        store.add_book(book);
        store.add_chapter(chapter);
        store.add_placed_model(model, EditOrigin::Backend);
        store.drain_events();
        (Arc::new(MemoryBackend::new(snapshot)), store, id)
    }

    #[test]
    fn preview_frames_are_not_written() {
        let (backend, mut store, id) = fixture();
        let mut sync = PersistenceSynchronizer::new(backend.clone(), &SyncConfig::default());
        store.patch_placed_model(id, &PlacedModelPatch::position(Vec3::X), EditOrigin::Preview);
        let events = store.drain_events();
        sync.observe(&events, &store);
        assert_eq!(sync.submitted(), 0);
        assert!(backend.placed_model_patches().is_empty());
    }

    #[test]
    fn edits_to_one_model_arrive_in_order() {
        let (backend, mut store, id) = fixture();
        let mut sync = PersistenceSynchronizer::new(backend.clone(), &SyncConfig { worker_queue_depth: 1 });
        for x in [1.0, 2.0, 3.0] {
            let patch = PlacedModelPatch { position_x: Some(x), ..PlacedModelPatch::default() };
            store.patch_placed_model(id, &patch, EditOrigin::User);
        }
        let events = store.drain_events();
        sync.observe(&events, &store);
        sync.drain_blocking(&mut store, WAIT);
        let sent: Vec<f64> = backend
            .placed_model_patches()
            .iter()
            .filter_map(|(_, update)| update.get("position_x").and_then(|value| value.as_f64()))
            .collect();
        assert_eq!(sent, vec![1.0, 2.0, 3.0]);
        assert_eq!(sync.status(), SyncStatus::Idle);
    }

    #[test]
    fn failure_sets_status_until_acknowledged() {
        let (backend, mut store, id) = fixture();
        let mut sync = PersistenceSynchronizer::new(backend.clone(), &SyncConfig::default());
        backend.set_unavailable(true);
        store.patch_placed_model(id, &PlacedModelPatch::uniform_scale(2.0), EditOrigin::User);
        let events = store.drain_events();
        sync.observe(&events, &store);
        let acks = sync.drain_blocking(&mut store, WAIT);
        assert!(matches!(acks.as_slice(), [SyncAck::Failed { error: BackendError::Unavailable(_), .. }]));
        assert!(matches!(sync.status(), SyncStatus::Failed(_)));
        assert_eq!(store.placed_model(id).expect("local edit kept").scale, Vec3::splat(2.0));

        backend.set_unavailable(false);
        store.patch_placed_model(id, &PlacedModelPatch::uniform_scale(3.0), EditOrigin::User);
        let events = store.drain_events();
        sync.observe(&events, &store);
        sync.drain_blocking(&mut store, WAIT);
        assert!(sync.last_error().is_some());
        assert!(sync.acknowledge_error().is_some());
        assert_eq!(sync.status(), SyncStatus::Idle);
    }

    #[test]
    fn fetched_models_replace_the_chapter() {
        let (backend, mut store, id) = fixture();
        let chapter = store.placed_model(id).expect("model").chapter_id;
        store.remove_placed_model(id, EditOrigin::Backend);
        store.drain_events();
        let mut sync = PersistenceSynchronizer::new(backend, &SyncConfig::default());
        sync.submit(SyncJob::FetchPlacedModels { chapter, generation: store.edit_generation() });
        sync.drain_blocking(&mut store, WAIT);
        assert_eq!(store.live_model_count(chapter), 1);
        let events = store.drain_events();
        sync.observe(&events, &store);
        assert_eq!(sync.submitted(), 1);
    }
}
