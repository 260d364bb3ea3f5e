use crate::model::{
    Asset, AssetId, AssetPatch, Book, BookId, BookPatch, Chapter, ChapterId, ChapterPatch, ChapterStatus,
    PlacedModel, PlacedModelId,
};
use crate::snapshot::StageSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("{collection} record '{id}' not found")]
    NotFound { collection: &'static str, id: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Remote document store holding the editor's collections.
///
/// Calls block the calling thread; the editor only invokes them from the persistence worker.
pub trait BackendStore: Send + Sync {
    fn list_assets(&self) -> Result<Vec<Asset>, BackendError>;
    fn create_asset(&self, asset: &Asset) -> Result<Asset, BackendError>;
    fn patch_asset(&self, id: AssetId, patch: &AssetPatch) -> Result<Asset, BackendError>;
    fn delete_asset(&self, id: AssetId) -> Result<(), BackendError>;

    /// Books with their aggregate chapter status filled in.
    fn list_books(&self) -> Result<Vec<Book>, BackendError>;
    fn create_book(&self, book: &Book) -> Result<Book, BackendError>;
    fn patch_book(&self, id: BookId, patch: &BookPatch) -> Result<Book, BackendError>;
    fn delete_book(&self, id: BookId) -> Result<(), BackendError>;

    /// Chapters of one book ordered by `order_index`, with `placed_model_count` filled in.
    fn list_chapters(&self, book: BookId) -> Result<Vec<Chapter>, BackendError>;
    fn create_chapter(&self, chapter: &Chapter) -> Result<Chapter, BackendError>;
    fn patch_chapter(&self, id: ChapterId, patch: &ChapterPatch) -> Result<Chapter, BackendError>;
    fn delete_chapter(&self, id: ChapterId) -> Result<(), BackendError>;

    /// Placed models of one chapter ordered by `sort_order`.
    fn list_placed_models(&self, chapter: ChapterId) -> Result<Vec<PlacedModel>, BackendError>;
    fn create_placed_model(&self, model: &PlacedModel) -> Result<PlacedModel, BackendError>;
    /// `update` is the wire body: changed columns plus `updated_at`.
    fn patch_placed_model(&self, id: PlacedModelId, update: &serde_json::Value) -> Result<PlacedModel, BackendError>;
    fn delete_placed_model(&self, id: PlacedModelId) -> Result<(), BackendError>;

    fn chapter_model_count(&self, chapter: ChapterId) -> Result<u32, BackendError>;
    fn book_chapter_status(&self, book: BookId) -> Result<ChapterStatus, BackendError>;
}

/// In-process backend over a [`StageSnapshot`], with a switch to simulate outages.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<StageSnapshot>,
    unavailable: AtomicBool,
    patch_log: Mutex<Vec<(PlacedModelId, serde_json::Value)>>,
}

impl MemoryBackend {
    pub fn new(snapshot: StageSnapshot) -> Self {
        Self { state: Mutex::new(snapshot), unavailable: AtomicBool::new(false), patch_log: Mutex::new(Vec::new()) }
    }

    /// While set, every call fails with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Result<StageSnapshot, BackendError> {
        Ok(self.lock()?.clone())
    }

    /// Placed-model update bodies in the order they were accepted.
    pub fn placed_model_patches(&self) -> Vec<(PlacedModelId, serde_json::Value)> {
        self.patch_log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StageSnapshot>, BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend is offline".to_string()));
        }
        self.state.lock().map_err(|_| BackendError::Unavailable("backend state lock poisoned".to_string()))
    }
}

fn not_found(collection: &'static str, id: impl ToString) -> BackendError {
    BackendError::NotFound { collection, id: id.to_string() }
}

fn upsert<T: Clone>(records: &mut Vec<T>, record: &T, same: impl Fn(&T) -> bool) {
    match records.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = record.clone(),
        None => records.push(record.clone()),
    }
}

impl BackendStore for MemoryBackend {
    fn list_assets(&self) -> Result<Vec<Asset>, BackendError> {
        Ok(self.lock()?.assets.clone())
    }

    fn create_asset(&self, asset: &Asset) -> Result<Asset, BackendError> {
        let mut state = self.lock()?;
        upsert(&mut state.assets, asset, |existing| existing.id == asset.id);
        Ok(asset.clone())
    }

    fn patch_asset(&self, id: AssetId, patch: &AssetPatch) -> Result<Asset, BackendError> {
        let mut state = self.lock()?;
        let asset = state.assets.iter_mut().find(|asset| asset.id == id).ok_or_else(|| not_found("assets", id))?;
        patch.apply_to(asset);
        Ok(asset.clone())
    }

    fn delete_asset(&self, id: AssetId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let before = state.assets.len();
        state.assets.retain(|asset| asset.id != id);
        if state.assets.len() == before {
            return Err(not_found("assets", id));
        }
        Ok(())
    }

    fn list_books(&self) -> Result<Vec<Book>, BackendError> {
        let state = self.lock()?;
        Ok(state
            .books
            .iter()
            .map(|book| {
                let mut book = book.clone();
                book.chapter_status = Some(state.chapter_status(book.id));
                book
            })
            .collect())
    }

    fn create_book(&self, book: &Book) -> Result<Book, BackendError> {
        let mut state = self.lock()?;
        upsert(&mut state.books, book, |existing| existing.id == book.id);
        Ok(book.clone())
    }

    fn patch_book(&self, id: BookId, patch: &BookPatch) -> Result<Book, BackendError> {
        let mut state = self.lock()?;
        let book = state.books.iter_mut().find(|book| book.id == id).ok_or_else(|| not_found("books", id))?;
        patch.apply_to(book);
        Ok(book.clone())
    }

    fn delete_book(&self, id: BookId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let before = state.books.len();
        state.books.retain(|book| book.id != id);
        if state.books.len() == before {
            return Err(not_found("books", id));
        }
        let chapters: Vec<ChapterId> =
            state.chapters.iter().filter(|chapter| chapter.book_id == id).map(|chapter| chapter.id).collect();
        state.chapters.retain(|chapter| chapter.book_id != id);
        state.placed_models.retain(|model| !chapters.contains(&model.chapter_id));
        Ok(())
    }

    fn list_chapters(&self, book: BookId) -> Result<Vec<Chapter>, BackendError> {
        let state = self.lock()?;
        let mut chapters: Vec<Chapter> = state
            .chapters
            .iter()
            .filter(|chapter| chapter.book_id == book)
            .map(|chapter| {
                let mut chapter = chapter.clone();
                chapter.placed_model_count = state.chapter_model_count(chapter.id);
                chapter
            })
            .collect();
        chapters.sort_by_key(|chapter| chapter.order_index);
        Ok(chapters)
    }

    fn create_chapter(&self, chapter: &Chapter) -> Result<Chapter, BackendError> {
        let mut state = self.lock()?;
        if !state.books.iter().any(|book| book.id == chapter.book_id) {
            return Err(BackendError::Rejected(format!("chapter references missing book '{}'", chapter.book_id)));
        }
        upsert(&mut state.chapters, chapter, |existing| existing.id == chapter.id);
        Ok(chapter.clone())
    }

    fn patch_chapter(&self, id: ChapterId, patch: &ChapterPatch) -> Result<Chapter, BackendError> {
        let mut state = self.lock()?;
        let count = state.chapter_model_count(id);
        let chapter =
            state.chapters.iter_mut().find(|chapter| chapter.id == id).ok_or_else(|| not_found("chapters", id))?;
        // The count column is derived from placed-model rows, never written.
        ChapterPatch { placed_model_count: None, ..patch.clone() }.apply_to(chapter);
        let mut chapter = chapter.clone();
        chapter.placed_model_count = count;
        Ok(chapter)
    }

    fn delete_chapter(&self, id: ChapterId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let before = state.chapters.len();
        state.chapters.retain(|chapter| chapter.id != id);
        if state.chapters.len() == before {
            return Err(not_found("chapters", id));
        }
        state.placed_models.retain(|model| model.chapter_id != id);
        Ok(())
    }

    fn list_placed_models(&self, chapter: ChapterId) -> Result<Vec<PlacedModel>, BackendError> {
        let state = self.lock()?;
        let mut models: Vec<PlacedModel> =
            state.placed_models.iter().filter(|model| model.chapter_id == chapter).cloned().collect();
        models.sort_by_key(|model| model.sort_order);
        Ok(models)
    }

    fn create_placed_model(&self, model: &PlacedModel) -> Result<PlacedModel, BackendError> {
        let mut state = self.lock()?;
        if !state.chapters.iter().any(|chapter| chapter.id == model.chapter_id) {
            return Err(BackendError::Rejected(format!(
                "placed model references missing chapter '{}'",
                model.chapter_id
            )));
        }
        upsert(&mut state.placed_models, model, |existing| existing.id == model.id);
        Ok(model.clone())
    }

    fn patch_placed_model(&self, id: PlacedModelId, update: &serde_json::Value) -> Result<PlacedModel, BackendError> {
        let Some(fields) = update.as_object() else {
            return Err(BackendError::Rejected("update body must be a JSON object".to_string()));
        };
        let mut state = self.lock()?;
        let model = state
            .placed_models
            .iter_mut()
            .find(|model| model.id == id)
            .ok_or_else(|| not_found("placed_models", id))?;
        let mut row = serde_json::to_value(&*model)?;
        if let Some(row) = row.as_object_mut() {
            for (key, value) in fields {
                if matches!(key.as_str(), "id" | "chapter_id" | "asset_id" | "created_at") {
                    continue;
                }
                row.insert(key.clone(), value.clone());
            }
        }
        *model = serde_json::from_value(row)?;
        let patched = model.clone();
        drop(state);
        if let Ok(mut log) = self.patch_log.lock() {
            log.push((id, update.clone()));
        }
        Ok(patched)
    }

    fn delete_placed_model(&self, id: PlacedModelId) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let before = state.placed_models.len();
        state.placed_models.retain(|model| model.id != id);
        if state.placed_models.len() == before {
            return Err(not_found("placed_models", id));
        }
        Ok(())
    }

    fn chapter_model_count(&self, chapter: ChapterId) -> Result<u32, BackendError> {
        let state = self.lock()?;
        if !state.chapters.iter().any(|existing| existing.id == chapter) {
            return Err(not_found("chapters", chapter));
        }
        Ok(state.chapter_model_count(chapter))
    }

    fn book_chapter_status(&self, book: BookId) -> Result<ChapterStatus, BackendError> {
        let state = self.lock()?;
        if !state.books.iter().any(|existing| existing.id == book) {
            return Err(not_found("books", book));
        }
        Ok(state.chapter_status(book))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetCategory, PlacedModelPatch};
    use chrono::Utc;
    use glam::Vec3;

    fn seeded() -> (MemoryBackend, ChapterId, PlacedModelId) {
        let book = Book::new("Forest Tales", "Mina");
        let chapter = Chapter::new(book.id, "Chapter 1", 0);
        let asset = Asset::new("Fox", "mem://fox", AssetCategory::Character);
        let model = PlacedModel::placed(chapter.id, asset.id, "Fox", Vec3::ZERO, 0);
        let (chapter_id, model_id) = (chapter.id, model.id);
        let backend = MemoryBackend::new(StageSnapshot {
            assets: vec![asset],
            books: vec![book],
            chapters: vec![chapter],
            placed_models: vec![model],
        });
        (backend, chapter_id, model_id)
    }

    #[test]
    fn patch_merges_only_sent_columns() {
        let (backend, _, id) = seeded();
        let patch = PlacedModelPatch { position_x: Some(3.0), trigger_radius: Some(4.5), ..Default::default() };
        let stamp = Utc::now();
        let updated = backend.patch_placed_model(id, &patch.to_update_json(stamp)).expect("patch accepted");
        assert_eq!(updated.position, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(updated.trigger_radius, 4.5);
        assert_eq!(updated.name, "Fox");
        assert_eq!(updated.updated_at, stamp);
        assert_eq!(backend.placed_model_patches().len(), 1);
    }

    #[test]
    fn outage_rejects_every_call() {
        let (backend, chapter, id) = seeded();
        backend.set_unavailable(true);
        assert!(matches!(backend.chapter_model_count(chapter), Err(BackendError::Unavailable(_))));
        assert!(matches!(backend.delete_placed_model(id), Err(BackendError::Unavailable(_))));
        backend.set_unavailable(false);
        assert_eq!(backend.chapter_model_count(chapter), Ok(1));
    }

    #[test]
    fn deleting_chapter_cascades_models() {
        let (backend, chapter, id) = seeded();
        backend.delete_chapter(chapter).expect("delete chapter");
        assert!(matches!(backend.delete_placed_model(id), Err(BackendError::NotFound { .. })));
    }

    #[test]
    fn listing_chapters_fills_counts() {
        let (backend, chapter, _) = seeded();
        let book = backend.snapshot().expect("snapshot").books[0].id;
        let chapters = backend.list_chapters(book).expect("chapters");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id, chapter);
        assert_eq!(chapters[0].placed_model_count, 1);
        let books = backend.list_books().expect("books");
        assert_eq!(books[0].chapter_status, Some(ChapterStatus { total: 1, completed: 1 }));
    }
}
