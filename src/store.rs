use crate::events::{EditOrigin, EventBus, SelectionKind, StoreEvent};
use crate::model::{
    AnimationState, Asset, AssetId, AssetPatch, Book, BookId, BookPatch, Chapter, ChapterId, ChapterPatch,
    PlacedModel, PlacedModelId, PlacedModelPatch,
};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

pub trait Record {
    type Id: Copy + Eq + Hash + fmt::Debug;

    fn record_id(&self) -> Self::Id;
}

impl Record for Asset {
    type Id = AssetId;

    fn record_id(&self) -> AssetId {
        self.id
    }
}

impl Record for Book {
    type Id = BookId;

    fn record_id(&self) -> BookId {
        self.id
    }
}

impl Record for Chapter {
    type Id = ChapterId;

    fn record_id(&self) -> ChapterId {
        self.id
    }
}

impl Record for PlacedModel {
    type Id = PlacedModelId;

    fn record_id(&self) -> PlacedModelId {
        self.id
    }
}

/// Records keyed by id that remember the order they were first inserted in.
#[derive(Debug)]
pub struct Collection<T: Record> {
    records: HashMap<T::Id, (u64, T)>,
    next_seq: u64,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self { records: HashMap::new(), next_seq: 0 }
    }
}

impl<T: Record> Collection<T> {
    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.records.get(&id).map(|(_, record)| record)
    }

    fn get_mut(&mut self, id: T::Id) -> Option<&mut T> {
        self.records.get_mut(&id).map(|(_, record)| record)
    }

    pub fn contains(&self, id: T::Id) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts or replaces a record; a replaced record keeps its original position.
    fn upsert(&mut self, record: T) {
        let id = record.record_id();
        if let Some(slot) = self.records.get_mut(&id) {
            slot.1 = record;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(id, (seq, record));
    }

    fn remove(&mut self, id: T::Id) -> Option<T> {
        self.records.remove(&id).map(|(_, record)| record)
    }

    fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> Vec<T::Id> {
        let removed: Vec<T::Id> =
            self.records.iter().filter(|(_, (_, record))| !keep(record)).map(|(id, _)| *id).collect();
        for id in &removed {
            self.records.remove(id);
        }
        removed
    }

    fn seq(&self, id: T::Id) -> u64 {
        self.records.get(&id).map(|(seq, _)| *seq).unwrap_or(u64::MAX)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.records.values().map(|(_, record)| record)
    }

    /// Records in insertion order.
    pub fn ordered(&self) -> Vec<&T> {
        let mut entries: Vec<&(u64, T)> = self.records.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, record)| record).collect()
    }
}

/// A local write the backend may not reflect yet, stamped with the edit generation it was made in.
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    chapter: ChapterId,
    generation: u64,
    removed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub asset: Option<AssetId>,
    pub book: Option<BookId>,
    pub chapter: Option<ChapterId>,
    pub placed_model: Option<PlacedModelId>,
}

/// Single source of truth for editor data. Every mutation is synchronous and is announced on the
/// event bus; unknown ids make patch/remove calls a no-op returning `false`.
#[derive(Debug, Default)]
pub struct EntityStore {
    assets: Collection<Asset>,
    books: Collection<Book>,
    chapters: Collection<Chapter>,
    placed_models: Collection<PlacedModel>,
    selection: Selection,
    animation: AnimationState,
    events: EventBus,
    edit_generation: u64,
    pending_writes: HashMap<PlacedModelId, PendingWrite>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        self.events.drain()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Counter bumped by every local add, patch or removal of a placed model, drag frames included.
    /// Fetches stamped with it know which local writes they cannot contain.
    pub fn edit_generation(&self) -> u64 {
        self.edit_generation
    }

    fn note_user_write(&mut self, id: PlacedModelId, chapter: ChapterId, removed: bool) {
        self.edit_generation += 1;
        self.pending_writes.insert(id, PendingWrite { chapter, generation: self.edit_generation, removed });
    }

    // ---------- assets ----------

    pub fn asset(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn assets(&self) -> Vec<&Asset> {
        self.assets.ordered()
    }

    pub fn set_assets(&mut self, assets: Vec<Asset>) {
        self.assets = Collection::default();
        for asset in assets {
            self.assets.upsert(asset);
        }
        if let Some(selected) = self.selection.asset {
            if !self.assets.contains(selected) {
                self.select_asset(None);
            }
        }
        self.events.push(StoreEvent::AssetsReplaced);
    }

    pub fn add_asset(&mut self, asset: Asset) {
        let id = asset.id;
        self.assets.upsert(asset);
        self.events.push(StoreEvent::AssetChanged { id });
    }

    pub fn patch_asset(&mut self, id: AssetId, patch: &AssetPatch) -> bool {
        let Some(asset) = self.assets.get_mut(id) else {
            return false;
        };
        patch.apply_to(asset);
        self.events.push(StoreEvent::AssetChanged { id });
        true
    }

    pub fn remove_asset(&mut self, id: AssetId) -> bool {
        if self.assets.remove(id).is_none() {
            return false;
        }
        if self.selection.asset == Some(id) {
            self.select_asset(None);
        }
        self.events.push(StoreEvent::AssetRemoved { id });
        true
    }

    // ---------- books ----------

    pub fn book(&self, id: BookId) -> Option<&Book> {
        self.books.get(id)
    }

    pub fn books(&self) -> Vec<&Book> {
        self.books.ordered()
    }

    pub fn set_books(&mut self, books: Vec<Book>) {
        self.books = Collection::default();
        for book in books {
            self.books.upsert(book);
        }
        if let Some(selected) = self.selection.book {
            if !self.books.contains(selected) {
                self.select_book(None);
            }
        }
        self.events.push(StoreEvent::BooksReplaced);
    }

    pub fn add_book(&mut self, book: Book) {
        let id = book.id;
        self.books.upsert(book);
        self.events.push(StoreEvent::BookChanged { id });
    }

    pub fn patch_book(&mut self, id: BookId, patch: &BookPatch) -> bool {
        let Some(book) = self.books.get_mut(id) else {
            return false;
        };
        patch.apply_to(book);
        self.events.push(StoreEvent::BookChanged { id });
        true
    }

    /// Removes the book and, as the backend does, its chapters and their placed models.
    pub fn remove_book(&mut self, id: BookId) -> bool {
        if self.books.remove(id).is_none() {
            return false;
        }
        let chapters: Vec<ChapterId> =
            self.chapters.ordered().into_iter().filter(|chapter| chapter.book_id == id).map(|c| c.id).collect();
        for chapter in chapters {
            self.remove_chapter(chapter);
        }
        if self.selection.book == Some(id) {
            self.select_book(None);
        }
        self.events.push(StoreEvent::BookRemoved { id });
        true
    }

    // ---------- chapters ----------

    pub fn chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.get(id)
    }

    /// Chapters of a book ordered by `order_index`, then insertion order.
    pub fn chapters_of(&self, book: BookId) -> Vec<&Chapter> {
        let mut chapters: Vec<&Chapter> =
            self.chapters.ordered().into_iter().filter(|chapter| chapter.book_id == book).collect();
        chapters.sort_by_key(|chapter| chapter.order_index);
        chapters
    }

    /// Replaces the chapters of `book` (or every chapter when `book` is `None`).
    pub fn set_chapters(&mut self, book: Option<BookId>, chapters: Vec<Chapter>) {
        let dropped = self.chapters.retain(|chapter| match book {
            Some(book) => chapter.book_id != book,
            None => false,
        });
        for chapter in chapters {
            self.chapters.upsert(chapter);
        }
        for id in dropped {
            if !self.chapters.contains(id) {
                self.drop_chapter_models(id);
                if self.selection.chapter == Some(id) {
                    self.select_chapter(None);
                }
            }
        }
        self.events.push(StoreEvent::ChaptersReplaced { book });
    }

    pub fn add_chapter(&mut self, chapter: Chapter) {
        let id = chapter.id;
        self.chapters.upsert(chapter);
        self.events.push(StoreEvent::ChapterAdded { id });
    }

    pub fn patch_chapter(&mut self, id: ChapterId, patch: &ChapterPatch, origin: EditOrigin) -> bool {
        let Some(chapter) = self.chapters.get_mut(id) else {
            return false;
        };
        patch.apply_to(chapter);
        self.events.push(StoreEvent::ChapterPatched { id, patch: patch.clone(), origin });
        true
    }

    pub fn remove_chapter(&mut self, id: ChapterId) -> bool {
        if self.chapters.remove(id).is_none() {
            return false;
        }
        self.drop_chapter_models(id);
        if self.selection.chapter == Some(id) {
            self.select_chapter(None);
        }
        self.events.push(StoreEvent::ChapterRemoved { id });
        true
    }

    fn drop_chapter_models(&mut self, chapter: ChapterId) {
        let removed = self.placed_models.retain(|model| model.chapter_id != chapter);
        self.pending_writes.retain(|_, write| write.chapter != chapter);
        for id in removed {
            if self.selection.placed_model == Some(id) {
                self.select_placed_model(None);
            }
            self.events.push(StoreEvent::PlacedModelRemoved { id, chapter, origin: EditOrigin::Backend });
        }
    }

    // ---------- placed models ----------

    pub fn placed_model(&self, id: PlacedModelId) -> Option<&PlacedModel> {
        self.placed_models.get(id)
    }

    /// Models of a chapter in render order: `sort_order`, ties broken by creation order.
    pub fn placed_models_in(&self, chapter: ChapterId) -> Vec<&PlacedModel> {
        let mut models: Vec<&PlacedModel> =
            self.placed_models.ordered().into_iter().filter(|model| model.chapter_id == chapter).collect();
        models.sort_by_key(|model| model.sort_order);
        models
    }

    /// Number of placed model records currently held for a chapter.
    pub fn live_model_count(&self, chapter: ChapterId) -> usize {
        self.placed_models.values().filter(|model| model.chapter_id == chapter).count()
    }

    /// Replaces the models of one chapter with a fresh backend listing.
    pub fn set_placed_models(&mut self, chapter: ChapterId, models: Vec<PlacedModel>) {
        self.pending_writes.retain(|_, write| write.chapter != chapter);
        self.replace_chapter_models(chapter, models);
    }

    /// Folds in a backend listing requested at edit generation `fetched_at`. Models the user added,
    /// changed or removed after that point keep their local state; everything else takes the
    /// backend's rows.
    pub fn apply_fetched_placed_models(&mut self, chapter: ChapterId, fetched_at: u64, models: Vec<PlacedModel>) {
        let newer: HashMap<PlacedModelId, PendingWrite> = self
            .pending_writes
            .iter()
            .filter(|(_, write)| write.chapter == chapter && write.generation > fetched_at)
            .map(|(id, write)| (*id, *write))
            .collect();
        self.pending_writes.retain(|_, write| write.chapter != chapter || write.generation > fetched_at);
        if !newer.is_empty() {
            log::debug!(target: "store", "keeping {} local edits over a stale listing of {chapter}", newer.len());
        }
        let mut merged: Vec<PlacedModel> = models.into_iter().filter(|model| !newer.contains_key(&model.id)).collect();
        for (id, write) in &newer {
            if write.removed {
                continue;
            }
            if let Some(local) = self.placed_models.get(*id) {
                merged.push(local.clone());
            }
        }
        self.replace_chapter_models(chapter, merged);
    }

    fn replace_chapter_models(&mut self, chapter: ChapterId, models: Vec<PlacedModel>) {
        let mut models = models;
        models.sort_by_key(|model| model.sort_order);
        self.placed_models.retain(|model| model.chapter_id != chapter);
        for model in models.into_iter().filter(|model| model.chapter_id == chapter) {
            self.placed_models.upsert(model);
        }
        if let Some(selected) = self.selection.placed_model {
            if !self.placed_models.contains(selected) {
                self.select_placed_model(None);
            }
        }
        self.events.push(StoreEvent::PlacedModelsReplaced { chapter });
    }

    pub fn add_placed_model(&mut self, model: PlacedModel, origin: EditOrigin) {
        let id = model.id;
        if origin == EditOrigin::User {
            self.note_user_write(id, model.chapter_id, false);
        }
        self.placed_models.upsert(model);
        self.events.push(StoreEvent::PlacedModelAdded { id, origin });
    }

    /// Merges only the fields present in `patch` into the stored record.
    pub fn patch_placed_model(&mut self, id: PlacedModelId, patch: &PlacedModelPatch, origin: EditOrigin) -> bool {
        if patch.is_empty() {
            return self.placed_models.contains(id);
        }
        let Some(model) = self.placed_models.get_mut(id) else {
            return false;
        };
        patch.apply_to(model);
        let chapter = model.chapter_id;
        if origin != EditOrigin::Backend {
            self.note_user_write(id, chapter, false);
        }
        self.events.push(StoreEvent::PlacedModelPatched { id, patch: patch.clone(), origin });
        true
    }

    pub fn remove_placed_model(&mut self, id: PlacedModelId, origin: EditOrigin) -> Option<PlacedModel> {
        let removed = self.placed_models.remove(id)?;
        if origin == EditOrigin::User {
            self.note_user_write(id, removed.chapter_id, true);
        }
        if self.selection.placed_model == Some(id) {
            self.select_placed_model(None);
        }
        self.events.push(StoreEvent::PlacedModelRemoved { id, chapter: removed.chapter_id, origin });
        Some(removed)
    }

    /// Creation rank used to break `sort_order` ties.
    pub fn creation_rank(&self, id: PlacedModelId) -> u64 {
        self.placed_models.seq(id)
    }

    // ---------- selection ----------

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_asset(&self) -> Option<&Asset> {
        self.selection.asset.and_then(|id| self.assets.get(id))
    }

    pub fn selected_book(&self) -> Option<&Book> {
        self.selection.book.and_then(|id| self.books.get(id))
    }

    pub fn selected_chapter(&self) -> Option<&Chapter> {
        self.selection.chapter.and_then(|id| self.chapters.get(id))
    }

    pub fn selected_placed_model(&self) -> Option<&PlacedModel> {
        self.selection.placed_model.and_then(|id| self.placed_models.get(id))
    }

    /// Selecting an id that is not in the store clears the selection.
    pub fn select_asset(&mut self, id: Option<AssetId>) {
        let id = id.filter(|id| self.assets.contains(*id));
        if self.selection.asset != id {
            self.selection.asset = id;
            self.events.push(StoreEvent::SelectionChanged { kind: SelectionKind::Asset });
        }
    }

    pub fn select_book(&mut self, id: Option<BookId>) {
        let id = id.filter(|id| self.books.contains(*id));
        if self.selection.book != id {
            self.selection.book = id;
            self.events.push(StoreEvent::SelectionChanged { kind: SelectionKind::Book });
        }
    }

    pub fn select_chapter(&mut self, id: Option<ChapterId>) {
        let id = id.filter(|id| self.chapters.contains(*id));
        if self.selection.chapter != id {
            self.selection.chapter = id;
            self.events.push(StoreEvent::SelectionChanged { kind: SelectionKind::Chapter });
        }
    }

    pub fn select_placed_model(&mut self, id: Option<PlacedModelId>) {
        let id = id.filter(|id| self.placed_models.contains(*id));
        if self.selection.placed_model != id {
            self.selection.placed_model = id;
            self.events.push(StoreEvent::SelectionChanged { kind: SelectionKind::PlacedModel });
        }
    }

    // ---------- animation state ----------

    pub fn animation_state(&self) -> &AnimationState {
        &self.animation
    }

    pub fn set_available_animations(&mut self, names: Vec<String>) {
        self.animation.available_animations = names;
        self.events.push(StoreEvent::AnimationStateChanged);
    }

    pub fn set_current_animation(&mut self, name: Option<String>) {
        self.animation.current_animation = name;
        self.events.push(StoreEvent::AnimationStateChanged);
    }

    pub fn set_animation_playing(&mut self, playing: bool) {
        self.animation.is_playing = playing;
        self.events.push(StoreEvent::AnimationStateChanged);
    }

    /// Non-positive or non-finite speeds are ignored.
    pub fn set_animation_speed(&mut self, speed: f32) -> bool {
        if !speed.is_finite() || speed <= 0.0 {
            log::debug!(target: "store", "ignoring animation speed {speed}");
            return false;
        }
        self.animation.speed = speed;
        self.events.push(StoreEvent::AnimationStateChanged);
        true
    }

    pub fn set_animation_loop(&mut self, looped: bool) {
        self.animation.looped = looped;
        self.events.push(StoreEvent::AnimationStateChanged);
    }

    /// Replaces the whole playback state, e.g. with the configured defaults when the displayed asset changes.
    pub fn reset_animation_state(&mut self, baseline: AnimationState) {
        self.animation = baseline;
        self.events.push(StoreEvent::AnimationStateChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetCategory;
    use glam::Vec3;

    fn seeded() -> (EntityStore, ChapterId, AssetId) {
        let mut store = EntityStore::new();
        let book = Book::new("Forest Tales", "Mina");
        let chapter = Chapter::new(book.id, "Chapter 1", 0);
        let asset = Asset::new("Fox", "file:///assets/fox.glb", AssetCategory::Character);
        let (chapter_id, asset_id) = (chapter.id, asset.id);
        store.add_book(book);
        store.add_chapter(chapter);
        store.add_asset(asset);
        store.drain_events();
        (store, chapter_id, asset_id)
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let (mut store, chapter, asset) = seeded();
        let model = PlacedModel::placed(chapter, asset, "Fox", Vec3::new(1.0, 0.0, 1.0), 0);
        let id = model.id;
        store.add_placed_model(model, EditOrigin::Backend);
        let patch = PlacedModelPatch { position_x: Some(5.0), ..PlacedModelPatch::default() };
        assert!(store.patch_placed_model(id, &patch, EditOrigin::User));
        let stored = store.placed_model(id).expect("model stays");
        assert_eq!(stored.position, Vec3::new(5.0, 0.0, 1.0));
        assert_eq!(stored.name, "Fox");
    }

    #[test]
    fn unknown_ids_are_noops() {
        let (mut store, _, _) = seeded();
        let patch = PlacedModelPatch::uniform_scale(2.0);
        assert!(!store.patch_placed_model(PlacedModelId::new(), &patch, EditOrigin::User));
        assert!(store.remove_placed_model(PlacedModelId::new(), EditOrigin::User).is_none());
        assert!(!store.remove_asset(AssetId::new()));
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn removing_selected_model_clears_selection() {
        let (mut store, chapter, asset) = seeded();
        let model = PlacedModel::placed(chapter, asset, "Fox", Vec3::ZERO, 0);
        let id = model.id;
        store.add_placed_model(model, EditOrigin::Backend);
        store.select_placed_model(Some(id));
        assert_eq!(store.selection().placed_model, Some(id));
        store.remove_placed_model(id, EditOrigin::User);
        assert_eq!(store.selection().placed_model, None);
        assert!(store.selected_placed_model().is_none());
    }

    #[test]
    fn removing_chapter_cascades_models_and_selection() {
        let (mut store, chapter, asset) = seeded();
        let model = PlacedModel::placed(chapter, asset, "Fox", Vec3::ZERO, 0);
        let id = model.id;
        store.add_placed_model(model, EditOrigin::Backend);
        store.select_chapter(Some(chapter));
        store.select_placed_model(Some(id));
        assert!(store.remove_chapter(chapter));
        assert!(store.placed_model(id).is_none());
        assert_eq!(store.selection(), Selection::default());
    }

    #[test]
    fn placed_models_order_by_sort_order_then_creation() {
        let (mut store, chapter, asset) = seeded();
        let late = PlacedModel::placed(chapter, asset, "late", Vec3::ZERO, 1);
        let first = PlacedModel::placed(chapter, asset, "first", Vec3::ZERO, 0);
        let tie = PlacedModel::placed(chapter, asset, "tie", Vec3::ZERO, 1);
        store.add_placed_model(late, EditOrigin::Backend);
        store.add_placed_model(first, EditOrigin::Backend);
        store.add_placed_model(tie, EditOrigin::Backend);
        let names: Vec<&str> = store.placed_models_in(chapter).iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["first", "late", "tie"]);
    }

    #[test]
    fn selecting_unknown_id_clears_selection() {
        let (mut store, chapter, _) = seeded();
        store.select_chapter(Some(chapter));
        store.select_chapter(Some(ChapterId::new()));
        assert!(store.selected_chapter().is_none());
    }

    #[test]
    fn invalid_speed_is_rejected() {
        let (mut store, _, _) = seeded();
        assert!(!store.set_animation_speed(0.0));
        assert!(!store.set_animation_speed(f32::NAN));
        assert!(store.set_animation_speed(1.5));
        assert_eq!(store.animation_state().speed, 1.5);
    }

    #[test]
    fn stale_listing_keeps_newer_user_writes() {
        let (mut store, chapter, asset) = seeded();
        let kept = PlacedModel::placed(chapter, asset, "kept", Vec3::ZERO, 0);
        let doomed = PlacedModel::placed(chapter, asset, "doomed", Vec3::ZERO, 1);
        let listing = vec![kept.clone(), doomed.clone()];
        store.set_placed_models(chapter, listing.clone());
        let fetched_at = store.edit_generation();

        let added = PlacedModel::placed(chapter, asset, "added", Vec3::X, 2);
        let added_id = added.id;
        store.add_placed_model(added, EditOrigin::User);
        store.patch_placed_model(kept.id, &PlacedModelPatch::uniform_scale(2.0), EditOrigin::User);
        store.remove_placed_model(doomed.id, EditOrigin::User);
        assert!(store.edit_generation() > fetched_at);

        store.apply_fetched_placed_models(chapter, fetched_at, listing.clone());
        let names: Vec<&str> = store.placed_models_in(chapter).iter().map(|model| model.name.as_str()).collect();
        assert_eq!(names, vec!["kept", "added"]);
        assert_eq!(store.placed_model(kept.id).expect("kept").scale, Vec3::splat(2.0));
        assert!(store.placed_model(added_id).is_some());

        // A listing requested after the writes is authoritative again.
        let current = store.edit_generation();
        store.apply_fetched_placed_models(chapter, current, listing);
        assert_eq!(store.placed_model(kept.id).expect("kept").scale, Vec3::ONE);
        assert!(store.placed_model(added_id).is_none());
    }
}
