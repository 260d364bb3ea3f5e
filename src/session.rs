use crate::animation::AnimationController;
use crate::assets::library::{LoadOutcome, ModelLibrary, ModelSlot};
use crate::assets::{AssetLoader, ModelInstance, PlaceholderShape};
use crate::backend::BackendStore;
use crate::camera3d::Camera3D;
use crate::config::StageConfig;
use crate::events::EditOrigin;
use crate::gizmo::GizmoEvent;
use crate::model::{
    Asset, AssetCategory, AssetId, BookId, ChapterId, ChapterPatch, PlacedModel, PlacedModelId, PlacedModelPatch,
};
use crate::placement::{
    model_count, DropDecision, DropEvent, DropPayload, PlacementNotice, PlacementRequest, PlacementResolver,
};
use crate::store::EntityStore;
use crate::sync::{PersistenceSynchronizer, SyncAck, SyncJob, SyncStatus};
use crate::transform_editor::{GizmoOutcome, PropertyEdit, TransformEditor};
use glam::Mat4;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// What the animation controller is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Placed(PlacedModelId),
    /// Standalone asset preview while no chapter is open.
    Preview(AssetId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    /// Loaded model; one world matrix per scene node.
    Model { node_matrices: Vec<Mat4> },
    Loading,
    Placeholder(PlaceholderShape),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub model: Option<PlacedModelId>,
    pub asset: AssetId,
    pub name: String,
    pub active: bool,
    pub transform: Mat4,
    pub visual: Visual,
}

/// Render list for one frame: the chapter environment plus its placed models in render order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageFrame {
    pub environment: Option<RenderItem>,
    pub items: Vec<RenderItem>,
}

/// Work that landed on the UI thread during [`EditorSession::pump`].
#[derive(Debug, Default)]
pub struct SessionUpdate {
    pub loads: Vec<LoadOutcome>,
    pub acks: Vec<SyncAck>,
}

/// One editor window: owns the store and every component that reads or mutates it.
///
/// All methods run on the caller's thread. Store mutations are visible immediately; backend writes and
/// model loads complete later and are folded in by [`pump`](Self::pump).
pub struct EditorSession {
    config: StageConfig,
    store: EntityStore,
    camera: Camera3D,
    controller: AnimationController,
    editor: TransformEditor,
    resolver: PlacementResolver,
    notices: mpsc::Receiver<PlacementNotice>,
    sync: PersistenceSynchronizer,
    library: ModelLibrary,
    bound: Option<(Binding, String)>,
}

impl EditorSession {
    pub fn new(config: StageConfig, backend: Arc<dyn BackendStore>, loader: Arc<dyn AssetLoader>) -> Self {
        let (notice_tx, notices) = mpsc::channel();
        Self {
            camera: Camera3D::from_config(&config.camera),
            controller: AnimationController::new(config.animation.clone()),
            editor: TransformEditor::new(),
            resolver: PlacementResolver::new(config.placement.clone(), notice_tx),
            notices,
            sync: PersistenceSynchronizer::new(backend, &config.sync),
            library: ModelLibrary::new(loader),
            store: EntityStore::new(),
            bound: None,
            config,
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera3D {
        &mut self.camera
    }

    pub fn controller(&self) -> &AnimationController {
        &self.controller
    }

    pub fn transform_editor(&self) -> &TransformEditor {
        &self.editor
    }

    pub fn binding(&self) -> Option<Binding> {
        self.bound.as_ref().map(|(binding, _)| *binding)
    }

    // ---------- hydration ----------

    /// Fetches assets and books from the backend.
    pub fn refresh_catalog(&mut self) {
        self.sync.submit(SyncJob::FetchAssets);
        self.sync.submit(SyncJob::FetchBooks);
    }

    pub fn select_book(&mut self, book: Option<BookId>) {
        self.store.select_book(book);
        let selected = self.store.selection().book;
        if let Some(chapter) = self.store.selected_chapter() {
            if Some(chapter.book_id) != selected {
                self.store.select_chapter(None);
            }
        }
        if let Some(book) = selected {
            self.sync.submit(SyncJob::FetchChapters(book));
        }
        self.after_mutation();
    }

    /// Selects a chapter and fetches its placed models. Unknown chapters are ignored.
    pub fn open_chapter(&mut self, chapter: ChapterId) -> bool {
        if self.store.chapter(chapter).is_none() {
            log::debug!(target: "session", "cannot open unknown chapter {chapter}");
            return false;
        }
        self.store.select_chapter(Some(chapter));
        if let Some(model) = self.store.selected_placed_model() {
            if model.chapter_id != chapter {
                self.store.select_placed_model(None);
            }
        }
        let generation = self.store.edit_generation();
        self.sync.submit(SyncJob::FetchPlacedModels { chapter, generation });
        self.after_mutation();
        true
    }

    pub fn close_chapter(&mut self) {
        self.store.select_placed_model(None);
        self.store.select_chapter(None);
        self.after_mutation();
    }

    // ---------- selection ----------

    pub fn select_placed_model(&mut self, model: Option<PlacedModelId>) {
        self.store.select_placed_model(model);
        self.after_mutation();
    }

    pub fn select_asset(&mut self, asset: Option<AssetId>) {
        self.store.select_asset(asset);
        self.after_mutation();
    }

    // ---------- edits ----------

    pub fn handle_gizmo(&mut self, event: GizmoEvent) -> GizmoOutcome {
        let outcome = self.editor.handle(event, &mut self.store);
        self.after_mutation();
        outcome
    }

    /// Applies a property-panel edit to the selected placed model.
    pub fn apply_property(&mut self, edit: &PropertyEdit) -> bool {
        let applied = self.editor.apply_property(edit, &mut self.store);
        if applied && matches!(edit, PropertyEdit::AnimationKey(_)) {
            self.follow_animation_key();
        }
        self.after_mutation();
        applied
    }

    /// A changed `animation_key` on the bound model selects that clip, or no clip when the asset lacks it.
    fn follow_animation_key(&mut self) {
        let Some((Binding::Placed(id), _)) = &self.bound else {
            return;
        };
        if !self.controller.is_mounted() {
            return;
        }
        let key = self.store.placed_model(*id).and_then(|model| model.animation_key.clone());
        let available = &self.store.animation_state().available_animations;
        let current = key.filter(|key| available.contains(key));
        self.store.set_current_animation(current);
    }

    /// Resolves a viewport drop and creates the placed model when every guard passes.
    pub fn drop_asset(&mut self, drop: &DropEvent) -> DropDecision {
        let decision = self.resolver.resolve_drop(drop, &self.camera, &self.store);
        self.finish_placement(&decision);
        decision
    }

    /// Adds `payload` to `chapter` at the origin, as the chapter list's add action and row drops do.
    pub fn add_model_to_chapter(&mut self, chapter: ChapterId, payload: &DropPayload) -> DropDecision {
        let decision = self.resolver.resolve_add(Some(chapter), payload, &self.store);
        self.finish_placement(&decision);
        decision
    }

    fn finish_placement(&mut self, decision: &DropDecision) {
        if let DropDecision::Place(request) = decision {
            self.place(request);
        }
        self.after_mutation();
    }

    fn place(&mut self, request: &PlacementRequest) {
        let count = model_count(request.chapter, &self.store) as u32;
        let model = self.resolver.build_model(request);
        let id = model.id;
        log::info!(target: "session", "placed '{}' in chapter {} as model {id}", model.name, request.chapter);
        self.store.add_placed_model(model, EditOrigin::User);
        // Provisional until the backend count refresh lands.
        self.store.patch_chapter(request.chapter, &ChapterPatch::model_count(count + 1), EditOrigin::Backend);
        self.resolver.notify(PlacementNotice::Placed { chapter: request.chapter, model: id });
    }

    pub fn delete_placed_model(&mut self, id: PlacedModelId) -> bool {
        let Some(chapter) = self.store.placed_model(id).map(|model| model.chapter_id) else {
            return false;
        };
        if self.editor.dragged_model() == Some(id) {
            self.editor.cancel();
        }
        let count = model_count(chapter, &self.store) as u32;
        self.store.remove_placed_model(id, EditOrigin::User);
        self.store.patch_chapter(chapter, &ChapterPatch::model_count(count.saturating_sub(1)), EditOrigin::Backend);
        self.after_mutation();
        true
    }

    /// Sets or clears a chapter's environment. Only environment-category assets are accepted.
    pub fn assign_environment(&mut self, chapter: ChapterId, asset: Option<AssetId>) -> bool {
        if self.store.chapter(chapter).is_none() {
            return false;
        }
        if let Some(asset) = asset {
            let Some(record) = self.store.asset(asset) else {
                return false;
            };
            if record.category != AssetCategory::Environment {
                log::debug!(
                    target: "session",
                    "'{}' is a {} asset, not an environment",
                    record.name,
                    record.category
                );
                return false;
            }
            let url = record.storage_url.clone();
            self.library.request(&url);
        }
        self.store.patch_chapter(chapter, &ChapterPatch::environment(asset), EditOrigin::User);
        self.after_mutation();
        true
    }

    // ---------- animation ----------

    /// Selects a clip (or none). Names the loaded asset does not expose are refused.
    pub fn set_current_animation(&mut self, name: Option<&str>) -> bool {
        if let Some(name) = name {
            if !self.store.animation_state().available_animations.iter().any(|clip| clip == name) {
                log::debug!(target: "session", "clip '{name}' is not available");
                return false;
            }
        }
        self.store.set_current_animation(name.map(str::to_string));
        if let Some((Binding::Placed(id), _)) = self.bound.clone() {
            let stale =
                self.store.placed_model(id).map(|model| model.animation_key.as_deref() != name).unwrap_or(false);
            if stale {
                let patch =
                    PlacedModelPatch { animation_key: Some(name.map(str::to_string)), ..PlacedModelPatch::default() };
                self.store.patch_placed_model(id, &patch, EditOrigin::User);
            }
        }
        self.after_mutation();
        true
    }

    pub fn set_animation_playing(&mut self, playing: bool) {
        self.store.set_animation_playing(playing);
        self.after_mutation();
    }

    /// Speeds outside the configured slider range are clamped; non-positive speeds are refused.
    pub fn set_animation_speed(&mut self, speed: f32) -> bool {
        let Some(speed) = self.config.animation.clamp_speed(speed) else {
            log::debug!(target: "session", "ignoring animation speed {speed}");
            return false;
        };
        let applied = self.store.set_animation_speed(speed);
        self.after_mutation();
        applied
    }

    pub fn set_animation_loop(&mut self, looped: bool) {
        self.store.set_animation_loop(looped);
        self.after_mutation();
    }

    pub fn tick(&mut self, dt: f32) {
        self.controller.tick(dt);
    }

    // ---------- async boundaries ----------

    /// Folds finished model loads and backend acks into the session.
    pub fn pump(&mut self) -> SessionUpdate {
        let loads = self.library.pump();
        self.report_failed_loads(&loads);
        let acks = self.sync.pump(&mut self.store);
        self.after_mutation();
        SessionUpdate { loads, acks }
    }

    /// Blocks until pending model loads and every queued backend job have finished.
    pub fn settle(&mut self, timeout: Duration) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        // Loads can bind the controller, which may queue further writes; a few rounds reach a fixpoint.
        for _ in 0..4 {
            update.acks.extend(self.sync.drain_blocking(&mut self.store, timeout));
            self.after_mutation();
            for url in self.library.loading_urls() {
                self.library.wait_for(&url, timeout);
            }
            let loads = self.library.pump();
            self.report_failed_loads(&loads);
            update.loads.extend(loads);
            self.after_mutation();
            if self.sync.pending() == 0 && self.library.loading_urls().is_empty() {
                break;
            }
        }
        update
    }

    fn report_failed_loads(&self, loads: &[LoadOutcome]) {
        for outcome in loads {
            let Err(err) = &outcome.result else {
                continue;
            };
            let category = self
                .store
                .assets()
                .into_iter()
                .find(|asset| asset.storage_url == outcome.url)
                .map(|asset| asset.category)
                .unwrap_or_default();
            log::warn!(
                target: "session",
                "model '{}' unavailable ({err}); drawing {:?} placeholder",
                outcome.url,
                PlaceholderShape::for_category(category)
            );
        }
    }

    /// Resubmits a failed model load for `asset`.
    pub fn retry_load(&mut self, asset: AssetId) {
        if let Some(url) = self.store.asset(asset).map(|asset| asset.storage_url.clone()) {
            self.library.retry(&url);
        }
    }

    pub fn drain_notices(&self) -> Vec<PlacementNotice> {
        self.notices.try_iter().collect()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn acknowledge_sync_error(&mut self) -> Option<String> {
        self.sync.acknowledge_error()
    }

    // ---------- reconciliation ----------

    /// Rebinds the controller to the current selection, pushes the playback state into it, and hands
    /// the pending store events to the synchronizer.
    fn after_mutation(&mut self) {
        self.finish_interrupted_drag();
        self.sync_binding();
        self.controller.apply_state(self.store.animation_state());
        let events = self.store.drain_events();
        if !events.is_empty() {
            self.sync.observe(&events, &self.store);
        }
    }

    /// A drag whose model lost the selection ends here, committing what the user already sees.
    fn finish_interrupted_drag(&mut self) {
        let Some(dragged) = self.editor.dragged_model() else {
            return;
        };
        if self.store.selection().placed_model == Some(dragged) {
            return;
        }
        let outcome = self.editor.finish(&mut self.store);
        log::debug!(target: "session", "drag of {dragged} interrupted by a selection change: {outcome:?}");
    }

    fn desired_binding(&self) -> Option<(Binding, String)> {
        let selection = self.store.selection();
        let (binding, asset) = match (selection.placed_model, selection.chapter, selection.asset) {
            (Some(model), _, _) => {
                let asset = self.store.placed_model(model).map(|model| model.asset_id)?;
                (Binding::Placed(model), asset)
            }
            (None, None, Some(asset)) => (Binding::Preview(asset), asset),
            _ => return None,
        };
        let url = self.store.asset(asset)?.storage_url.clone();
        Some((binding, url))
    }

    fn sync_binding(&mut self) {
        let desired = self.desired_binding();
        if desired != self.bound {
            log::debug!(
                target: "session",
                "animation binding {:?} -> {:?}",
                self.binding(),
                desired.as_ref().map(|(binding, _)| *binding)
            );
            self.controller.unmount(&mut self.store);
            self.bound = desired;
            if let Some((_, url)) = &self.bound {
                let url = url.clone();
                self.library.request(&url);
            }
        }
        self.mount_if_ready();
    }

    fn mount_if_ready(&mut self) {
        if self.controller.is_mounted() {
            return;
        }
        let Some((binding, url)) = self.bound.clone() else {
            return;
        };
        let Some(instance) = self.library.instantiate(&url) else {
            return;
        };
        let persisted = match binding {
            Binding::Placed(id) => self.store.placed_model(id).and_then(|model| model.animation_key.clone()),
            Binding::Preview(_) => None,
        };
        self.controller.mount(instance, persisted.as_deref(), &mut self.store);
    }

    // ---------- render list ----------

    /// Builds the render list for the open chapter, or the asset preview when no chapter is open.
    /// Models whose asset record is missing produce no item.
    pub fn frame(&mut self) -> StageFrame {
        let mut frame = StageFrame::default();
        let Some(chapter) = self.store.selected_chapter().cloned() else {
            if let Some((Binding::Preview(asset), _)) = self.bound.clone() {
                if let Some(asset) = self.store.asset(asset).cloned() {
                    frame.items.push(self.render_item(None, &asset, Mat4::IDENTITY, true));
                }
            }
            return frame;
        };
        if let Some(environment) = chapter.environment_asset_id.and_then(|id| self.store.asset(id).cloned()) {
            frame.environment = Some(self.render_item(None, &environment, Mat4::IDENTITY, false));
        }
        let models: Vec<PlacedModel> = self.store.placed_models_in(chapter.id).into_iter().cloned().collect();
        for model in models {
            let Some(asset) = self.store.asset(model.asset_id).cloned() else {
                log::trace!(target: "session", "model {} references missing asset {}", model.id, model.asset_id);
                continue;
            };
            let bound = self.binding() == Some(Binding::Placed(model.id));
            frame.items.push(self.render_item(Some(&model), &asset, model.world_matrix(), bound));
        }
        frame
    }

    fn render_item(&mut self, model: Option<&PlacedModel>, asset: &Asset, transform: Mat4, bound: bool) -> RenderItem {
        let visual = match self.library.request(&asset.storage_url).clone() {
            ModelSlot::Loading => Visual::Loading,
            ModelSlot::Failed(_) => Visual::Placeholder(PlaceholderShape::for_category(asset.category)),
            ModelSlot::Ready(definition) => {
                let node_matrices = match self.controller.instance() {
                    Some(instance) if bound && *instance.definition().url == *asset.storage_url => {
                        instance.world_matrices(transform)
                    }
                    _ => ModelInstance::new(definition).world_matrices(transform),
                };
                Visual::Model { node_matrices }
            }
        };
        RenderItem {
            model: model.map(|model| model.id),
            asset: asset.id,
            name: model.map(|model| model.name.clone()).unwrap_or_else(|| asset.name.clone()),
            active: model.map(|model| model.is_active).unwrap_or(true),
            transform,
            visual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_support::sliding_model;
    use crate::assets::MemoryAssetLoader;
    use crate::backend::MemoryBackend;
    use crate::model::{Book, Chapter};
    use crate::snapshot::StageSnapshot;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        session: EditorSession,
        backend: Arc<MemoryBackend>,
        chapter: ChapterId,
        fox: Asset,
        forest: Asset,
    }

    fn fixture() -> Fixture {
        let book = Book::new("Forest Tales", "Mina");
        let chapter = Chapter::new(book.id, "Chapter 1", 0);
        let fox = Asset::new("Fox", "mem://fox", AssetCategory::Character);
        let forest = Asset::new("Forest", "mem://forest", AssetCategory::Environment);
        let backend = Arc::new(MemoryBackend::new(StageSnapshot {
            assets: vec![fox.clone(), forest.clone()],
            books: vec![book.clone()],
            chapters: vec![chapter.clone()],
            placed_models: Vec::new(),
        }));
        let loader = MemoryAssetLoader::new().with(sliding_model("mem://fox", &["Idle", "Run"]));
        let mut session = EditorSession::new(StageConfig::default(), backend.clone(), Arc::new(loader));
        session.refresh_catalog();
        session.settle(WAIT);
        session.select_book(Some(book.id));
        session.settle(WAIT);
        assert!(session.open_chapter(chapter.id));
        session.settle(WAIT);
        Fixture { session, backend, chapter: chapter.id, fox, forest }
    }

    fn payload(asset: &Asset) -> DropPayload {
        DropPayload::new(asset.id, asset.name.clone(), asset.category)
    }

    #[test]
    fn added_model_is_written_through() {
        let mut fx = fixture();
        let decision = fx.session.add_model_to_chapter(fx.chapter, &payload(&fx.fox));
        assert!(matches!(decision, DropDecision::Place(_)));
        fx.session.settle(WAIT);
        let snapshot = fx.backend.snapshot().expect("snapshot");
        assert_eq!(snapshot.placed_models.len(), 1);
        assert_eq!(fx.session.store().chapter(fx.chapter).expect("chapter").placed_model_count, 1);
        assert!(matches!(fx.session.drain_notices().as_slice(), [PlacementNotice::Placed { .. }]));
    }

    #[test]
    fn selecting_model_mounts_persisted_clip() {
        let mut fx = fixture();
        fx.session.add_model_to_chapter(fx.chapter, &payload(&fx.fox));
        let id = fx.session.store().placed_models_in(fx.chapter)[0].id;
        fx.session.select_placed_model(Some(id));
        fx.session.settle(WAIT);
        let state = fx.session.store().animation_state();
        assert_eq!(state.available_animations, vec!["Idle".to_string(), "Run".to_string()]);
        assert_eq!(state.current_animation.as_deref(), Some("Idle"));

        fx.session.select_placed_model(None);
        assert!(!fx.session.controller().is_mounted());
        assert!(fx.session.store().animation_state().available_animations.is_empty());
    }

    #[test]
    fn environment_slot_accepts_only_environment_assets() {
        let mut fx = fixture();
        assert!(!fx.session.assign_environment(fx.chapter, Some(fx.fox.id)));
        assert!(fx.session.assign_environment(fx.chapter, Some(fx.forest.id)));
        fx.session.settle(WAIT);
        let stored = fx.backend.snapshot().expect("snapshot");
        assert_eq!(stored.chapters[0].environment_asset_id, Some(fx.forest.id));
        let frame = fx.session.frame();
        let environment = frame.environment.expect("environment item");
        assert_eq!(environment.visual, Visual::Placeholder(PlaceholderShape::Box));
    }

    #[test]
    fn missing_asset_renders_nothing() {
        let mut fx = fixture();
        fx.session.add_model_to_chapter(fx.chapter, &payload(&fx.fox));
        let ghost = Asset::new("Ghost", "mem://ghost", AssetCategory::Prop);
        fx.session.add_model_to_chapter(fx.chapter, &payload(&ghost));
        fx.session.settle(WAIT);
        fx.session.frame();
        fx.session.settle(WAIT);
        let frame = fx.session.frame();
        assert_eq!(frame.items.len(), 1);
        assert!(matches!(frame.items[0].visual, Visual::Model { .. }));
        assert_eq!(frame.items[0].transform, Mat4::IDENTITY);
    }
}
