use chapter_stage::assets::MemoryAssetLoader;
use chapter_stage::backend::MemoryBackend;
use chapter_stage::camera3d::{Camera3D, ViewportRect};
use chapter_stage::config::{PlacementConfig, StageConfig};
use chapter_stage::model::{
    Asset, AssetCategory, AssetId, Book, Chapter, ChapterId, PlacedModel, MAX_MODELS_PER_CHAPTER,
};
use chapter_stage::placement::{
    DropDecision, DropEvent, DropPayload, IgnoreReason, PlacementNotice, PlacementRejection, PlacementResolver,
};
use chapter_stage::snapshot::StageSnapshot;
use chapter_stage::store::EntityStore;
use chapter_stage::EditorSession;
use glam::{Vec2, Vec3};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Stage {
    session: EditorSession,
    backend: Arc<MemoryBackend>,
    chapter: ChapterId,
    prop_a: Asset,
    prop_b: Asset,
    forest: Asset,
}

fn stage_with_models(existing: usize) -> Stage {
    let book = Book::new("Forest Tales", "Mina");
    let chapter = Chapter::new(book.id, "Chapter 1", 0);
    let fox = Asset::new("Fox", "mem://fox", AssetCategory::Character);
    let prop_a = Asset::new("Lantern", "mem://lantern", AssetCategory::Prop);
    let prop_b = Asset::new("Barrel", "mem://barrel", AssetCategory::Prop);
    let forest = Asset::new("Forest", "mem://forest", AssetCategory::Environment);
    let placed = (0..existing)
        .map(|index| PlacedModel::placed(chapter.id, fox.id, format!("Fox {index}"), Vec3::ZERO, index as i32))
        .collect();
    let backend = Arc::new(MemoryBackend::new(StageSnapshot {
        assets: vec![fox, prop_a.clone(), prop_b.clone(), forest.clone()],
        books: vec![book.clone()],
        chapters: vec![chapter.clone()],
        placed_models: placed,
    }));
    let loader = Arc::new(MemoryAssetLoader::new());
    let mut session = EditorSession::new(StageConfig::default(), backend.clone(), loader);
    session.refresh_catalog();
    session.settle(WAIT);
    session.select_book(Some(book.id));
    session.settle(WAIT);
    assert!(session.open_chapter(chapter.id), "chapter hydrated");
    session.settle(WAIT);
    Stage { session, backend, chapter: chapter.id, prop_a, prop_b, forest }
}

fn centre_drop(asset: &Asset) -> DropEvent {
    DropEvent {
        pointer: Vec2::new(400.0, 300.0),
        viewport: ViewportRect::sized(800.0, 600.0),
        payload: DropPayload::new(asset.id, asset.name.clone(), asset.category),
    }
}

#[test]
fn third_drop_fills_chapter_and_fourth_is_rejected() {
    let mut stage = stage_with_models(2);
    assert_eq!(stage.session.store().live_model_count(stage.chapter), 2);

    let decision = stage.session.drop_asset(&centre_drop(&stage.prop_a));
    let DropDecision::Place(request) = decision else {
        panic!("expected placement, got {decision:?}");
    };
    assert_eq!(request.sort_order, 2);
    assert_eq!(stage.session.store().live_model_count(stage.chapter), 3);
    let placed = stage.session.store().placed_models_in(stage.chapter);
    let newest = placed.last().expect("new model");
    assert_eq!(newest.asset_id, stage.prop_a.id);
    assert_eq!(newest.sort_order, 2);
    assert_eq!(newest.trigger_radius, 2.0);
    assert_eq!(newest.animation_key.as_deref(), Some("Idle"));
    assert!(newest.is_active);
    assert_eq!(newest.position.y, 0.0);
    assert!(newest.position.length() < 1e-3, "centre of viewport lands on the origin: {:?}", newest.position);

    let decision = stage.session.drop_asset(&centre_drop(&stage.prop_b));
    assert!(matches!(decision, DropDecision::Rejected(PlacementRejection::CapacityReached { limit: 3, .. })));
    assert_eq!(stage.session.store().live_model_count(stage.chapter), MAX_MODELS_PER_CHAPTER);

    let notices = stage.session.drain_notices();
    assert!(matches!(notices.first(), Some(PlacementNotice::Placed { .. })));
    assert!(matches!(notices.get(1), Some(PlacementNotice::Rejected(_))));

    stage.session.settle(WAIT);
    let stored = stage.backend.snapshot().expect("backend snapshot");
    assert_eq!(stored.chapter_model_count(stage.chapter), 3);
    assert_eq!(stage.session.store().chapter(stage.chapter).expect("chapter").placed_model_count, 3);
}

#[test]
fn full_chapter_rejects_without_creating_records() {
    let mut stage = stage_with_models(3);
    let decision = stage.session.drop_asset(&centre_drop(&stage.prop_a));
    assert!(matches!(decision, DropDecision::Rejected(_)));
    let explicit = stage.session.add_model_to_chapter(
        stage.chapter,
        &DropPayload::new(stage.prop_b.id, "Barrel", AssetCategory::Prop),
    );
    assert!(matches!(explicit, DropDecision::Rejected(_)));
    stage.session.settle(WAIT);
    assert_eq!(stage.session.store().live_model_count(stage.chapter), 3);
    assert_eq!(stage.backend.snapshot().expect("snapshot").placed_models.len(), 3);
}

#[test]
fn environment_drop_creates_nothing() {
    let mut stage = stage_with_models(0);
    let decision = stage.session.drop_asset(&centre_drop(&stage.forest));
    assert_eq!(decision, DropDecision::Ignored(IgnoreReason::EnvironmentAsset));
    assert_eq!(stage.session.store().live_model_count(stage.chapter), 0);
    assert!(stage.session.drain_notices().is_empty());
}

#[test]
fn drop_without_open_chapter_is_ignored() {
    let mut stage = stage_with_models(0);
    stage.session.close_chapter();
    let decision = stage.session.drop_asset(&centre_drop(&stage.prop_a));
    assert_eq!(decision, DropDecision::Ignored(IgnoreReason::NoChapterSelected));
}

#[test]
fn guards_run_in_order() {
    let (tx, rx) = mpsc::channel();
    let resolver = PlacementResolver::new(PlacementConfig::default(), tx);
    let mut store = EntityStore::new();
    let book = Book::new("Forest Tales", "Mina");
    let mut chapter = Chapter::new(book.id, "Chapter 1", 0);
    // The backend-derived count covers models that are not loaded yet.
    chapter.placed_model_count = 3;
    let chapter_id = chapter.id;
    store.add_book(book);
    store.add_chapter(chapter);
    store.select_chapter(Some(chapter_id));

    let forest = DropPayload::new(AssetId::new(), "Forest", AssetCategory::Environment);
    let drop =
        DropEvent { pointer: Vec2::new(400.0, 300.0), viewport: ViewportRect::sized(800.0, 600.0), payload: forest };
    let camera = Camera3D::default();
    assert_eq!(resolver.resolve_drop(&drop, &camera, &store), DropDecision::Ignored(IgnoreReason::EnvironmentAsset));
    assert!(rx.try_recv().is_err(), "environment drops never warn");

    let prop = DropPayload::new(AssetId::new(), "Barrel", AssetCategory::Prop);
    let drop = DropEvent { payload: prop, ..drop };
    assert!(matches!(resolver.resolve_drop(&drop, &camera, &store), DropDecision::Rejected(_)));
    assert!(matches!(rx.try_recv(), Ok(PlacementNotice::Rejected(PlacementRejection::CapacityReached { .. }))));
}
