use crate::camera3d::{Camera3D, Ray, ViewportRect};
use crate::config::PlacementConfig;
use crate::model::{AssetCategory, AssetId, ChapterId, PlacedModel, PlacedModelId, MAX_MODELS_PER_CHAPTER};
use crate::store::EntityStore;
use glam::{Vec2, Vec3};
use std::collections::HashMap;
use std::sync::mpsc;
use thiserror::Error;

pub const PAYLOAD_ASSET_ID: &str = "assetId";
pub const PAYLOAD_ASSET_NAME: &str = "assetName";
pub const PAYLOAD_CATEGORY: &str = "category";

/// Drag-and-drop payload carried from the asset list to the viewport or a chapter row.
#[derive(Debug, Clone, PartialEq)]
pub struct DropPayload {
    pub asset_id: AssetId,
    pub asset_name: String,
    pub category: AssetCategory,
}

impl DropPayload {
    pub fn new(asset_id: AssetId, asset_name: impl Into<String>, category: AssetCategory) -> Self {
        Self { asset_id, asset_name: asset_name.into(), category }
    }

    /// Plain string key/value pairs as they travel through the drag data transfer.
    pub fn to_pairs(&self) -> HashMap<String, String> {
        HashMap::from([
            (PAYLOAD_ASSET_ID.to_string(), self.asset_id.to_string()),
            (PAYLOAD_ASSET_NAME.to_string(), self.asset_name.clone()),
            (PAYLOAD_CATEGORY.to_string(), self.category.as_str().to_string()),
        ])
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Option<Self> {
        let asset_id = pairs.get(PAYLOAD_ASSET_ID)?.parse().ok()?;
        let asset_name = pairs.get(PAYLOAD_ASSET_NAME).cloned().unwrap_or_default();
        let category = pairs.get(PAYLOAD_CATEGORY).map(|raw| AssetCategory::parse(raw)).unwrap_or_default();
        Some(Self { asset_id, asset_name, category })
    }
}

/// A drop gesture ending over the 3D viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct DropEvent {
    pub pointer: Vec2,
    pub viewport: ViewportRect,
    pub payload: DropPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlacementRejection {
    #[error("chapter {chapter} already holds the maximum of {limit} models")]
    CapacityReached { chapter: ChapterId, limit: usize },
}

/// User-visible placement notifications, delivered through the channel handed to the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementNotice {
    Rejected(PlacementRejection),
    Placed { chapter: ChapterId, model: PlacedModelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoChapterSelected,
    UnknownChapter,
    EnvironmentAsset,
    MissedGround,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub chapter: ChapterId,
    pub asset: AssetId,
    pub name: String,
    pub position: Vec3,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropDecision {
    Ignored(IgnoreReason),
    Rejected(PlacementRejection),
    Place(PlacementRequest),
}

/// Intersects `ray` with the horizontal plane `y = height`; hits behind the origin are discarded.
pub fn intersect_ground_plane(ray: &Ray, height: f32) -> Option<Vec3> {
    let denom = Vec3::Y.dot(ray.direction);
    if denom.abs() < 1e-4 {
        return None;
    }
    let t = (height - ray.origin.y) / denom;
    if t < 0.0 {
        return None;
    }
    let mut hit = ray.point_at(t);
    hit.y = height;
    Some(hit)
}

/// Turns drops into placement requests after checking the chapter guards.
#[derive(Debug)]
pub struct PlacementResolver {
    config: PlacementConfig,
    notices: mpsc::Sender<PlacementNotice>,
}

impl PlacementResolver {
    pub fn new(config: PlacementConfig, notices: mpsc::Sender<PlacementNotice>) -> Self {
        Self { config, notices }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Resolves a viewport drop against the selected chapter.
    pub fn resolve_drop(&self, drop: &DropEvent, camera: &Camera3D, store: &EntityStore) -> DropDecision {
        let chapter = match self.guard(store.selection().chapter, drop.payload.category, store) {
            Ok(chapter) => chapter,
            Err(decision) => return decision,
        };
        let Some(position) = camera
            .screen_ray(drop.pointer, &drop.viewport)
            .and_then(|ray| intersect_ground_plane(&ray, self.config.ground_height))
        else {
            log::debug!(target: "placement", "drop at {:?} does not reach the ground plane", drop.pointer);
            return DropDecision::Ignored(IgnoreReason::MissedGround);
        };
        self.request(chapter, &drop.payload, position, store)
    }

    /// Resolves an explicit add (or a drop on a chapter row); the model starts at the origin.
    pub fn resolve_add(&self, chapter: Option<ChapterId>, payload: &DropPayload, store: &EntityStore) -> DropDecision {
        let chapter = match self.guard(chapter, payload.category, store) {
            Ok(chapter) => chapter,
            Err(decision) => return decision,
        };
        let origin = Vec3::new(0.0, self.config.ground_height, 0.0);
        self.request(chapter, payload, origin, store)
    }

    fn guard(
        &self,
        chapter: Option<ChapterId>,
        category: AssetCategory,
        store: &EntityStore,
    ) -> Result<ChapterId, DropDecision> {
        let Some(chapter) = chapter else {
            log::debug!(target: "placement", "drop ignored: no chapter selected");
            return Err(DropDecision::Ignored(IgnoreReason::NoChapterSelected));
        };
        if store.chapter(chapter).is_none() {
            return Err(DropDecision::Ignored(IgnoreReason::UnknownChapter));
        }
        if category == AssetCategory::Environment {
            log::debug!(target: "placement", "drop ignored: environment assets go to the chapter slot");
            return Err(DropDecision::Ignored(IgnoreReason::EnvironmentAsset));
        }
        if model_count(chapter, store) >= MAX_MODELS_PER_CHAPTER {
            let rejection = PlacementRejection::CapacityReached { chapter, limit: MAX_MODELS_PER_CHAPTER };
            log::info!(target: "placement", "{rejection}");
            self.notify(PlacementNotice::Rejected(rejection));
            return Err(DropDecision::Rejected(rejection));
        }
        Ok(chapter)
    }

    fn request(&self, chapter: ChapterId, payload: &DropPayload, position: Vec3, store: &EntityStore) -> DropDecision {
        let sort_order = model_count(chapter, store) as i32;
        log::debug!(
            target: "placement",
            "placing asset {} in chapter {chapter} at {position:?} (sort_order {sort_order})",
            payload.asset_id
        );
        DropDecision::Place(PlacementRequest {
            chapter,
            asset: payload.asset_id,
            name: payload.asset_name.clone(),
            position,
            sort_order,
        })
    }

    /// Builds the record for an accepted request with the configured defaults.
    pub fn build_model(&self, request: &PlacementRequest) -> PlacedModel {
        let name = request.name.clone();
        let mut model = PlacedModel::placed(request.chapter, request.asset, name, request.position, request.sort_order);
        model.trigger_radius = self.config.default_trigger_radius;
        model.animation_key = Some(self.config.default_animation_key.clone()).filter(|key| !key.is_empty());
        model
    }

    pub fn notify(&self, notice: PlacementNotice) {
        if self.notices.send(notice).is_err() {
            log::debug!(target: "placement", "placement notice dropped: receiver closed");
        }
    }
}

/// Models a chapter holds: the live records, or the backend-derived count when that is higher
/// (the chapter's models may not be loaded yet).
pub fn model_count(chapter: ChapterId, store: &EntityStore) -> usize {
    let live = store.live_model_count(chapter);
    let derived = store.chapter(chapter).map(|chapter| chapter.placed_model_count as usize).unwrap_or(0);
    live.max(derived)
}
