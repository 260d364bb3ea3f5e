use chrono::{DateTime, Utc};
use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Hard cap on placed models per chapter, enforced before any record is created.
pub const MAX_MODELS_PER_CHAPTER: usize = 3;
pub const DEFAULT_TRIGGER_RADIUS: f32 = 2.0;
pub const DEFAULT_ANIMATION_KEY: &str = "Idle";

/// Axis order used to store rotations as three Euler angles.
pub const EULER_ORDER: EulerRot = EulerRot::XYZ;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

entity_id!(AssetId);
entity_id!(BookId);
entity_id!(ChapterId);
entity_id!(PlacedModelId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetCategory {
    Character,
    Environment,
    Prop,
    General,
}

impl AssetCategory {
    /// Unknown category strings fall back to `General`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "character" => AssetCategory::Character,
            "environment" => AssetCategory::Environment,
            "prop" => AssetCategory::Prop,
            _ => AssetCategory::General,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetCategory::Character => "character",
            AssetCategory::Environment => "environment",
            AssetCategory::Prop => "prop",
            AssetCategory::General => "general",
        }
    }
}

impl Default for AssetCategory {
    fn default() -> Self {
        AssetCategory::General
    }
}

impl From<String> for AssetCategory {
    fn from(value: String) -> Self {
        AssetCategory::parse(&value)
    }
}

impl From<AssetCategory> for String {
    fn from(value: AssetCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_metadata_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default = "default_metadata_scale")]
    pub scale: f32,
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default)]
    pub position: [f32; 3],
}

impl Default for AssetMetadata {
    fn default() -> Self {
        Self { scale: default_metadata_scale(), rotation: [0.0; 3], position: [0.0; 3] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub storage_url: String,
    #[serde(default)]
    pub category: AssetCategory,
    #[serde(default)]
    pub metadata: AssetMetadata,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(name: impl Into<String>, storage_url: impl Into<String>, category: AssetCategory) -> Self {
        Self {
            id: AssetId::new(),
            name: name.into(),
            storage_url: storage_url.into(),
            category,
            metadata: AssetMetadata::default(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetPatch {
    pub name: Option<String>,
    pub category: Option<AssetCategory>,
    pub metadata: Option<AssetMetadata>,
}

impl AssetPatch {
    pub fn apply_to(&self, asset: &mut Asset) {
        if let Some(name) = &self.name {
            asset.name = name.clone();
        }
        if let Some(category) = self.category {
            asset.category = category;
        }
        if let Some(metadata) = &self.metadata {
            asset.metadata = metadata.clone();
        }
    }
}

/// Per-book progress: `completed` counts chapters holding at least one placed model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStatus {
    pub total: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub manuscript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_status: Option<ChapterStatus>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: BookId::new(),
            title: title.into(),
            author: author.into(),
            manuscript: String::new(),
            chapter_status: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub manuscript: Option<String>,
    pub chapter_status: Option<ChapterStatus>,
}

impl BookPatch {
    pub fn apply_to(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(manuscript) = &self.manuscript {
            book.manuscript = manuscript.clone();
        }
        if let Some(status) = self.chapter_status {
            book.chapter_status = Some(status);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub book_id: BookId,
    pub title: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub environment_asset_id: Option<AssetId>,
    /// Derived from the backend join query; refreshed after placements.
    #[serde(default)]
    pub placed_model_count: u32,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Chapter {
    pub fn new(book_id: BookId, title: impl Into<String>, order_index: i32) -> Self {
        Self {
            id: ChapterId::new(),
            book_id,
            title: title.into(),
            order_index,
            content: String::new(),
            environment_asset_id: None,
            placed_model_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChapterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_asset_id: Option<Option<AssetId>>,
    #[serde(skip)]
    pub placed_model_count: Option<u32>,
}

impl ChapterPatch {
    pub fn environment(asset: Option<AssetId>) -> Self {
        Self { environment_asset_id: Some(asset), ..Self::default() }
    }

    pub fn model_count(count: u32) -> Self {
        Self { placed_model_count: Some(count), ..Self::default() }
    }

    pub fn apply_to(&self, chapter: &mut Chapter) {
        if let Some(title) = &self.title {
            chapter.title = title.clone();
        }
        if let Some(order_index) = self.order_index {
            chapter.order_index = order_index;
        }
        if let Some(content) = &self.content {
            chapter.content = content.clone();
        }
        if let Some(environment) = self.environment_asset_id {
            chapter.environment_asset_id = environment;
        }
        if let Some(count) = self.placed_model_count {
            chapter.placed_model_count = count;
        }
    }
}

/// One positioned instance of an asset inside a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PlacedModelRow", into = "PlacedModelRow")]
pub struct PlacedModel {
    pub id: PlacedModelId,
    pub chapter_id: ChapterId,
    pub asset_id: AssetId,
    pub name: String,
    pub position: Vec3,
    /// Euler angles in radians, stored in `EULER_ORDER`.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub trigger_radius: f32,
    pub animation_key: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlacedModel {
    /// Builds a freshly placed model with the default rotation, scale, trigger radius and clip key.
    pub fn placed(
        chapter_id: ChapterId,
        asset_id: AssetId,
        name: impl Into<String>,
        position: Vec3,
        sort_order: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PlacedModelId::new(),
            chapter_id,
            asset_id,
            name: name.into(),
            position,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            trigger_radius: DEFAULT_TRIGGER_RADIUS,
            animation_key: Some(DEFAULT_ANIMATION_KEY.to_string()),
            is_active: true,
            sort_order,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rotation_quat(&self) -> Quat {
        Quat::from_euler(EULER_ORDER, self.rotation.x, self.rotation.y, self.rotation.z)
    }

    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation_quat(), self.position)
    }
}

/// Flat wire shape of a placed model; missing numeric fields take the editor defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlacedModelRow {
    id: PlacedModelId,
    chapter_id: ChapterId,
    asset_id: AssetId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    position_x: Option<f32>,
    #[serde(default)]
    position_y: Option<f32>,
    #[serde(default)]
    position_z: Option<f32>,
    #[serde(default)]
    rotation_x: Option<f32>,
    #[serde(default)]
    rotation_y: Option<f32>,
    #[serde(default)]
    rotation_z: Option<f32>,
    #[serde(default)]
    scale_x: Option<f32>,
    #[serde(default)]
    scale_y: Option<f32>,
    #[serde(default)]
    scale_z: Option<f32>,
    #[serde(default)]
    trigger_radius: Option<f32>,
    #[serde(default)]
    animation_key: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
    #[serde(default)]
    sort_order: Option<i32>,
    #[serde(default)]
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: DateTime<Utc>,
}

impl From<PlacedModelRow> for PlacedModel {
    fn from(row: PlacedModelRow) -> Self {
        let or_zero = |value: Option<f32>| value.filter(|v| v.is_finite()).unwrap_or(0.0);
        let or_one = |value: Option<f32>| value.filter(|v| v.is_finite() && *v != 0.0).unwrap_or(1.0);
        Self {
            id: row.id,
            chapter_id: row.chapter_id,
            asset_id: row.asset_id,
            name: row.name,
            position: Vec3::new(or_zero(row.position_x), or_zero(row.position_y), or_zero(row.position_z)),
            rotation: Vec3::new(or_zero(row.rotation_x), or_zero(row.rotation_y), or_zero(row.rotation_z)),
            scale: Vec3::new(or_one(row.scale_x), or_one(row.scale_y), or_one(row.scale_z)),
            trigger_radius: row
                .trigger_radius
                .filter(|radius| radius.is_finite() && *radius > 0.0)
                .unwrap_or(DEFAULT_TRIGGER_RADIUS),
            animation_key: row.animation_key.filter(|key| !key.is_empty()),
            is_active: row.is_active.unwrap_or(true),
            sort_order: row.sort_order.unwrap_or(0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<PlacedModel> for PlacedModelRow {
    fn from(model: PlacedModel) -> Self {
        Self {
            id: model.id,
            chapter_id: model.chapter_id,
            asset_id: model.asset_id,
            name: model.name,
            position_x: Some(model.position.x),
            position_y: Some(model.position.y),
            position_z: Some(model.position.z),
            rotation_x: Some(model.rotation.x),
            rotation_y: Some(model.rotation.y),
            rotation_z: Some(model.rotation.z),
            scale_x: Some(model.scale.x),
            scale_y: Some(model.scale.y),
            scale_z: Some(model.scale.z),
            trigger_radius: Some(model.trigger_radius),
            animation_key: model.animation_key,
            is_active: Some(model.is_active),
            sort_order: Some(model.sort_order),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Partial update of a placed model. Only `Some` fields are merged or sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlacedModelPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_z: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_z: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_z: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_radius: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_key: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

#[derive(Serialize)]
struct PlacedModelUpdate<'a> {
    #[serde(flatten)]
    patch: &'a PlacedModelPatch,
    updated_at: DateTime<Utc>,
}

impl PlacedModelPatch {
    pub fn position(position: Vec3) -> Self {
        Self {
            position_x: Some(position.x),
            position_y: Some(position.y),
            position_z: Some(position.z),
            ..Self::default()
        }
    }

    pub fn rotation(rotation: Vec3) -> Self {
        Self {
            rotation_x: Some(rotation.x),
            rotation_y: Some(rotation.y),
            rotation_z: Some(rotation.z),
            ..Self::default()
        }
    }

    pub fn scale(scale: Vec3) -> Self {
        Self { scale_x: Some(scale.x), scale_y: Some(scale.y), scale_z: Some(scale.z), ..Self::default() }
    }

    /// Sets all three scale axes in one patch.
    pub fn uniform_scale(value: f32) -> Self {
        Self::scale(Vec3::splat(value))
    }

    /// Patch holding only the fields whose values differ between `before` and `after`.
    pub fn diff(before: &PlacedModel, after: &PlacedModel) -> Self {
        fn changed<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            if a == b {
                None
            } else {
                Some(b.clone())
            }
        }
        Self {
            name: changed(&before.name, &after.name),
            position_x: changed(&before.position.x, &after.position.x),
            position_y: changed(&before.position.y, &after.position.y),
            position_z: changed(&before.position.z, &after.position.z),
            rotation_x: changed(&before.rotation.x, &after.rotation.x),
            rotation_y: changed(&before.rotation.y, &after.rotation.y),
            rotation_z: changed(&before.rotation.z, &after.rotation.z),
            scale_x: changed(&before.scale.x, &after.scale.x),
            scale_y: changed(&before.scale.y, &after.scale.y),
            scale_z: changed(&before.scale.z, &after.scale.z),
            trigger_radius: changed(&before.trigger_radius, &after.trigger_radius),
            animation_key: changed(&before.animation_key, &after.animation_key),
            is_active: changed(&before.is_active, &after.is_active),
            sort_order: changed(&before.sort_order, &after.sort_order),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut push = |set: bool, name: &'static str| {
            if set {
                fields.push(name);
            }
        };
        push(self.name.is_some(), "name");
        push(self.position_x.is_some(), "position_x");
        push(self.position_y.is_some(), "position_y");
        push(self.position_z.is_some(), "position_z");
        push(self.rotation_x.is_some(), "rotation_x");
        push(self.rotation_y.is_some(), "rotation_y");
        push(self.rotation_z.is_some(), "rotation_z");
        push(self.scale_x.is_some(), "scale_x");
        push(self.scale_y.is_some(), "scale_y");
        push(self.scale_z.is_some(), "scale_z");
        push(self.trigger_radius.is_some(), "trigger_radius");
        push(self.animation_key.is_some(), "animation_key");
        push(self.is_active.is_some(), "is_active");
        push(self.sort_order.is_some(), "sort_order");
        fields
    }

    pub fn apply_to(&self, model: &mut PlacedModel) {
        if let Some(name) = &self.name {
            model.name = name.clone();
        }
        set_axis(&mut model.position.x, self.position_x);
        set_axis(&mut model.position.y, self.position_y);
        set_axis(&mut model.position.z, self.position_z);
        set_axis(&mut model.rotation.x, self.rotation_x);
        set_axis(&mut model.rotation.y, self.rotation_y);
        set_axis(&mut model.rotation.z, self.rotation_z);
        set_axis(&mut model.scale.x, self.scale_x);
        set_axis(&mut model.scale.y, self.scale_y);
        set_axis(&mut model.scale.z, self.scale_z);
        set_axis(&mut model.trigger_radius, self.trigger_radius);
        if let Some(key) = &self.animation_key {
            model.animation_key = key.clone();
        }
        if let Some(active) = self.is_active {
            model.is_active = active;
        }
        if let Some(order) = self.sort_order {
            model.sort_order = order;
        }
    }

    /// Later fields win, matching the order edits were made in.
    pub fn merge(&mut self, later: &PlacedModelPatch) {
        fn take<T: Clone>(slot: &mut Option<T>, later: &Option<T>) {
            if later.is_some() {
                *slot = later.clone();
            }
        }
        take(&mut self.name, &later.name);
        take(&mut self.position_x, &later.position_x);
        take(&mut self.position_y, &later.position_y);
        take(&mut self.position_z, &later.position_z);
        take(&mut self.rotation_x, &later.rotation_x);
        take(&mut self.rotation_y, &later.rotation_y);
        take(&mut self.rotation_z, &later.rotation_z);
        take(&mut self.scale_x, &later.scale_x);
        take(&mut self.scale_y, &later.scale_y);
        take(&mut self.scale_z, &later.scale_z);
        take(&mut self.trigger_radius, &later.trigger_radius);
        take(&mut self.animation_key, &later.animation_key);
        take(&mut self.is_active, &later.is_active);
        take(&mut self.sort_order, &later.sort_order);
    }

    /// Wire body of a backend update: the changed fields plus the modification stamp.
    pub fn to_update_json(&self, updated_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::to_value(PlacedModelUpdate { patch: self, updated_at }).unwrap_or(serde_json::Value::Null)
    }
}

fn set_axis(slot: &mut f32, value: Option<f32>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Playback state of the model currently bound to the animation controller.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    pub available_animations: Vec<String>,
    pub current_animation: Option<String>,
    pub is_playing: bool,
    pub speed: f32,
    pub looped: bool,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            available_animations: Vec::new(),
            current_animation: None,
            is_playing: true,
            speed: 1.0,
            looped: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> PlacedModel {
        PlacedModel::placed(ChapterId::new(), AssetId::new(), "Fox", Vec3::new(1.0, 0.0, -2.0), 0)
    }

    #[test]
    fn placed_model_defaults_match_editor_defaults() {
        let model = sample_model();
        assert_eq!(model.scale, Vec3::ONE);
        assert_eq!(model.rotation, Vec3::ZERO);
        assert_eq!(model.trigger_radius, DEFAULT_TRIGGER_RADIUS);
        assert_eq!(model.animation_key.as_deref(), Some("Idle"));
        assert!(model.is_active);
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let before = sample_model();
        let mut after = before.clone();
        after.position.x = 4.0;
        after.rotation.y = 0.5;
        let patch = PlacedModelPatch::diff(&before, &after);
        assert_eq!(patch.changed_fields(), vec!["position_x", "rotation_y"]);
        let mut replay = before.clone();
        patch.apply_to(&mut replay);
        assert_eq!(replay, after);
    }

    #[test]
    fn update_json_carries_changed_fields_and_stamp() {
        let patch = PlacedModelPatch { trigger_radius: Some(3.5), ..PlacedModelPatch::default() };
        let json = patch.to_update_json(Utc::now());
        let object = json.as_object().expect("update body is an object");
        let mut keys: Vec<_> = object.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["trigger_radius".to_string(), "updated_at".to_string()]);
    }

    #[test]
    fn clearing_animation_key_serializes_null() {
        let patch = PlacedModelPatch { animation_key: Some(None), ..PlacedModelPatch::default() };
        let json = patch.to_update_json(Utc::now());
        assert!(json.get("animation_key").map(|value| value.is_null()).unwrap_or(false));
    }

    #[test]
    fn rows_missing_fields_take_defaults() {
        let json = serde_json::json!({
            "id": PlacedModelId::new(),
            "chapter_id": ChapterId::new(),
            "asset_id": AssetId::new(),
            "name": "Lamp",
            "position_x": 2.0
        });
        let model: PlacedModel = serde_json::from_value(json).expect("row parses");
        assert_eq!(model.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(model.scale, Vec3::ONE);
        assert_eq!(model.trigger_radius, DEFAULT_TRIGGER_RADIUS);
        assert!(model.is_active);
        assert_eq!(model.animation_key, None);
    }

    #[test]
    fn unknown_category_falls_back_to_general() {
        let asset: Asset = serde_json::from_value(serde_json::json!({
            "id": AssetId::new(),
            "name": "Mystery",
            "storage_url": "file:///tmp/mystery.glb",
            "category": "vehicle"
        }))
        .expect("asset parses");
        assert_eq!(asset.category, AssetCategory::General);
        assert_eq!(asset.metadata, AssetMetadata::default());
    }
}
