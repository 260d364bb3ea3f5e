#[cfg(feature = "gltf_loader")]
pub mod gltf_import;
pub mod library;

use crate::model::AssetCategory;
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("model '{0}' was not found")]
    NotFound(String),
    #[error("failed to parse model '{url}': {message}")]
    Parse { url: String, message: String },
    #[error("unsupported model source '{0}'")]
    Unsupported(String),
    #[error("model loader worker unavailable: {0}")]
    Worker(String),
}

/// Resolves a model URL into a drawable definition with its named clips.
pub trait AssetLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<ModelDefinition, LoadError>;
}

#[derive(Debug, Clone)]
pub struct ClipKeyframe<T> {
    pub time: f32,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipInterpolation {
    Step,
    Linear,
}

#[derive(Debug, Clone)]
pub struct Vec3Track {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Vec3>]>,
}

#[derive(Debug, Clone)]
pub struct QuatTrack {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Quat>]>,
}

impl Vec3Track {
    pub fn new(interpolation: ClipInterpolation, keyframes: Vec<ClipKeyframe<Vec3>>) -> Self {
        Self { interpolation, keyframes: Arc::from(keyframes.into_boxed_slice()) }
    }

    pub fn sample(&self, time: f32) -> Option<Vec3> {
        sample_track(&self.keyframes, self.interpolation, time, |a, b, t| a.lerp(b, t))
    }

    fn end_time(&self) -> f32 {
        self.keyframes.last().map(|kf| kf.time).unwrap_or(0.0)
    }
}

impl QuatTrack {
    pub fn new(interpolation: ClipInterpolation, keyframes: Vec<ClipKeyframe<Quat>>) -> Self {
        Self { interpolation, keyframes: Arc::from(keyframes.into_boxed_slice()) }
    }

    pub fn sample(&self, time: f32) -> Option<Quat> {
        sample_track(&self.keyframes, self.interpolation, time, |a, b, t| a.slerp(b, t).normalize())
    }

    fn end_time(&self) -> f32 {
        self.keyframes.last().map(|kf| kf.time).unwrap_or(0.0)
    }
}

/// Samples a keyframe list, holding the first/last value outside its time range.
fn sample_track<T: Copy>(
    frames: &[ClipKeyframe<T>],
    interpolation: ClipInterpolation,
    time: f32,
    blend: impl Fn(T, T, f32) -> T,
) -> Option<T> {
    let first = frames.first()?;
    if frames.len() == 1 || time <= first.time {
        return Some(first.value);
    }
    let last = &frames[frames.len() - 1];
    if time >= last.time {
        return Some(last.value);
    }
    let next = frames.partition_point(|kf| kf.time <= time);
    let (a, b) = (&frames[next - 1], &frames[next]);
    match interpolation {
        ClipInterpolation::Step => Some(a.value),
        ClipInterpolation::Linear => {
            let span = b.time - a.time;
            let t = if span > f32::EPSILON { (time - a.time) / span } else { 0.0 };
            Some(blend(a.value, b.value, t.clamp(0.0, 1.0)))
        }
    }
}

/// Local translation/rotation/scale of one scene node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl NodeTransform {
    pub const IDENTITY: Self = Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE };

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone)]
pub struct NodeChannel {
    pub node: u32,
    pub translation: Option<Vec3Track>,
    pub rotation: Option<QuatTrack>,
    pub scale: Option<Vec3Track>,
}

impl NodeChannel {
    fn end_time(&self) -> f32 {
        let t = self.translation.as_ref().map(Vec3Track::end_time).unwrap_or(0.0);
        let r = self.rotation.as_ref().map(QuatTrack::end_time).unwrap_or(0.0);
        let s = self.scale.as_ref().map(Vec3Track::end_time).unwrap_or(0.0);
        t.max(r).max(s)
    }
}

#[derive(Debug, Clone)]
pub struct ClipDefinition {
    pub name: Arc<str>,
    pub duration: f32,
    pub channels: Arc<[NodeChannel]>,
}

impl ClipDefinition {
    /// Duration is the latest keyframe across all channels.
    pub fn new(name: impl Into<Arc<str>>, channels: Vec<NodeChannel>) -> Self {
        let duration = channels.iter().map(NodeChannel::end_time).fold(0.0_f32, f32::max);
        Self { name: name.into(), duration, channels: Arc::from(channels.into_boxed_slice()) }
    }

    /// Writes the sampled channels over `pose`; nodes without a channel keep their value.
    pub fn sample_into(&self, time: f32, pose: &mut [NodeTransform]) {
        for channel in self.channels.iter() {
            let Some(slot) = pose.get_mut(channel.node as usize) else {
                continue;
            };
            if let Some(value) = channel.translation.as_ref().and_then(|track| track.sample(time)) {
                slot.translation = value;
            }
            if let Some(value) = channel.rotation.as_ref().and_then(|track| track.sample(time)) {
                slot.rotation = value;
            }
            if let Some(value) = channel.scale.as_ref().and_then(|track| track.sample(time)) {
                slot.scale = value;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: Arc<str>,
    pub parent: Option<u32>,
    pub rest: NodeTransform,
}

/// Loaded model shared by every placement of the same asset. Never mutated after load.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub url: Arc<str>,
    pub nodes: Arc<[SceneNode]>,
    clips: Arc<[ClipDefinition]>,
}

impl ModelDefinition {
    pub fn new(url: impl Into<Arc<str>>, nodes: Vec<SceneNode>, clips: Vec<ClipDefinition>) -> Self {
        Self {
            url: url.into(),
            nodes: Arc::from(nodes.into_boxed_slice()),
            clips: Arc::from(clips.into_boxed_slice()),
        }
    }

    /// Clip names in the order the source file lists them.
    pub fn clip_names(&self) -> Vec<String> {
        self.clips.iter().map(|clip| clip.name.to_string()).collect()
    }

    pub fn clips(&self) -> &[ClipDefinition] {
        &self.clips
    }

    pub fn clip(&self, name: &str) -> Option<&ClipDefinition> {
        self.clips.iter().find(|clip| &*clip.name == name)
    }

    pub fn rest_pose(&self) -> Vec<NodeTransform> {
        self.nodes.iter().map(|node| node.rest).collect()
    }
}

/// Per-placement view over a shared definition; owns its own pose so placements animate independently.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    definition: Arc<ModelDefinition>,
    pose: Vec<NodeTransform>,
}

impl ModelInstance {
    pub fn new(definition: Arc<ModelDefinition>) -> Self {
        let pose = definition.rest_pose();
        Self { definition, pose }
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    pub fn pose(&self) -> &[NodeTransform] {
        &self.pose
    }

    pub fn pose_mut(&mut self) -> &mut [NodeTransform] {
        &mut self.pose
    }

    pub fn reset_pose(&mut self) {
        for (slot, node) in self.pose.iter_mut().zip(self.definition.nodes.iter()) {
            *slot = node.rest;
        }
    }

    /// Node world matrices under `root`; parents are resolved lazily so node order does not matter.
    pub fn world_matrices(&self, root: Mat4) -> Vec<Mat4> {
        let mut cache: Vec<Option<Mat4>> = vec![None; self.pose.len()];
        (0..self.pose.len()).map(|index| self.world_of(index, root, &mut cache, 0)).collect()
    }

    fn world_of(&self, index: usize, root: Mat4, cache: &mut [Option<Mat4>], depth: usize) -> Mat4 {
        if let Some(world) = cache[index] {
            return world;
        }
        let local = self.pose[index].to_matrix();
        let parent = self.definition.nodes.get(index).and_then(|node| node.parent).map(|p| p as usize);
        let world = match parent {
            Some(parent) if parent < self.pose.len() && depth < self.pose.len() => {
                self.world_of(parent, root, cache, depth + 1) * local
            }
            _ => root * local,
        };
        cache[index] = Some(world);
        world
    }
}

/// Stand-in geometry drawn when a model fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderShape {
    Capsule,
    Box,
    Dodecahedron,
    Sphere,
}

impl PlaceholderShape {
    pub fn for_category(category: AssetCategory) -> Self {
        match category {
            AssetCategory::Character => PlaceholderShape::Capsule,
            AssetCategory::Environment => PlaceholderShape::Box,
            AssetCategory::Prop => PlaceholderShape::Dodecahedron,
            AssetCategory::General => PlaceholderShape::Sphere,
        }
    }
}

/// In-process loader serving prebuilt definitions by URL.
#[derive(Debug, Default)]
pub struct MemoryAssetLoader {
    models: HashMap<String, ModelDefinition>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: ModelDefinition) {
        self.models.insert(definition.url.to_string(), definition);
    }

    pub fn with(mut self, definition: ModelDefinition) -> Self {
        self.insert(definition);
        self
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn load(&self, url: &str) -> Result<ModelDefinition, LoadError> {
        self.models.get(url).cloned().ok_or_else(|| LoadError::NotFound(url.to_string()))
    }
}

/// Loader used by sessions: routes `file://` and plain paths to the glTF importer, falling back
/// to an in-memory table when one is registered for the URL.
#[derive(Debug, Default)]
pub struct DefaultAssetLoader {
    memory: MemoryAssetLoader,
}

impl DefaultAssetLoader {
    pub fn new(memory: MemoryAssetLoader) -> Self {
        Self { memory }
    }
}

impl AssetLoader for DefaultAssetLoader {
    fn load(&self, url: &str) -> Result<ModelDefinition, LoadError> {
        match self.memory.load(url) {
            Ok(definition) => return Ok(definition),
            Err(LoadError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        #[cfg(feature = "gltf_loader")]
        {
            gltf_import::GltfAssetLoader.load(url)
        }
        #[cfg(not(feature = "gltf_loader"))]
        {
            Err(LoadError::Unsupported(url.to_string()))
        }
    }
}
