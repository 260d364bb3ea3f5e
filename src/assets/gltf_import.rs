use super::{
    AssetLoader, ClipDefinition, ClipInterpolation, ClipKeyframe, LoadError, ModelDefinition, NodeChannel,
    NodeTransform, QuatTrack, SceneNode, Vec3Track,
};
use glam::{Quat, Vec3};
use gltf::animation::util::{ReadOutputs, Rotations};
use gltf::animation::{Interpolation, Property};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Imports `.gltf`/`.glb` files addressed by `file://` URLs or plain filesystem paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfAssetLoader;

impl AssetLoader for GltfAssetLoader {
    fn load(&self, url: &str) -> Result<ModelDefinition, LoadError> {
        let path = path_from_url(url)?;
        load_model_from_gltf(url, &path)
    }
}

fn path_from_url(url: &str) -> Result<PathBuf, LoadError> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if url.contains("://") {
        return Err(LoadError::Unsupported(url.to_string()));
    }
    Ok(PathBuf::from(url))
}

pub fn load_model_from_gltf(url: &str, path: &Path) -> Result<ModelDefinition, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(url.to_string()));
    }
    let (document, buffers, _) = gltf::import(path)
        .map_err(|err| LoadError::Parse { url: url.to_string(), message: err.to_string() })?;

    let mut parent_of_node: HashMap<usize, u32> = HashMap::new();
    for node in document.nodes() {
        for child in node.children() {
            parent_of_node.insert(child.index(), node.index() as u32);
        }
    }

    let nodes: Vec<SceneNode> = document
        .nodes()
        .map(|node| {
            let (t, r, s) = node.transform().decomposed();
            let rotation = Quat::from_xyzw(r[0], r[1], r[2], r[3]);
            let rest = NodeTransform {
                translation: Vec3::from_array(t),
                rotation: if rotation.length_squared() > 0.0 { rotation.normalize() } else { Quat::IDENTITY },
                scale: Vec3::from_array(s),
            };
            let name = node.name().map(|n| n.to_string()).unwrap_or_else(|| format!("node_{}", node.index()));
            SceneNode { name: Arc::from(name), parent: parent_of_node.get(&node.index()).copied(), rest }
        })
        .collect();

    let mut clips: Vec<ClipDefinition> = Vec::new();
    for (anim_index, animation) in document.animations().enumerate() {
        let clip_name: Arc<str> = animation
            .name()
            .map(|n| Arc::<str>::from(n.to_string()))
            .unwrap_or_else(|| Arc::<str>::from(format!("animation_{anim_index}")));

        let mut builders: HashMap<u32, ChannelBuilder> = HashMap::new();
        for channel in animation.channels() {
            let target_node = channel.target().node();
            let interpolation = match channel.sampler().interpolation() {
                Interpolation::Linear => ClipInterpolation::Linear,
                Interpolation::Step => ClipInterpolation::Step,
                Interpolation::CubicSpline => {
                    log::warn!(
                        target: "assets",
                        "clip '{}' uses CubicSpline interpolation; skipping channel (node {})",
                        clip_name,
                        target_node.index()
                    );
                    continue;
                }
            };

            let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
            let Some(inputs) = reader.read_inputs() else {
                continue;
            };
            let times: Vec<f32> = inputs.collect();
            if times.is_empty() {
                continue;
            }
            let Some(outputs) = reader.read_outputs() else {
                continue;
            };

            let parse_err = |message: String| LoadError::Parse { url: url.to_string(), message };
            let builder = builders.entry(target_node.index() as u32).or_default();
            match (channel.target().property(), outputs) {
                (Property::Translation, ReadOutputs::Translations(values)) => {
                    let values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                    let keyframes = build_keyframes(&times, values).map_err(parse_err)?;
                    builder.translation = Some(Vec3Track::new(interpolation, keyframes));
                }
                (Property::Scale, ReadOutputs::Scales(values)) => {
                    let values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                    let keyframes = build_keyframes(&times, values).map_err(parse_err)?;
                    builder.scale = Some(Vec3Track::new(interpolation, keyframes));
                }
                (Property::Rotation, ReadOutputs::Rotations(rotations)) => {
                    let keyframes = build_keyframes(&times, convert_rotations(rotations)).map_err(parse_err)?;
                    builder.rotation = Some(QuatTrack::new(interpolation, keyframes));
                }
                // Morph target weights are not driven by the stage.
                _ => {}
            }
        }

        let mut channels: Vec<NodeChannel> =
            builders.into_iter().filter_map(|(node, builder)| builder.into_channel(node)).collect();
        if channels.is_empty() {
            log::debug!(target: "assets", "clip '{clip_name}' in '{url}' has no usable channels");
            continue;
        }
        channels.sort_by_key(|channel| channel.node);
        clips.push(ClipDefinition::new(clip_name, channels));
    }

    log::info!(target: "assets", "loaded '{url}': {} nodes, {} clips", nodes.len(), clips.len());
    Ok(ModelDefinition::new(url, nodes, clips))
}

#[derive(Default)]
struct ChannelBuilder {
    translation: Option<Vec3Track>,
    rotation: Option<QuatTrack>,
    scale: Option<Vec3Track>,
}

impl ChannelBuilder {
    fn into_channel(self, node: u32) -> Option<NodeChannel> {
        if self.translation.is_none() && self.rotation.is_none() && self.scale.is_none() {
            None
        } else {
            Some(NodeChannel { node, translation: self.translation, rotation: self.rotation, scale: self.scale })
        }
    }
}

/// Validates key times and collapses keys that share a timestamp (the later value wins).
fn build_keyframes<T>(times: &[f32], values: Vec<T>) -> Result<Vec<ClipKeyframe<T>>, String> {
    if times.len() != values.len() {
        return Err(format!("channel time/value count mismatch ({} vs {})", times.len(), values.len()));
    }
    let mut frames: Vec<ClipKeyframe<T>> = Vec::with_capacity(times.len());
    for (time, value) in times.iter().copied().zip(values) {
        if !time.is_finite() {
            return Err("channel contains non-finite time value".to_string());
        }
        if time < 0.0 {
            return Err("channel time cannot be negative".to_string());
        }
        if let Some(last) = frames.last_mut() {
            if (time - last.time).abs() <= f32::EPSILON {
                last.value = value;
                continue;
            }
        }
        frames.push(ClipKeyframe { time, value });
    }
    Ok(frames)
}

fn convert_rotations(rotations: Rotations) -> Vec<Quat> {
    rotations
        .into_f32()
        .map(|components| {
            let quat = Quat::from_xyzw(components[0], components[1], components[2], components[3]);
            if quat.length_squared() > 0.0 {
                quat.normalize()
            } else {
                Quat::IDENTITY
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_times_keep_last_value() {
        let frames = build_keyframes(&[0.0, 0.5, 0.5, 1.0], vec![1, 2, 3, 4]).expect("frames");
        let values: Vec<i32> = frames.iter().map(|kf| kf.value).collect();
        assert_eq!(values, vec![1, 3, 4]);
    }

    #[test]
    fn negative_times_are_rejected() {
        assert!(build_keyframes(&[-1.0], vec![0]).is_err());
        assert!(build_keyframes(&[0.0, 1.0], vec![0]).is_err());
    }

    #[test]
    fn remote_urls_are_unsupported() {
        let err = GltfAssetLoader.load("https://cdn.example.com/fox.glb").unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
    }

    #[test]
    fn missing_files_report_not_found() {
        let err = GltfAssetLoader.load("file:///definitely/not/here.glb").unwrap_err();
        assert_eq!(err, LoadError::NotFound("file:///definitely/not/here.glb".to_string()));
    }
}
