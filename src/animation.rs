use crate::assets::{ModelInstance, NodeTransform};
use crate::config::AnimationConfig;
use crate::model::AnimationState;
use crate::store::EntityStore;
use glam::{Quat, Vec3};
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Wraps forever.
    Repeat,
    /// Plays once and holds the final pose.
    Once,
}

impl LoopMode {
    pub fn from_flag(looped: bool) -> Self {
        if looped {
            LoopMode::Repeat
        } else {
            LoopMode::Once
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerPhase {
    Unloaded,
    LoadedEmpty,
    Idle,
    Playing(String),
    Paused(String),
}

#[derive(Debug, Clone, Copy)]
struct WeightFade {
    from: f32,
    to: f32,
    elapsed: f32,
    duration: f32,
}

impl WeightFade {
    fn advance(&mut self, dt: f32) -> f32 {
        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.weight()
    }

    fn weight(&self) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed / self.duration).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * t
    }

    fn done(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Playback of one clip on the mounted model.
#[derive(Debug, Clone)]
pub struct ClipAction {
    clip: usize,
    name: Arc<str>,
    duration: f32,
    time: f32,
    weight: f32,
    fade: Option<WeightFade>,
    driven: bool,
    paused: bool,
    time_scale: f32,
    loop_mode: LoopMode,
    finished: bool,
}

impl ClipAction {
    fn start(clip: usize, name: Arc<str>, duration: f32, start_weight: f32, fade_seconds: f32) -> Self {
        let fade = WeightFade { from: start_weight, to: 1.0, elapsed: 0.0, duration: fade_seconds.max(0.0) };
        Self {
            clip,
            name,
            duration,
            time: 0.0,
            weight: fade.weight(),
            fade: Some(fade),
            driven: true,
            paused: false,
            time_scale: 1.0,
            loop_mode: LoopMode::Repeat,
            finished: false,
        }
    }

    /// Stops advancing time and ramps the weight down to zero; the action is dropped afterwards.
    fn fade_out(&mut self, fade_seconds: f32) {
        self.driven = false;
        self.fade = Some(WeightFade { from: self.weight, to: 0.0, elapsed: 0.0, duration: fade_seconds.max(0.0) });
        if fade_seconds <= 0.0 {
            self.weight = 0.0;
            self.fade = None;
        }
    }

    fn advance(&mut self, dt: f32) {
        if let Some(fade) = self.fade.as_mut() {
            self.weight = fade.advance(dt);
            if fade.done() {
                self.fade = None;
            }
        }
        if !self.driven || self.paused || self.finished {
            return;
        }
        self.time += dt * self.time_scale;
        if self.duration <= 0.0 {
            self.time = 0.0;
            self.finished = self.loop_mode == LoopMode::Once;
            return;
        }
        match self.loop_mode {
            LoopMode::Repeat => self.time = self.time.rem_euclid(self.duration),
            LoopMode::Once => {
                if self.time >= self.duration {
                    self.time = self.duration;
                    self.finished = true;
                }
            }
        }
    }

    fn is_stopped(&self) -> bool {
        !self.driven && self.fade.is_none() && self.weight <= 0.0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// True while the clip's time is still being driven forward.
    pub fn is_running(&self) -> bool {
        self.driven && !self.finished
    }

    pub fn is_fading_out(&self) -> bool {
        !self.driven
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }
}

/// Drives clip playback for the single model currently shown in the viewport.
///
/// The controller follows the store's [`AnimationState`]: callers mutate the store, then hand the new
/// state to [`AnimationController::apply_state`]. Clip switches cross-fade linearly, the outgoing clip is
/// frozen while it fades, and the incoming clip restarts from time zero.
#[derive(Debug)]
pub struct AnimationController {
    config: AnimationConfig,
    instance: Option<ModelInstance>,
    actions: SmallVec<[ClipAction; 4]>,
    applied: Option<AnimationState>,
}

impl AnimationController {
    pub fn new(config: AnimationConfig) -> Self {
        Self { config, instance: None, actions: SmallVec::new(), applied: None }
    }

    /// Playback state a freshly displayed asset starts from.
    pub fn baseline_state(&self) -> AnimationState {
        AnimationState {
            available_animations: Vec::new(),
            current_animation: None,
            is_playing: self.config.default_playing,
            speed: self.config.default_speed,
            looped: self.config.default_loop,
        }
    }

    pub fn fade_seconds(&self) -> f32 {
        self.config.fade_seconds
    }

    pub fn is_mounted(&self) -> bool {
        self.instance.is_some()
    }

    pub fn instance(&self) -> Option<&ModelInstance> {
        self.instance.as_ref()
    }

    pub fn mounted_url(&self) -> Option<&str> {
        self.instance.as_ref().map(|instance| &*instance.definition().url)
    }

    /// Binds a freshly loaded model, publishes its clip names and picks the initial clip.
    pub fn mount(&mut self, instance: ModelInstance, persisted_key: Option<&str>, store: &mut EntityStore) {
        self.stop_all();
        let names = instance.definition().clip_names();
        log::debug!(target: "animation", "mounted '{}' with clips {:?}", instance.definition().url, names);
        self.instance = Some(instance);
        self.applied = None;
        if names.is_empty() {
            store.reset_animation_state(self.baseline_state());
            self.apply_state(store.animation_state());
            return;
        }
        let current = resolve_initial_clip(&names, store.animation_state().current_animation.as_deref(), persisted_key);
        if current.is_none() {
            log::debug!(target: "animation", "persisted clip {:?} not available; no clip selected", persisted_key);
        }
        store.set_available_animations(names);
        store.set_current_animation(current);
        self.apply_state(store.animation_state());
    }

    /// Stops every clip and releases the model; the store's playback state returns to the baseline.
    pub fn unmount(&mut self, store: &mut EntityStore) {
        if let Some(url) = self.mounted_url() {
            log::debug!(target: "animation", "unmounting '{url}'");
        }
        self.stop_all();
        self.instance = None;
        self.applied = None;
        store.reset_animation_state(self.baseline_state());
    }

    fn stop_all(&mut self) {
        self.actions.clear();
        if let Some(instance) = self.instance.as_mut() {
            instance.reset_pose();
        }
    }

    /// Reconciles running clips with `state`. Unchanged state is a no-op.
    pub fn apply_state(&mut self, state: &AnimationState) {
        if self.applied.as_ref() == Some(state) {
            return;
        }
        self.applied = Some(state.clone());
        let Some(instance) = self.instance.as_ref() else {
            return;
        };
        let fade = self.config.fade_seconds;
        let Some(current) = state.current_animation.as_deref() else {
            for action in self.actions.iter_mut().filter(|action| action.driven) {
                action.fade_out(fade);
            }
            return;
        };
        let definition = Arc::clone(instance.definition());
        let Some(clip_index) = definition.clips().iter().position(|clip| &*clip.name == current) else {
            log::debug!(target: "animation", "clip '{current}' is not part of '{}'", definition.url);
            return;
        };

        for action in self.actions.iter_mut().filter(|action| action.driven && &*action.name != current) {
            action.fade_out(fade);
        }

        let running = self.actions.iter().position(|action| &*action.name == current && action.is_running());
        let index = match running {
            Some(index) => index,
            None => {
                let mut start_weight = 0.0;
                self.actions.retain(|action| {
                    if &*action.name == current {
                        start_weight = action.weight;
                        false
                    } else {
                        true
                    }
                });
                let clip = &definition.clips()[clip_index];
                self.actions.push(ClipAction::start(
                    clip_index,
                    Arc::clone(&clip.name),
                    clip.duration,
                    start_weight,
                    fade,
                ));
                self.actions.len() - 1
            }
        };
        let action = &mut self.actions[index];
        action.loop_mode = LoopMode::from_flag(state.looped);
        action.time_scale = state.speed;
        action.paused = !state.is_playing;
    }

    /// Advances fades and clip time by `dt` seconds and re-evaluates the pose.
    pub fn tick(&mut self, dt: f32) {
        if !dt.is_finite() || dt < 0.0 {
            return;
        }
        for action in self.actions.iter_mut() {
            action.advance(dt);
        }
        self.actions.retain(|action| !action.is_stopped());
        self.evaluate();
    }

    fn evaluate(&mut self) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        let definition = Arc::clone(instance.definition());
        let rest = definition.rest_pose();
        let mut samples: SmallVec<[(Vec<NodeTransform>, f32); 4]> = SmallVec::new();
        for action in self.actions.iter().filter(|action| action.weight > 0.0) {
            let Some(clip) = definition.clips().get(action.clip) else {
                continue;
            };
            let mut pose = rest.clone();
            clip.sample_into(action.time, &mut pose);
            samples.push((pose, action.weight));
        }
        blend_poses(&rest, &samples, instance.pose_mut());
    }

    pub fn actions(&self) -> &[ClipAction] {
        &self.actions
    }

    pub fn action(&self, name: &str) -> Option<&ClipAction> {
        self.actions.iter().rev().find(|action| action.name() == name)
    }

    pub fn active_action(&self) -> Option<&ClipAction> {
        self.actions.iter().rev().find(|action| action.driven)
    }

    pub fn phase(&self) -> ControllerPhase {
        let Some(instance) = self.instance.as_ref() else {
            return ControllerPhase::Unloaded;
        };
        if instance.definition().clips().is_empty() {
            return ControllerPhase::LoadedEmpty;
        }
        match self.active_action() {
            Some(action) if action.paused => ControllerPhase::Paused(action.name().to_string()),
            Some(action) => ControllerPhase::Playing(action.name().to_string()),
            None => ControllerPhase::Idle,
        }
    }
}

/// Weighted blend of sampled poses; weight below one is filled with the rest pose.
fn blend_poses(rest: &[NodeTransform], samples: &[(Vec<NodeTransform>, f32)], out: &mut [NodeTransform]) {
    for (index, slot) in out.iter_mut().enumerate() {
        let Some(rest_node) = rest.get(index).copied() else {
            continue;
        };
        let mut total = 0.0_f32;
        let mut translation = Vec3::ZERO;
        let mut scale = Vec3::ZERO;
        let mut rotation = Quat::IDENTITY;
        for (pose, weight) in samples {
            let node = pose.get(index).copied().unwrap_or(rest_node);
            total += weight;
            translation += node.translation * *weight;
            scale += node.scale * *weight;
            rotation = if total <= *weight { node.rotation } else { rotation.slerp(node.rotation, weight / total) };
        }
        if total <= 0.0 {
            *slot = rest_node;
            continue;
        }
        if total < 1.0 {
            let remainder = 1.0 - total;
            translation += rest_node.translation * remainder;
            scale += rest_node.scale * remainder;
            rotation = rest_node.rotation.slerp(rotation, total);
        } else {
            translation /= total;
            scale /= total;
        }
        *slot = NodeTransform { translation, rotation: rotation.normalize(), scale };
    }
}

/// Picks the clip to show when a model finishes loading.
///
/// A persisted key wins when the asset exposes it and yields no clip when it does not. Without one, a
/// still-valid current selection is kept, otherwise the first clip is used.
pub fn resolve_initial_clip(available: &[String], current: Option<&str>, persisted: Option<&str>) -> Option<String> {
    if let Some(key) = persisted {
        return available.iter().find(|name| name.as_str() == key).cloned();
    }
    if let Some(current) = current {
        if available.iter().any(|name| name == current) {
            return Some(current.to_string());
        }
    }
    available.first().cloned()
}

/// Human-readable label for a raw clip name, e.g. `"mixamo.com|walk_cycleFast"` becomes
/// `"Walk Cycle Fast"`.
pub fn display_name(raw: &str) -> String {
    let stripped = strip_exporter_prefix(raw);
    let mut spaced = String::with_capacity(stripped.len() + 4);
    let mut previous: Option<char> = None;
    for ch in stripped.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if let Some(prev) = previous {
            if prev.is_ascii_lowercase() && ch.is_ascii_uppercase() {
                spaced.push(' ');
            }
        }
        spaced.push(ch);
        previous = Some(ch);
    }
    spaced
        .trim()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn strip_exporter_prefix(raw: &str) -> &str {
    let Some((prefix, rest)) = raw.split_once('|') else {
        return raw;
    };
    let lower = prefix.to_ascii_lowercase();
    let is_take = lower
        .strip_prefix("take")
        .map(|digits| {
            let digits = digits.trim_start();
            !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
        })
        .unwrap_or(false);
    if lower == "armature" || lower == "mixamo.com" || is_take {
        rest
    } else {
        raw
    }
}
