use crate::events::EditOrigin;
use crate::gizmo::{GizmoEvent, TransformSample};
use crate::model::{PlacedModel, PlacedModelId, PlacedModelPatch};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Single field edit coming from the property panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyEdit {
    Position { axis: Axis, value: f32 },
    Rotation { axis: Axis, value: f32 },
    Scale { axis: Axis, value: f32 },
    UniformScale(f32),
    TriggerRadius(f32),
    AnimationKey(Option<String>),
    Name(String),
    Active(bool),
    SortOrder(i32),
}

impl PropertyEdit {
    /// Converts the edit into a patch, or `None` when the value is out of range.
    pub fn to_patch(&self) -> Option<PlacedModelPatch> {
        let mut patch = PlacedModelPatch::default();
        match self {
            PropertyEdit::Position { axis, value } => {
                let value = finite(*value)?;
                match axis {
                    Axis::X => patch.position_x = Some(value),
                    Axis::Y => patch.position_y = Some(value),
                    Axis::Z => patch.position_z = Some(value),
                }
            }
            PropertyEdit::Rotation { axis, value } => {
                let value = finite(*value)?;
                match axis {
                    Axis::X => patch.rotation_x = Some(value),
                    Axis::Y => patch.rotation_y = Some(value),
                    Axis::Z => patch.rotation_z = Some(value),
                }
            }
            PropertyEdit::Scale { axis, value } => {
                let value = positive(*value)?;
                match axis {
                    Axis::X => patch.scale_x = Some(value),
                    Axis::Y => patch.scale_y = Some(value),
                    Axis::Z => patch.scale_z = Some(value),
                }
            }
            PropertyEdit::UniformScale(value) => return positive(*value).map(PlacedModelPatch::uniform_scale),
            PropertyEdit::TriggerRadius(value) => patch.trigger_radius = Some(positive(*value)?),
            PropertyEdit::AnimationKey(key) => {
                let key = key.as_deref().map(str::trim).filter(|key| !key.is_empty()).map(str::to_string);
                patch.animation_key = Some(key);
            }
            PropertyEdit::Name(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                patch.name = Some(name.to_string());
            }
            PropertyEdit::Active(active) => patch.is_active = Some(*active),
            PropertyEdit::SortOrder(order) => patch.sort_order = Some(*order),
        }
        Some(patch)
    }
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

fn positive(value: f32) -> Option<f32> {
    (value.is_finite() && value > 0.0).then_some(value)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GizmoOutcome {
    Started,
    Applied,
    /// The event had no effect: no drag in progress, model gone or deselected, or a bad sample.
    Ignored,
    /// Drag finished; the patch holds the net change and was handed to the store for write-through.
    Committed(PlacedModelPatch),
    /// Nothing moved: a drag frame matching the stored transform, or a drag that ended where it began.
    Unchanged,
}

#[derive(Debug, Clone)]
struct DragState {
    model: PlacedModelId,
    start: PlacedModel,
    frames: u32,
}

/// Applies manipulator drags and property-panel edits to the selected placed model.
///
/// Drag frames are written with [`EditOrigin::Preview`] so they stay local; the drag's net change is
/// re-issued as one [`EditOrigin::User`] patch on [`GizmoEvent::End`].
#[derive(Debug, Default)]
pub struct TransformEditor {
    drag: Option<DragState>,
}

impl TransformEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn dragged_model(&self) -> Option<PlacedModelId> {
        self.drag.as_ref().map(|drag| drag.model)
    }

    pub fn handle(&mut self, event: GizmoEvent, store: &mut EntityStore) -> GizmoOutcome {
        match event {
            GizmoEvent::Begin { model } => self.begin(model, store),
            GizmoEvent::Drag(sample) => self.drag(sample, store),
            GizmoEvent::End => self.end(store),
        }
    }

    /// Feeds a whole drag stream, returning the outcome of its last event.
    pub fn run<I>(&mut self, events: I, store: &mut EntityStore) -> GizmoOutcome
    where
        I: IntoIterator<Item = GizmoEvent>,
    {
        let mut outcome = GizmoOutcome::Ignored;
        for event in events {
            outcome = self.handle(event, store);
        }
        outcome
    }

    fn begin(&mut self, model: PlacedModelId, store: &EntityStore) -> GizmoOutcome {
        let Some(start) = store.placed_model(model).cloned() else {
            log::debug!(target: "store", "gizmo drag on unknown model {model}");
            self.drag = None;
            return GizmoOutcome::Ignored;
        };
        if self.drag.is_some() {
            log::debug!(target: "store", "gizmo drag restarted before the previous one ended");
        }
        self.drag = Some(DragState { model, start, frames: 0 });
        GizmoOutcome::Started
    }

    fn drag(&mut self, sample: TransformSample, store: &mut EntityStore) -> GizmoOutcome {
        let Some(drag) = self.drag.as_mut() else {
            return GizmoOutcome::Ignored;
        };
        if store.selection().placed_model != Some(drag.model) {
            return GizmoOutcome::Ignored;
        }
        let Some(current) = store.placed_model(drag.model) else {
            return GizmoOutcome::Ignored;
        };
        if !sample.is_finite() {
            log::debug!(target: "store", "dropping non-finite gizmo sample");
            return GizmoOutcome::Ignored;
        }
        let mut moved = current.clone();
        moved.position = sample.translation;
        moved.rotation = sample.euler();
        moved.scale = sample.clamped_scale();
        let patch = PlacedModelPatch::diff(current, &moved);
        if patch.is_empty() {
            return GizmoOutcome::Unchanged;
        }
        drag.frames += 1;
        store.patch_placed_model(drag.model, &patch, EditOrigin::Preview);
        GizmoOutcome::Applied
    }

    fn end(&mut self, store: &mut EntityStore) -> GizmoOutcome {
        self.finish(store)
    }

    /// Ends the drag in progress and commits its net change as one user edit. Called for
    /// [`GizmoEvent::End`] and when the drag is interrupted while its model still exists.
    pub fn finish(&mut self, store: &mut EntityStore) -> GizmoOutcome {
        let Some(drag) = self.drag.take() else {
            return GizmoOutcome::Ignored;
        };
        let Some(current) = store.placed_model(drag.model) else {
            log::debug!(target: "store", "dragged model {} vanished before drag end", drag.model);
            return GizmoOutcome::Ignored;
        };
        let patch = PlacedModelPatch::diff(&drag.start, current);
        if patch.is_empty() {
            return GizmoOutcome::Unchanged;
        }
        log::debug!(
            target: "store",
            "drag of {} finished after {} frames: {:?}",
            drag.model,
            drag.frames,
            patch.changed_fields()
        );
        store.patch_placed_model(drag.model, &patch, EditOrigin::User);
        GizmoOutcome::Committed(patch)
    }

    /// Drops the drag without committing. Only for drags whose model is gone.
    pub fn cancel(&mut self) {
        self.drag = None;
    }

    /// Applies a property-panel edit to the selected model as a persisted user edit.
    pub fn apply_property(&self, edit: &PropertyEdit, store: &mut EntityStore) -> bool {
        let Some(model) = store.selection().placed_model else {
            return false;
        };
        self.apply_property_to(model, edit, store)
    }

    pub fn apply_property_to(&self, model: PlacedModelId, edit: &PropertyEdit, store: &mut EntityStore) -> bool {
        let Some(patch) = edit.to_patch() else {
            log::debug!(target: "store", "ignoring invalid property edit {edit:?}");
            return false;
        };
        store.patch_placed_model(model, &patch, EditOrigin::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoreEvent;
    use crate::model::{AssetId, ChapterId};
    use glam::{Quat, Vec3};

    fn store_with_selected_model() -> (EntityStore, PlacedModelId) {
        let mut store = EntityStore::new();
        let model = PlacedModel::placed(ChapterId::new(), AssetId::new(), "Lamp", Vec3::ZERO, 0);
        let id = model.id;
        store.add_placed_model(model, EditOrigin::Backend);
        store.select_placed_model(Some(id));
        store.drain_events();
        (store, id)
    }

    #[test]
    fn invalid_edits_are_rejected() {
        assert!(PropertyEdit::TriggerRadius(0.0).to_patch().is_none());
        assert!(PropertyEdit::UniformScale(f32::NAN).to_patch().is_none());
        assert!(PropertyEdit::Scale { axis: Axis::Y, value: -1.0 }.to_patch().is_none());
        assert!(PropertyEdit::Name("   ".to_string()).to_patch().is_none());
        let patch = PropertyEdit::AnimationKey(Some(String::new())).to_patch().expect("clearing is valid");
        assert_eq!(patch.animation_key, Some(None));
    }

    #[test]
    fn per_axis_edit_touches_one_axis() {
        let (mut store, id) = store_with_selected_model();
        let editor = TransformEditor::new();
        assert!(editor.apply_property(&PropertyEdit::Scale { axis: Axis::Z, value: 3.0 }, &mut store));
        assert_eq!(store.placed_model(id).expect("model").scale, Vec3::new(1.0, 1.0, 3.0));
    }

    #[test]
    fn drag_without_begin_is_ignored() {
        let (mut store, id) = store_with_selected_model();
        let mut editor = TransformEditor::new();
        let sample = TransformSample::new(Vec3::X, Quat::IDENTITY, Vec3::ONE);
        assert_eq!(editor.handle(GizmoEvent::Drag(sample), &mut store), GizmoOutcome::Ignored);
        assert_eq!(store.placed_model(id).expect("model").position, Vec3::ZERO);
    }

    #[test]
    fn drag_with_no_movement_is_unchanged() {
        let (mut store, id) = store_with_selected_model();
        let mut editor = TransformEditor::new();
        let sample = TransformSample::new(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);
        assert_eq!(editor.handle(GizmoEvent::Begin { model: id }, &mut store), GizmoOutcome::Started);
        assert_eq!(editor.handle(GizmoEvent::Drag(sample), &mut store), GizmoOutcome::Unchanged);
        assert_eq!(editor.handle(GizmoEvent::End, &mut store), GizmoOutcome::Unchanged);
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn finish_commits_frames_of_an_interrupted_drag() {
        let (mut store, id) = store_with_selected_model();
        let mut editor = TransformEditor::new();
        editor.handle(GizmoEvent::Begin { model: id }, &mut store);
        let sample = TransformSample::new(Vec3::new(0.0, 0.0, 4.0), Quat::IDENTITY, Vec3::ONE);
        assert_eq!(editor.handle(GizmoEvent::Drag(sample), &mut store), GizmoOutcome::Applied);
        store.select_placed_model(None);
        store.drain_events();

        let GizmoOutcome::Committed(patch) = editor.finish(&mut store) else {
            panic!("interrupted drag should commit");
        };
        assert_eq!(patch.changed_fields(), vec!["position_z"]);
        let events = store.drain_events();
        assert!(matches!(
            events.as_slice(),
            [StoreEvent::PlacedModelPatched { origin: EditOrigin::User, .. }]
        ));
    }
}
