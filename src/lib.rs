pub mod animation;
pub mod assets;
pub mod backend;
pub mod camera3d;
pub mod cli;
pub mod config;
pub mod events;
pub mod gizmo;
pub mod model;
pub mod placement;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod transform_editor;

pub use session::{EditorSession, RenderItem, StageFrame, Visual};
pub use store::EntityStore;
