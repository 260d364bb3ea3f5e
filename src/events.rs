use crate::model::{AssetId, BookId, ChapterId, ChapterPatch, PlacedModelId, PlacedModelPatch};
use std::fmt;

/// Where a store mutation came from; only `User` edits are written through to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    /// Accepted edit from the property panel, a drop, or a finished gizmo drag.
    User,
    /// Intermediate gizmo frame, local only.
    Preview,
    /// Data hydrated from (or cascaded by) the backend.
    Backend,
}

impl EditOrigin {
    pub fn persists(self) -> bool {
        self == EditOrigin::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    Asset,
    Book,
    Chapter,
    PlacedModel,
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    AssetsReplaced,
    AssetChanged { id: AssetId },
    AssetRemoved { id: AssetId },
    BooksReplaced,
    BookChanged { id: BookId },
    BookRemoved { id: BookId },
    ChaptersReplaced { book: Option<BookId> },
    ChapterAdded { id: ChapterId },
    ChapterPatched { id: ChapterId, patch: ChapterPatch, origin: EditOrigin },
    ChapterRemoved { id: ChapterId },
    PlacedModelsReplaced { chapter: ChapterId },
    PlacedModelAdded { id: PlacedModelId, origin: EditOrigin },
    PlacedModelPatched { id: PlacedModelId, patch: PlacedModelPatch, origin: EditOrigin },
    PlacedModelRemoved { id: PlacedModelId, chapter: ChapterId, origin: EditOrigin },
    SelectionChanged { kind: SelectionKind },
    AnimationStateChanged,
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::AssetsReplaced => write!(f, "AssetsReplaced"),
            StoreEvent::AssetChanged { id } => write!(f, "AssetChanged id={id}"),
            StoreEvent::AssetRemoved { id } => write!(f, "AssetRemoved id={id}"),
            StoreEvent::BooksReplaced => write!(f, "BooksReplaced"),
            StoreEvent::BookChanged { id } => write!(f, "BookChanged id={id}"),
            StoreEvent::BookRemoved { id } => write!(f, "BookRemoved id={id}"),
            StoreEvent::ChaptersReplaced { book } => match book {
                Some(book) => write!(f, "ChaptersReplaced book={book}"),
                None => write!(f, "ChaptersReplaced"),
            },
            StoreEvent::ChapterAdded { id } => write!(f, "ChapterAdded id={id}"),
            StoreEvent::ChapterPatched { id, origin, .. } => {
                write!(f, "ChapterPatched id={id} origin={origin:?}")
            }
            StoreEvent::ChapterRemoved { id } => write!(f, "ChapterRemoved id={id}"),
            StoreEvent::PlacedModelsReplaced { chapter } => {
                write!(f, "PlacedModelsReplaced chapter={chapter}")
            }
            StoreEvent::PlacedModelAdded { id, origin } => {
                write!(f, "PlacedModelAdded id={id} origin={origin:?}")
            }
            StoreEvent::PlacedModelPatched { id, patch, origin } => {
                write!(f, "PlacedModelPatched id={id} fields={:?} origin={origin:?}", patch.changed_fields())
            }
            StoreEvent::PlacedModelRemoved { id, chapter, origin } => {
                write!(f, "PlacedModelRemoved id={id} chapter={chapter} origin={origin:?}")
            }
            StoreEvent::SelectionChanged { kind } => write!(f, "SelectionChanged kind={kind:?}"),
            StoreEvent::AnimationStateChanged => write!(f, "AnimationStateChanged"),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<StoreEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: StoreEvent) {
        log::trace!(target: "store", "{event}");
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<StoreEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
