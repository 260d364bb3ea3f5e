use crate::model::{
    Asset, AssetCategory, AssetId, Book, BookId, Chapter, ChapterId, ChapterStatus, PlacedModel,
    MAX_MODELS_PER_CHAPTER,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// JSON document holding the four backend collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub placed_models: Vec<PlacedModel>,
}

impl StageSnapshot {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading snapshot file {}", path.display()))?;
        let snapshot = serde_json::from_slice::<StageSnapshot>(&bytes)
            .with_context(|| format!("Parsing snapshot file {}", path.display()))?;
        Ok(snapshot)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating snapshot directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json.as_bytes()).with_context(|| format!("Writing snapshot file {}", path.display()))?;
        Ok(())
    }

    pub fn chapter_model_count(&self, chapter: ChapterId) -> u32 {
        self.placed_models.iter().filter(|model| model.chapter_id == chapter).count() as u32
    }

    /// Chapters of `book` and how many of them hold at least one model.
    pub fn chapter_status(&self, book: BookId) -> ChapterStatus {
        let chapters: Vec<ChapterId> =
            self.chapters.iter().filter(|chapter| chapter.book_id == book).map(|chapter| chapter.id).collect();
        let completed = chapters.iter().filter(|chapter| self.chapter_model_count(**chapter) > 0).count();
        ChapterStatus { total: chapters.len() as u32, completed: completed as u32 }
    }

    /// Referential and range problems, one human-readable line each.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let asset_ids = unique_ids(self.assets.iter().map(|asset| asset.id), "asset", &mut issues);
        let book_ids = unique_ids(self.books.iter().map(|book| book.id), "book", &mut issues);
        let chapter_ids = unique_ids(self.chapters.iter().map(|chapter| chapter.id), "chapter", &mut issues);
        unique_ids(self.placed_models.iter().map(|model| model.id), "placed model", &mut issues);

        let categories: HashMap<AssetId, AssetCategory> =
            self.assets.iter().map(|asset| (asset.id, asset.category)).collect();
        for chapter in &self.chapters {
            if !book_ids.contains(&chapter.book_id) {
                issues.push(format!("chapter '{}' references missing book '{}'", chapter.id, chapter.book_id));
            }
            if let Some(environment) = chapter.environment_asset_id {
                match categories.get(&environment) {
                    None => issues.push(format!(
                        "chapter '{}' uses missing environment asset '{}'",
                        chapter.id, environment
                    )),
                    Some(category) if *category != AssetCategory::Environment => issues.push(format!(
                        "chapter '{}' uses '{}' asset '{}' as its environment",
                        chapter.id, category, environment
                    )),
                    Some(_) => {}
                }
            }
            let count = self.chapter_model_count(chapter.id) as usize;
            if count > MAX_MODELS_PER_CHAPTER {
                issues.push(format!(
                    "chapter '{}' holds {count} placed models (limit {MAX_MODELS_PER_CHAPTER})",
                    chapter.id
                ));
            }
        }
        for model in &self.placed_models {
            if !chapter_ids.contains(&model.chapter_id) {
                issues.push(format!("placed model '{}' references missing chapter '{}'", model.id, model.chapter_id));
            }
            if !asset_ids.contains(&model.asset_id) {
                issues.push(format!("placed model '{}' references missing asset '{}'", model.id, model.asset_id));
            }
            if !(model.trigger_radius.is_finite() && model.trigger_radius > 0.0) {
                issues.push(format!(
                    "placed model '{}' has non-positive trigger radius {}",
                    model.id, model.trigger_radius
                ));
            }
        }
        issues
    }
}

fn unique_ids<T>(ids: impl Iterator<Item = T>, label: &str, issues: &mut Vec<String>) -> HashSet<T>
where
    T: Copy + Eq + std::hash::Hash + std::fmt::Display,
{
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            issues.push(format!("duplicate {label} id '{id}'"));
        }
    }
    seen
}
