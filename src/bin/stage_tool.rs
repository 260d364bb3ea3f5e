use anyhow::{anyhow, bail, Context, Result};
use chapter_stage::assets::{DefaultAssetLoader, MemoryAssetLoader};
use chapter_stage::backend::MemoryBackend;
use chapter_stage::camera3d::ViewportRect;
use chapter_stage::cli::{StageToolArgs, StageToolCommand};
use chapter_stage::config::StageConfig;
use chapter_stage::model::{AssetId, ChapterId};
use chapter_stage::placement::{DropDecision, DropEvent, DropPayload, PlacementNotice};
use chapter_stage::snapshot::StageSnapshot;
use chapter_stage::EditorSession;
use glam::Vec2;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = match StageToolArgs::parse_from_env() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            print_usage();
            process::exit(2);
        }
    };
    if let Err(err) = run(args) {
        eprintln!("error: {err:?}");
        process::exit(1);
    }
}

fn run(args: StageToolArgs) -> Result<()> {
    match &args.command {
        StageToolCommand::Validate { snapshot } => cmd_validate(snapshot),
        StageToolCommand::List { snapshot } => cmd_list(snapshot),
        StageToolCommand::Place { snapshot, chapter, asset, pointer, viewport } => {
            let mut config = match &args.config {
                Some(path) => StageConfig::load(path)?,
                None => StageConfig::default(),
            };
            let overrides = args.config_overrides();
            if !overrides.is_empty() {
                log::info!(target: "session", "config overrides: {:?}", overrides.applied_fields());
                config.apply_overrides(&overrides);
            }
            cmd_place(snapshot, config, *chapter, *asset, *pointer, *viewport)
        }
        StageToolCommand::Help => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    eprintln!(
        "Stage Tool

Usage:
  stage_tool [--config <path>] [--fade <seconds>] [--fov <degrees>] <command>

Commands:
  stage_tool validate <snapshot>       Check references, capacity, and trigger radii
  stage_tool list <snapshot>           List books, chapters, and placed models in render order
  stage_tool place <snapshot> <chapter> <asset> <px> <py> <width> <height>
                                       Drop an asset onto a chapter's viewport and save the result
  stage_tool help                      Show this message
"
    );
}

fn cmd_validate(path: &Path) -> Result<()> {
    let snapshot = StageSnapshot::load_from_path(path)?;
    let issues = snapshot.validate();
    if issues.is_empty() {
        println!(
            "Snapshot '{}' is valid ({} books, {} chapters, {} placed models).",
            path.display(),
            snapshot.books.len(),
            snapshot.chapters.len(),
            snapshot.placed_models.len()
        );
        Ok(())
    } else {
        for issue in &issues {
            println!("- {issue}");
        }
        bail!("snapshot '{}' has {} issue(s)", path.display(), issues.len())
    }
}

fn cmd_list(path: &Path) -> Result<()> {
    let snapshot = StageSnapshot::load_from_path(path)?;
    for book in &snapshot.books {
        let status = snapshot.chapter_status(book.id);
        println!("{} \"{}\" ({}/{} chapters staged)", book.id, book.title, status.completed, status.total);
        let mut chapters: Vec<_> = snapshot.chapters.iter().filter(|chapter| chapter.book_id == book.id).collect();
        chapters.sort_by_key(|chapter| chapter.order_index);
        for chapter in chapters {
            println!(
                "  {} #{} \"{}\" models={}",
                chapter.id,
                chapter.order_index,
                chapter.title,
                snapshot.chapter_model_count(chapter.id)
            );
            let mut models: Vec<_> =
                snapshot.placed_models.iter().filter(|model| model.chapter_id == chapter.id).collect();
            models.sort_by_key(|model| model.sort_order);
            for model in models {
                println!(
                    "    [{}] {} \"{}\" at ({:.2}, {:.2}, {:.2}) radius={:.2} clip={}",
                    model.sort_order,
                    model.id,
                    model.name,
                    model.position.x,
                    model.position.y,
                    model.position.z,
                    model.trigger_radius,
                    model.animation_key.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn cmd_place(
    path: &Path,
    config: StageConfig,
    chapter: ChapterId,
    asset: AssetId,
    pointer: [f32; 2],
    viewport: [f32; 2],
) -> Result<()> {
    let snapshot = StageSnapshot::load_from_path(path)?;
    let book = snapshot
        .chapters
        .iter()
        .find(|record| record.id == chapter)
        .map(|record| record.book_id)
        .ok_or_else(|| anyhow!("chapter '{chapter}' is not in the snapshot"))?;
    let asset = snapshot
        .assets
        .iter()
        .find(|record| record.id == asset)
        .cloned()
        .ok_or_else(|| anyhow!("asset '{asset}' is not in the snapshot"))?;

    let backend = Arc::new(MemoryBackend::new(snapshot));
    let loader = Arc::new(DefaultAssetLoader::new(MemoryAssetLoader::new()));
    let mut session = EditorSession::new(config, backend.clone(), loader);
    session.refresh_catalog();
    session.settle(SETTLE_TIMEOUT);
    session.select_book(Some(book));
    session.settle(SETTLE_TIMEOUT);
    if !session.open_chapter(chapter) {
        bail!("chapter '{chapter}' could not be opened");
    }
    session.settle(SETTLE_TIMEOUT);

    let drop = DropEvent {
        pointer: Vec2::new(pointer[0], pointer[1]),
        viewport: ViewportRect::sized(viewport[0], viewport[1]),
        payload: DropPayload::new(asset.id, asset.name.clone(), asset.category),
    };
    let decision = session.drop_asset(&drop);
    session.settle(SETTLE_TIMEOUT);
    for notice in session.drain_notices() {
        match notice {
            PlacementNotice::Placed { model, .. } => println!("Placed model {model}."),
            PlacementNotice::Rejected(rejection) => println!("Rejected: {rejection}."),
        }
    }
    if let Some(error) = session.acknowledge_sync_error() {
        bail!("backend write failed: {error}");
    }
    match decision {
        DropDecision::Place(request) => {
            println!(
                "'{}' placed at ({:.2}, {:.2}, {:.2}) with sort order {}.",
                request.name, request.position.x, request.position.y, request.position.z, request.sort_order
            );
            let updated = backend.snapshot().context("Reading backend state")?;
            updated.save_to_path(path)?;
            println!("Saved '{}'.", path.display());
            Ok(())
        }
        DropDecision::Ignored(reason) => bail!("drop ignored: {reason:?}"),
        DropDecision::Rejected(rejection) => bail!("drop rejected: {rejection}"),
    }
}
