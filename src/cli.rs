use crate::config::StageConfigOverrides;
use crate::model::{AssetId, ChapterId};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum StageToolCommand {
    Validate { snapshot: PathBuf },
    List { snapshot: PathBuf },
    Place { snapshot: PathBuf, chapter: ChapterId, asset: AssetId, pointer: [f32; 2], viewport: [f32; 2] },
    Help,
}

/// Parsed `stage_tool` invocation: global flags followed by a subcommand.
#[derive(Debug, Clone, PartialEq)]
pub struct StageToolArgs {
    pub command: StageToolCommand,
    pub config: Option<PathBuf>,
    fade_seconds: Option<f32>,
    fov_y_degrees: Option<f32>,
}

impl StageToolArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = None;
        let mut fade_seconds = None;
        let mut fov_y_degrees = None;
        let mut positional: Vec<String> = Vec::new();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw) = iter.next() {
            let arg = raw.as_ref();
            if let Some(key) = arg.strip_prefix("--") {
                if matches!(key, "help") {
                    positional.push("help".to_string());
                    continue;
                }
                let value =
                    iter.next().ok_or_else(|| anyhow!("Expected a value after '{arg}'"))?.as_ref().to_string();
                match key {
                    "config" => config = Some(PathBuf::from(value)),
                    "fade" => fade_seconds = Some(parse_f32("fade", &value)?),
                    "fov" => fov_y_degrees = Some(parse_f32("fov", &value)?),
                    _ => bail!("Unknown flag '{arg}'. Supported flags: --config, --fade, --fov."),
                }
            } else {
                positional.push(arg.to_string());
            }
        }
        let command = parse_command(&positional)?;
        Ok(Self { command, config, fade_seconds, fov_y_degrees })
    }

    pub fn config_overrides(&self) -> StageConfigOverrides {
        StageConfigOverrides { fade_seconds: self.fade_seconds, fov_y_degrees: self.fov_y_degrees }
    }
}

fn parse_command(positional: &[String]) -> Result<StageToolCommand> {
    let Some((name, rest)) = positional.split_first() else {
        return Ok(StageToolCommand::Help);
    };
    let snapshot = |usage: &str| -> Result<PathBuf> {
        rest.first().map(PathBuf::from).ok_or_else(|| anyhow!("{name} requires a path: {usage}"))
    };
    match name.as_str() {
        "validate" => Ok(StageToolCommand::Validate { snapshot: snapshot("stage_tool validate <snapshot>")? }),
        "list" => Ok(StageToolCommand::List { snapshot: snapshot("stage_tool list <snapshot>")? }),
        "place" => {
            if rest.len() != 7 {
                bail!(
                    "place requires arguments: stage_tool place <snapshot> <chapter> <asset> <px> <py> <width> <height>"
                );
            }
            let chapter: ChapterId =
                rest[1].parse().with_context(|| format!("Invalid chapter id '{}'", rest[1]))?;
            let asset: AssetId = rest[2].parse().with_context(|| format!("Invalid asset id '{}'", rest[2]))?;
            Ok(StageToolCommand::Place {
                snapshot: PathBuf::from(&rest[0]),
                chapter,
                asset,
                pointer: [parse_f32("px", &rest[3])?, parse_f32("py", &rest[4])?],
                viewport: [parse_f32("width", &rest[5])?, parse_f32("height", &rest[6])?],
            })
        }
        "help" | "-h" => Ok(StageToolCommand::Help),
        other => bail!("unknown command '{other}'"),
    }
}

fn parse_f32(name: &str, value: &str) -> Result<f32> {
    let parsed = value.parse::<f32>().with_context(|| format!("Invalid {name} '{value}'"))?;
    if !parsed.is_finite() {
        bail!("Invalid {name} '{value}': expected a finite number");
    }
    Ok(parsed)
}
