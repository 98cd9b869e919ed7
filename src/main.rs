// src/main.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use log::{info, warn};

use muse_analysis::config::{AnalysisConfig, DATA_PATH_ENV};
use muse_analysis::drivers::{
    render_iv_png, render_raw_png, render_spectra_png, render_time_png, AnalysisError, Composer,
    DischargeFolder, DischargeInputs, LineTracks, PlotStyle,
};
use muse_analysis::settings::SettingsTable;

#[derive(Parser, Debug)]
#[command(author, version, about = "Double probe and discharge diagnostics analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one discharge and write its plots next to the logs.
    Shot(ShotArgs),
    /// Gather settings.txt of every discharge under a prefix.
    CollectSettings(CollectArgs),
}

#[derive(Parser, Debug)]
struct ShotArgs {
    /// Discharge identifier, the folder name under the data path.
    #[arg(short, long)]
    target: String,

    #[arg(long, env = DATA_PATH_ENV, default_value = "./", value_hint = ValueHint::DirPath)]
    data_path: PathBuf,

    /// JSON file overriding analysis defaults.
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Print the analysis summary when done.
    #[arg(short, long, action = ArgAction::SetTrue)]
    show: bool,
}

#[derive(Parser, Debug)]
struct CollectArgs {
    #[arg(short, long, default_value = "")]
    prefix: String,

    /// Output name without extension; `.json` and `.csv` are appended.
    #[arg(short, long = "outputname", default_value = "log")]
    output: String,
}

fn write_png(dir: &Path, name: &str, png: Result<Vec<u8>, AnalysisError>) -> Result<()> {
    match png {
        Ok(bytes) => {
            let path = dir.join(name);
            fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        Err(e) => warn!("{name} not drawn: {e}"),
    }
    Ok(())
}

fn run_shot(args: ShotArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    let folder = DischargeFolder::new(&args.data_path, &args.target);
    let inputs = DischargeInputs::gather(folder.shot(), &folder);
    let mut tracks = LineTracks::new(config.spectral.track_policy);
    let discharge = Composer::new(&config)
        .compose(inputs, &mut tracks)
        .with_context(|| format!("analysing shot {}", args.target))?;

    let dir = folder.dir();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let style = PlotStyle::from(config.plot);
    if let Some(probe) = &discharge.probe {
        write_png(&dir, "plotRaw.png", render_raw_png(probe, &style))?;
        write_png(&dir, "plotIV.png", render_iv_png(probe, &style))?;
    }
    write_png(&dir, "plotTime.png", render_time_png(&discharge, &tracks, &style))?;
    if let Some(spectra) = &discharge.spectra {
        write_png(
            &dir,
            "plotSpectra.png",
            render_spectra_png(spectra, &tracks, config.spectral.slice_index, &style),
        )?;
    }

    let summary = serde_json::to_string_pretty(&discharge.summary())?;
    let path = dir.join("analysis.json");
    fs::write(&path, &summary).with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    if args.show {
        println!("{summary}");
    }
    Ok(())
}

fn run_collect(args: CollectArgs) -> Result<()> {
    let table = SettingsTable::collect(&args.prefix)
        .with_context(|| format!("collecting settings under {:?}", args.prefix))?;
    let (json, csv) = table.write_all(&args.output)?;
    info!("wrote {} and {}", json.display(), csv.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match Cli::parse().command {
        Command::Shot(args) => run_shot(args),
        Command::CollectSettings(args) => run_collect(args),
    }
}
