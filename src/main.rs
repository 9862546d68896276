mod cache;
mod driver;
mod filelist;
mod mediainfo;
mod meta;
mod preset;
mod report;
mod util;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use driver::RunOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
enum SortOrder {
    /// Sort by filename.
    Name,
    /// Sort by recorded date/time.
    Time,
    /// Sort by file path.
    Path,
    /// Keep the order files were given in.
    None,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Name => "name",
            SortOrder::Time => "time",
            SortOrder::Path => "path",
            SortOrder::None => "none",
        }
    }
}

#[derive(Parser)]
#[command(
    name = "scenecat",
    version,
    about = "Concatenate similar (e.g. camera scene) video files and export date/time info \
             of the output to CSV/TXT"
)]
struct Cli {
    /// Activate verbose mode (debug logging)
    #[arg(short, long)]
    verbose: bool,

    /// Sort files by the given criterion
    #[arg(long, value_enum, default_value_t = SortOrder::Time)]
    sort: SortOrder,

    /// File to write CSV metadata to. Default is next to --out.
    #[arg(short = 'x', long)]
    csv: Option<PathBuf>,
    /// Disable CSV metadata writing.
    #[arg(short = 'X', long)]
    no_csv: bool,

    /// File to write plain text metadata to. Default is next to --out.
    #[arg(short = 't', long)]
    txt: Option<PathBuf>,
    /// Disable plain text metadata writing.
    #[arg(short = 'T', long)]
    no_txt: bool,

    /// File to write a collection specification to, such that a later run
    /// can use the same file ordering (but e.g. different encoding) using
    /// -i. Default is next to --out.
    #[arg(short = 'c', long, value_name = "CVC")]
    collection: Option<PathBuf>,
    /// Disable writing of a collection file.
    #[arg(short = 'C', long)]
    no_collection: bool,
    /// Collection file to use as input file list. Cannot be combined with
    /// command-line specified input files.
    #[arg(short = 'i', long, value_name = "CVC")]
    in_collection: Option<PathBuf>,

    /// Logfile to write encoder output to when creating the output video
    /// file. Default is next to --out.
    #[arg(short = 'l', long, value_name = "LOGFILE")]
    log: Option<PathBuf>,
    /// Disable writing of a log file.
    #[arg(short = 'L', long)]
    no_log: bool,

    /// File to write SRT 'subtitles' to, which just briefly flash the
    /// recording date at the start of each new video file. Default is next
    /// to --out.
    #[arg(short = 's', long, value_name = "SUBSFILE")]
    srt: Option<PathBuf>,
    /// Disable writing of SRT subtitles files.
    #[arg(short = 'S', long)]
    no_srt: bool,

    /// Output video filename to write to
    #[arg(short = 'o', long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Don't use the metadata cache
    #[arg(long)]
    no_cache: bool,
    /// Stop saving the cache every 100 files (might help with extreme
    /// amounts of small files)
    #[arg(long)]
    no_periodic_cache_save: bool,
    /// Start with an empty metadata cache
    #[arg(long)]
    renew_cache: bool,

    /// Encoding preset to use; use --list-presets to get a list
    #[arg(short = 'p', long, default_value = "copy")]
    preset: String,
    /// List the encoding presets available
    #[arg(short = 'P', long)]
    list_presets: bool,

    /// Don't ask before overwriting existing files.
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Input video files
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

enum RunStatus {
    Done,
    EncodeFailed,
    Cancelled,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format_timestamp(None)
        .format_target(false)
        .format_level(false)
        .init();

    match run(cli) {
        Ok(RunStatus::Done) => ExitCode::SUCCESS,
        Ok(RunStatus::EncodeFailed) => ExitCode::FAILURE,
        Ok(RunStatus::Cancelled) => {
            println!("Aborted by user.");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RunStatus> {
    if cli.list_presets {
        print_presets();
        return Ok(RunStatus::Done);
    }

    let preset = preset::find_preset(&cli.preset).with_context(|| {
        format!(
            "unknown preset '{}'; use --list-presets to get a list",
            cli.preset
        )
    })?;

    if !cli.files.is_empty() && cli.in_collection.is_some() {
        bail!("Specifying both input collection file and separate input video files is not supported");
    }
    let input_files = if let Some(cvc) = &cli.in_collection {
        report::read_collection(cvc)?
    } else if !cli.files.is_empty() {
        cli.files.clone()
    } else {
        bail!("Must specify at least one input file or collection (--in-collection)");
    };

    let tools = mediainfo::MediaTools::discover()?;

    let mut cache = cache::MetaCache::new();
    if !cli.no_cache && !cli.renew_cache {
        cache.load()?;
    }

    let csv = meta_out_file(cli.csv.clone(), cli.no_csv, cli.overwrite, cli.out.as_deref(), "csv")?;
    let txt = meta_out_file(cli.txt.clone(), cli.no_txt, cli.overwrite, cli.out.as_deref(), "txt")?;
    let cvc = meta_out_file(
        cli.collection.clone(),
        cli.no_collection,
        cli.overwrite,
        cli.out.as_deref(),
        "cvc",
    )?;
    let srt = meta_out_file(cli.srt.clone(), cli.no_srt, cli.overwrite, cli.out.as_deref(), "srt")?;

    let mut out_path = None;
    let mut logfile = None;
    if let Some(out) = &cli.out {
        let out = std::path::absolute(out)
            .with_context(|| format!("cannot resolve output path {}", out.display()))?;
        if !cli.overwrite {
            util::confirm_overwrite(&out)?;
        }
        logfile = meta_out_file(cli.log.clone(), cli.no_log, cli.overwrite, Some(&out), "log")?;
        out_path = Some(out);
    }

    let meta_description = [("csv", &csv), ("txt", &txt)]
        .iter()
        .filter(|(_, p)| p.is_some())
        .map(|(n, _)| *n)
        .collect::<Vec<_>>()
        .join(" and ");

    info!("scenecat will:");
    info!(" - Analyze {} files", input_files.len());
    info!(" - Sort the files by {}", cli.sort.as_str());
    if !meta_description.is_empty() {
        info!(" - Output metadata as {}", meta_description);
    }
    if let Some(out) = &out_path {
        info!(
            " - Concatenate and/or encode everything using preset '{}' and write output to '{}'",
            cli.preset,
            out.display()
        );
    }

    // The handler only flips a flag; every long-running phase below polls
    // it so children are never orphaned.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("cannot install interrupt handler")?;
    }

    let mut file_list = filelist::FileList::new();
    let bar = ProgressBar::new(input_files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")
            .expect("valid progress template"),
    );
    for (file_i, file) in input_files.iter().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            bar.finish_and_clear();
            return Ok(RunStatus::Cancelled);
        }
        bar.set_message(
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        info!("Adding {}", file.display());
        file_list.add_file(file, &mut cache, |p| tools.extract_meta(p))?;
        if !cli.no_cache && !cli.no_periodic_cache_save && (file_i + 1) % 100 == 0 {
            info!("Analyzed {} files, saving cache.", file_i + 1);
            cache.save();
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if !cli.no_cache {
        cache.save();
    }

    match cli.sort {
        SortOrder::Name => file_list.sort_by_filename(),
        SortOrder::Path => file_list.sort_by_path(),
        SortOrder::Time => file_list.sort_by_datetime(),
        SortOrder::None => {}
    }

    if let Some(cvc) = &cvc {
        info!("Writing collection {}", cvc.display());
        report::write_collection(cvc, &file_list)?;
    }
    if let Some(csv) = &csv {
        info!("Writing CSV report {}", csv.display());
        report::write_csv_report(csv, &file_list)?;
    }
    if let Some(txt) = &txt {
        info!("Writing TXT report {}", txt.display());
        report::write_txt_report(txt, &file_list)?;
    }
    if let Some(srt) = &srt {
        info!("Writing SRT subtitles {}", srt.display());
        report::write_srt(srt, &file_list)?;
    }

    if let Some(out) = &out_path {
        info!("Starting concatenation");
        info!(
            "Total duration of the resulting file is {}. This can take a while...",
            file_list
                .total_duration_ms()
                .map(util::ms_to_hh_mm_ss)
                .unwrap_or_else(|| "unknown".to_string())
        );

        let plan = preset::build_plan(preset, &file_list, tools.ffmpeg(), out)?;
        let outcome = driver::run(
            &plan.parallel,
            &plan.serial,
            logfile.as_deref(),
            &interrupted,
        )?;
        match outcome {
            RunOutcome::Success => {}
            RunOutcome::Failed => return Ok(RunStatus::EncodeFailed),
            RunOutcome::Cancelled => return Ok(RunStatus::Cancelled),
        }
    }

    info!("Done.");
    Ok(RunStatus::Done)
}

/// Resolves one report target: an explicit path wins, otherwise it lands
/// next to --out with the report's extension; disabled reports resolve to
/// nothing. Existing files prompt unless --overwrite.
fn meta_out_file(
    arg: Option<PathBuf>,
    disabled: bool,
    overwrite: bool,
    out: Option<&Path>,
    ext: &str,
) -> Result<Option<PathBuf>> {
    if disabled {
        return Ok(None);
    }
    let path = match (arg, out) {
        (Some(p), _) => Some(p),
        (None, Some(o)) => Some(util::replace_extension(o, ext)),
        (None, None) => None,
    };
    if let Some(p) = &path {
        if !overwrite {
            util::confirm_overwrite(p)?;
        }
    }
    Ok(path)
}

fn print_presets() {
    println!("Available presets:");
    for (name, preset) in preset::PRESETS {
        println!(" - {}", name);
        println!("   {}", preset.description);
        println!("   encode arguments: {}", preset.encode_params_display());
        println!("   concatenation method: {}", preset.strategy.describe());
        println!();
    }
}
