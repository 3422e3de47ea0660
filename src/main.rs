//! cuegain - split CD images by cue sheet and compute ReplayGain
//!
//! Tracks are written as `<outdir>/<artist>/<album>/<NN Title>.wav`, with a
//! `replaygain.json` file in the album directory holding the tags.

use anyhow::Result;
use colored::*;
use cuegain::split::{process_cue_with, AlbumReport, SplitEvent, SplitOptions};
use cuegain::tags::{format_gain, format_peak};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::path::{Path, PathBuf};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct Options {
    out_dir: Option<PathBuf>, // -O <dir>

    analyze_only: bool, // -n
    json: bool,         // -j
    quiet: bool,        // -q

    // Cue sheets
    files: Vec<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(&args[1..])?;
    if !run(&opts) {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        if arg.starts_with('-') && arg.len() > 1 {
            let flag = &arg[1..];

            match flag {
                "O" | "-outdir" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("{}: -O requires an argument", "error".red().bold());
                        std::process::exit(1);
                    }
                    opts.out_dir = Some(PathBuf::from(&args[i]));
                }
                "n" => opts.analyze_only = true,
                "j" => opts.json = true,
                "q" => opts.quiet = true,
                "v" | "-version" => {
                    print_version();
                    std::process::exit(0);
                }
                "h" | "-help" => {
                    print_usage();
                    std::process::exit(0);
                }
                // Handle combined short flags like -qn
                _ if flag.chars().all(|c| "njq".contains(c)) => {
                    for c in flag.chars() {
                        match c {
                            'n' => opts.analyze_only = true,
                            'j' => opts.json = true,
                            'q' => opts.quiet = true,
                            _ => {}
                        }
                    }
                }
                // Handle -O with attached value (e.g., -Oout)
                _ if flag.starts_with('O') => {
                    opts.out_dir = Some(PathBuf::from(&flag[1..]));
                }
                _ => {
                    eprintln!("{}: unknown option: -{}", "warning".yellow().bold(), flag);
                }
            }
        } else {
            opts.files.push(PathBuf::from(arg));
        }

        i += 1;
    }

    Ok(opts)
}

/// Process every cue sheet; false if any of them failed
fn run(opts: &Options) -> bool {
    if opts.files.is_empty() {
        eprintln!("{}: no cue sheets specified", "error".red().bold());
        return false;
    }

    let split_opts = SplitOptions {
        out_dir: opts.out_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        write_tracks: !opts.analyze_only,
    };

    let mut reports = Vec::new();
    let mut ok = true;

    for file in &opts.files {
        match process_file(file, &split_opts, opts) {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("{} {}: {:#}", "error".red().bold(), file.display(), e);
                ok = false;
            }
        }
    }

    if opts.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: {}", "error".red().bold(), e);
                ok = false;
            }
        }
    }

    ok
}

// =============================================================================
// File processing
// =============================================================================

fn process_file(cue: &Path, split_opts: &SplitOptions, opts: &Options) -> Result<AlbumReport> {
    let progress = if opts.quiet || opts.json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")?
                .progress_chars("#>-"),
        );
        pb
    };

    let verbose = !opts.quiet && !opts.json;
    let result = process_cue_with(cue, split_opts, &progress, |event| {
        if !verbose {
            return;
        }
        match event {
            SplitEvent::SourceOpened(path) => {
                progress.suspend(|| eprintln!("< {}", path.display()));
            }
            SplitEvent::TrackStarted {
                path: Some(path), ..
            } => {
                progress.suspend(|| eprintln!("> {}", path.display()));
            }
            SplitEvent::TrackStarted { path: None, .. } => {}
        }
    });
    progress.finish_and_clear();
    let report = result?;

    if verbose {
        print_report(&report);
    }

    Ok(report)
}

fn print_report(report: &AlbumReport) {
    let heading = if report.album.is_empty() {
        report.artist.clone()
    } else {
        format!("{} - {}", report.artist, report.album)
    };
    println!("{}", heading.cyan().bold());

    for track in &report.tracks {
        let gain = match track.gain {
            Some(gain) => format_gain(gain).green(),
            None => "no gain available".yellow(),
        };
        println!(
            "  {:02} {:<40} {} {:>10}  peak {}",
            track.number,
            track.title,
            track.begin,
            gain,
            format_peak(track.peak)
        );
    }

    let album_gain = match report.album_gain {
        Some(gain) => format_gain(gain).green().bold(),
        None => "no gain available".yellow(),
    };
    println!(
        "  {:<52} {:>10}  peak {}",
        "Album",
        album_gain,
        format_peak(report.album_peak)
    );
    println!();
}

// =============================================================================
// Help / Version
// =============================================================================

fn print_version() {
    println!("cuegain version {}", VERSION);
    println!("Split CD images by cue sheet and compute ReplayGain 1.0 values");
}

fn print_usage() {
    println!("{} version {}", "cuegain".green().bold(), VERSION);
    println!("Split CD images by cue sheet and compute ReplayGain 1.0 values");
    println!();
    println!("{}", "USAGE:".cyan().bold());
    println!("    cuegain [OPTIONS] <CUESHEET>...");
    println!();
    println!("{}", "OPTIONS:".cyan().bold());
    println!("    -O <dir>  Parent directory for output (default: current directory)");
    println!("    -n        Analyze only, write no files");
    println!("    -j        Print the album reports as JSON");
    println!("    -q        Quiet mode (no progress or summary)");
    println!("    -v        Show version");
    println!("    -h        Show this help");
    println!();
    println!("{}", "EXAMPLES:".cyan().bold());
    println!("    cuegain album.cue              Split into ./<artist>/<album>/");
    println!("    cuegain -O ~/music *.cue       Split several images into ~/music");
    println!("    cuegain -n -j album.cue        Print ReplayGain values as JSON");
    println!();
    println!("{}", "NOTES:".cyan().bold());
    println!("    - Tracks are written as WAV at the source bit depth");
    println!("    - ReplayGain tags are stored in replaygain.json next to the tracks");
    println!("    - Images named .ape or .wv in the cue sheet are looked up as .wav or .flac");
}
