use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use adspot::audio::{self, AudioSource, FfmpegSource};
use adspot::fingerprint::{ChromaprintEngine, FingerprintEngine};
use adspot::store::{FileStore, Store};
use adspot::{util, Config};

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about adspot and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Cut the labeled clips out of a recording and register each one as an ad. Clips whose audio is already registered (under any name) are skipped."
    )]
    Register {
        #[clap(
            value_parser = clap::value_parser!(PathBuf),
            help = "Audio or video file to cut clips from."
        )]
        path: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "JSON file with a list of {\"start_time\", \"end_time\", \"ad_name\"} entries, in seconds. Label files written by 'scan' can be used as-is."
        )]
        labels: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(usize),
            help = "Number of clips to fingerprint in parallel."
        )]
        workers: Option<usize>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Hold back clips whose audio is identical to a clip that is still being fingerprinted. Without this flag, identical clips fingerprinted at the same time may both be registered."
        )]
        in_flight_dedup: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Register a whole file as a single ad."
    )]
    RegisterClip {
        #[clap(
            value_parser = clap::value_parser!(PathBuf),
            help = "Audio or video file containing exactly one ad."
        )]
        path: PathBuf,

        #[clap(long, help = "Ad name. Defaults to the file name.")]
        name: Option<String>,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Slide a window across one or more recordings and report every registered ad that is found."
    )]
    Scan {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Audio or video files to scan."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            long,
            value_parser = clap::value_parser!(f64),
            help = "Width of the scan window, in seconds."
        )]
        span: Option<f64>,

        #[clap(
            long,
            value_parser = clap::value_parser!(f64),
            help = "Step taken when a window does not match any ad, in seconds."
        )]
        skip: Option<f64>,

        #[clap(
            long,
            value_parser = clap::value_parser!(f64),
            help = "Minimum ratio (0.0 - 1.0) of an ad's hashes that must align for it to be reported."
        )]
        confidence_threshold: Option<f64>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Write the detected labels to a JSON file next to each scanned file."
        )]
        write_labels: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display results of the scan in stdout."
        )]
        no_display: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Fingerprint a whole clip and list the registered ads it matches best."
    )]
    Recognize {
        #[clap(
            value_parser = clap::value_parser!(PathBuf),
            help = "Audio or video file to recognize."
        )]
        path: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(usize),
            help = "Minimum number of aligned hashes for an ad to be listed."
        )]
        min_matches: Option<usize>,

        #[clap(
            long,
            value_parser = clap::value_parser!(usize),
            help = "Maximum number of ads to list."
        )]
        top_n: Option<usize>,
    },

    #[clap(after_help = "List all registered ads.")]
    List,

    #[clap(after_help = "Remove all registered ads from the store.")]
    Clear,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "adspot.store.bin",
        value_parser = clap::value_parser!(PathBuf),
        help = "Path to the ad store."
    )]
    store: PathBuf,

    #[clap(
        long,
        global = true,
        value_parser = clap::value_parser!(PathBuf),
        help = "JSON configuration file. Command-line flags take precedence."
    )]
    config: Option<PathBuf>,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Enable multi-threaded decoding in FFmpeg."
    )]
    threaded_decoding: bool,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "By default, input files are validated using FFmpeg, which is extremely accurate. Setting this flag will switch to just checking file headers."
    )]
    file_headers_only: bool,
}

impl Cli {
    fn fail(message: impl std::fmt::Display) -> ! {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::InvalidValue, message).exit()
    }

    fn base_config(&self) -> Config {
        match &self.config {
            Some(path) => Config::from_file(path).unwrap_or_else(|e| Self::fail(e)),
            None => Config::default(),
        }
    }

    fn validate(config: Config) -> Config {
        if let Err(e) = config.validate() {
            Self::fail(e);
        }
        config
    }

    fn check_media_file(&self, path: &Path) {
        if !util::is_valid_media_file(path, !self.file_headers_only) {
            Self::fail(format!(
                "{} is not a valid audio or video file",
                path.display()
            ));
        }
    }
}

fn display_scan(path: &Path, report: &audio::ScanReport) {
    println!("\n{}\n", path.display());
    if report.labels.is_empty() {
        println!("No ads found.");
    }
    for label in &report.labels {
        println!("* {}", label);
    }
}

fn main() -> adspot::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init()?;

    let args = Cli::parse();

    if let Commands::Info = args.command {
        println!("FFmpeg version: {}", util::ffmpeg_version_string());
        return Ok(());
    }

    let store = FileStore::open(&args.store)?;
    store.setup()?;

    let engine = Arc::new(ChromaprintEngine::new());
    let source = FfmpegSource::new(engine.params().sample_rate)
        .with_threaded_decoding(args.threaded_decoding);

    match args.command {
        Commands::Info => unreachable!("handled above"),
        Commands::Register {
            ref path,
            ref labels,
            workers,
            in_flight_dedup,
        } => {
            let mut config = args.base_config();
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            config.in_flight_dedup |= in_flight_dedup;
            let config = Cli::validate(config);

            args.check_media_file(path);
            let clips = audio::read_labels(labels)?;
            let audio = source.decode(path)?;

            let registrar = audio::Registrar::new(&config, Arc::clone(&engine), &store);
            let report = registrar.register_batch(&audio, &clips)?;

            println!(
                "Registered {}, skipped {} duplicate(s), {} failed.",
                report.registered.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for (name, reason) in &report.failed {
                println!("* {} - {}", name, reason);
            }
        }
        Commands::RegisterClip { ref path, ref name } => {
            let config = Cli::validate(args.base_config());
            args.check_media_file(path);

            let name = match name {
                Some(name) => name.clone(),
                None => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            };
            let audio = source.decode(path)?;

            let registrar = audio::Registrar::new(&config, Arc::clone(&engine), &store);
            match registrar.register_clip(&name, &audio)? {
                Some(song_id) => println!("Registered {} (id {}).", name, song_id),
                None => println!("{} is already registered.", name),
            }
        }
        Commands::Scan {
            ref paths,
            span,
            skip,
            confidence_threshold,
            write_labels,
            no_display,
        } => {
            let mut config = args.base_config();
            if let Some(span) = span {
                config.analyze_span = span;
            }
            if let Some(skip) = skip {
                config.analyze_skip = skip;
            }
            if let Some(confidence_threshold) = confidence_threshold {
                config.confidence_threshold = confidence_threshold;
            }
            let config = Cli::validate(config);

            for path in paths {
                args.check_media_file(path);
            }

            let scanner = audio::ScanController::new(&config, engine.as_ref(), &store);
            for path in paths {
                let audio = source.decode(path)?;
                let report = scanner.scan(&audio)?;
                if !no_display {
                    display_scan(path, &report);
                }
                if write_labels {
                    audio::write_labels(path, &report.labels)?;
                }
            }
        }
        Commands::Recognize {
            ref path,
            min_matches,
            top_n,
        } => {
            let mut config = args.base_config();
            if let Some(min_matches) = min_matches {
                config.recognize_min_matches = min_matches;
            }
            if let Some(top_n) = top_n {
                config.top_n = top_n;
            }
            let config = Cli::validate(config);
            args.check_media_file(path);

            let audio = source.decode(path)?;
            let aligner = audio::ConsensusAligner::new(engine.params())
                .with_top_n(Some(config.top_n))
                .with_min_matches(Some(config.recognize_min_matches));
            let recognizer = audio::Recognizer::new(engine.as_ref(), &store, aligner);
            let recognition = recognizer.recognize(audio.samples(), audio.sample_rate())?;

            println!("\n{}\n", path.display());
            if recognition.candidates.is_empty() {
                println!("No ads found.");
            }
            for c in &recognition.candidates {
                println!(
                    "* {} - offset {}, {} matches, input confidence {:.2}, fingerprinted confidence {:.2}",
                    c.song_name,
                    util::format_seconds(c.offset_seconds),
                    c.matched_count,
                    c.input_confidence,
                    c.fingerprinted_confidence,
                );
            }
            println!(
                "\nFingerprint: {:?}, query: {:?}, align: {:?}, total: {:?}",
                recognition.timings.fingerprint_time,
                recognition.timings.query_time,
                recognition.timings.align_time,
                recognition.timings.total(),
            );
        }
        Commands::List => {
            let songs = store.get_all_songs()?;
            if songs.is_empty() {
                println!("No ads registered.");
            }
            for song in songs {
                println!(
                    "{:>4}  {}  {}  {} hashes  {}",
                    song.id,
                    util::format_seconds(song.duration_seconds),
                    song.name,
                    song.total_hashes,
                    song.content_hash,
                );
            }
        }
        Commands::Clear => {
            store.empty()?;
            println!("Cleared {}.", store.path().display());
        }
    }

    Ok(())
}
