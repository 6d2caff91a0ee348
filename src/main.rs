extern crate log;
extern crate pretty_env_logger;

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, Command};

use omr_grader::answer_key::AnswerKey;
use omr_grader::config::SheetConfig;
use omr_grader::interpret::{interpret_batch, interpret_sheet, InterpretOptions, JsonSink, LogSink, ResultSink};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let json = matches.get_flag("json");
    let key_path = matches
        .get_one::<String>("key")
        .expect("answer key path is required");
    let image_paths: Vec<PathBuf> = matches
        .get_many::<String>("images")
        .expect("at least one image is required")
        .map(PathBuf::from)
        .collect();

    let answer_key = match AnswerKey::load(Path::new(key_path)) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error loading answer key: {}", e);
            exit(1);
        }
    };

    let config = match matches.get_one::<String>("config") {
        Some(path) => match SheetConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                exit(1);
            }
        },
        None => SheetConfig::default(),
    };

    let options = InterpretOptions {
        debug,
        config,
        answer_key,
    };

    if let [image_path] = image_paths.as_slice() {
        match interpret_sheet(image_path, &options) {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing result: {}", e);
                    exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
        return;
    }

    let json_sink = JsonSink { pretty: false };
    let sink: &dyn ResultSink = if json { &json_sink } else { &LogSink };
    let summary = interpret_batch(&image_paths, &options, sink);
    eprintln!(
        "{} sheets: {} successful, {} failed ({:.2}s)",
        summary.total_files,
        summary.successful,
        summary.failed,
        summary.elapsed.as_secs_f64()
    );
    if summary.failed > 0 {
        exit(1);
    }
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .arg(arg!(-k --key <PATH> "Path to answer key JSON file").required(true))
        .arg(arg!(-c --config <PATH> "Path to sheet layout JSON file"))
        .arg(arg!(-d --debug "Write debug images next to each input image"))
        .arg(arg!(--json "Print one JSON line per sheet when grading several images"))
        .arg(arg!(images: <IMAGE> ... "Paths to scanned answer sheets").required(true))
}
