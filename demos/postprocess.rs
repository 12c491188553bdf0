use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, Command};
use webrtc_recorder::processing::post_processor::PostProcessor;
use webrtc_recorder::processing::transcoder::{Ffmpeg, FfmpegConfig, Transcoder};
use webrtc_recorder::session::DEFAULT_ROOT_DIR;

// cargo run --example postprocess -- --root recordings --room room1 --room room2

#[tokio::main]
async fn main() -> Result<()> {
    let mut app = Command::new("postprocess")
        .version("0.1.0")
        .about("Mixes the per-track recordings of closed rooms into one merged.wav per room.")
        .arg(
            Arg::new("FULLHELP")
                .help("Prints more detailed help information")
                .long("fullhelp"),
        )
        .arg(
            Arg::new("root")
                .takes_value(true)
                .default_value(DEFAULT_ROOT_DIR)
                .long("root")
                .help("Recording root directory."),
        )
        .arg(
            Arg::new("room")
                .required_unless_present("FULLHELP")
                .takes_value(true)
                .multiple_occurrences(true)
                .long("room")
                .help("Room to post-process, may be repeated."),
        )
        .arg(
            Arg::new("ffmpeg")
                .takes_value(true)
                .default_value("ffmpeg")
                .long("ffmpeg")
                .help("ffmpeg executable."),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Prints debug log information"),
        );

    let matches = app.clone().get_matches();

    if matches.is_present("FULLHELP") {
        app.print_long_help()?;
        std::process::exit(0);
    }

    let debug = matches.is_present("debug");
    if debug {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log::LevelFilter::Debug)
            .init();
    }

    let root = PathBuf::from(matches.value_of("root").unwrap_or(DEFAULT_ROOT_DIR));
    let ffmpeg = Ffmpeg::new(FfmpegConfig {
        program: PathBuf::from(matches.value_of("ffmpeg").unwrap_or("ffmpeg")),
    });

    let processor = PostProcessor::new(root, Arc::new(ffmpeg) as Arc<dyn Transcoder>);
    processor.on_processed(Box::new(|room_id: String, result: webrtc_recorder::Result<PathBuf>| {
        Box::pin(async move {
            match result {
                Ok(merged) => println!("{room_id}: {}", merged.display()),
                Err(err) => println!("{room_id}: failed: {err}"),
            }
        })
    }));

    if let Some(rooms) = matches.values_of("room") {
        for room in rooms {
            processor.submit(room).await?;
        }
    }
    processor.close().await;

    Ok(())
}
