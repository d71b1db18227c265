use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use atelier::{config, summary_text, to_report_document, Pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "atelier",
    version,
    about = "Run the outfit-photo preprocessing pipeline on one image",
    long_about = None
)]
struct Args {
    /// Image file to process (JPEG, PNG or TIFF)
    image: PathBuf,

    /// Print the full JSON report instead of the summary text
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    config::init_tracing();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let output = match Pipeline::with_defaults().run_path(&args.image) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(path = %args.image.display(), error = %e, "Preprocessing failed");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match to_report_document(&output.statistics, &output.summary).to_json() {
            Ok(doc) => println!("{doc}"),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", summary_text(&output.statistics, &output.summary));
    }
    ExitCode::SUCCESS
}
