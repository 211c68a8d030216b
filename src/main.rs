use std::path::Path;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "ocr-proofreader",
    version,
    about = "Extract text from images via OCR and stream an LLM proofreading pass"
)]
struct Cli {
    /// Port to listen on (overrides settings and PORT)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long = "host", default_value = "0.0.0.0")]
    host: String,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ocr_proofreader::logging::init(cli.verbose);

    let mut settings =
        ocr_proofreader::settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
    if let Some(port) = cli.port {
        settings.port = port;
    }

    let addr = format!("{}:{}", cli.host, settings.port);
    ocr_proofreader::server::run_server(settings, addr).await
}
