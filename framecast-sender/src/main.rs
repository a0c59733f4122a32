//! framecast-sender — entry point.
//!
//! ```text
//! framecast-sender QUANTIZER HOST PORT CONNECTION_ID [--config <path>]
//! ```
//!
//! Reads a YUV4MPEG2 stream from stdin and streams it to
//! `HOST:PORT` over UDP, pacing and sizing frames from receiver
//! feedback. The process only ever exits with a failure status: the
//! sender's definition of success is continuous delivery, so running
//! out of input is an error, not completion.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use framecast_core::{
    Encoder, FramecastError, SenderConfig, SenderService, Y4mReader, MAX_QUANTIZER,
};

mod config;
use config::SenderSettings;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "framecast-sender",
    about = "Real-time YUV4MPEG sender over UDP"
)]
struct Cli {
    /// Quantizer index used until feedback arrives (0-127).
    #[arg(value_parser = parse_quantizer)]
    quantizer: u8,

    /// Receiver host.
    host: String,

    /// Receiver UDP port.
    #[arg(value_parser = parse_strict::<u16>)]
    port: u16,

    /// Session connection id carried on every fragment.
    #[arg(value_parser = parse_strict::<u16>)]
    connection_id: u16,

    /// Path to a configuration TOML file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Strict unsigned-decimal parser: the value must round-trip to the
/// exact input string, so leading zeros, signs, whitespace, and
/// trailing garbage are all rejected.
fn parse_strict<T>(input: &str) -> Result<T, String>
where
    T: std::str::FromStr + std::fmt::Display,
{
    let value: T = input
        .parse()
        .map_err(|_| format!("invalid unsigned integer: {input:?}"))?;
    if value.to_string() != input {
        return Err(format!("invalid unsigned integer: {input:?}"));
    }
    Ok(value)
}

fn parse_quantizer(input: &str) -> Result<u8, String> {
    let qi: u8 = parse_strict(input)?;
    if qi > MAX_QUANTIZER {
        return Err(format!("quantizer out of range (0-{MAX_QUANTIZER}): {qi}"));
    }
    Ok(qi)
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => SenderSettings::load(path),
        None => SenderSettings::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("framecast-sender v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, settings).await {
        error!("fatal: {e}");
    }
    // The loop never finishes on its own terms; reaching this point
    // always means delivery stopped.
    ExitCode::FAILURE
}

async fn run(cli: Cli, settings: SenderSettings) -> Result<(), FramecastError> {
    // The stream header is read synchronously before the loop starts;
    // the encoder needs the display dimensions.
    let reader = Y4mReader::new(std::io::stdin())?;
    info!(
        width = reader.display_width(),
        height = reader.display_height(),
        stream_rate = ?reader.frame_rate(),
        colorspace = reader.colorspace(),
        "input stream"
    );

    let encoder = Encoder::new(reader.display_width(), reader.display_height());

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((cli.host.as_str(), cli.port)).await?;
    info!(peer = %socket.peer_addr()?, "connected");

    let rasters = framecast_core::spawn_source(reader);

    let service = SenderService::new(
        SenderConfig {
            connection_id: cli.connection_id,
            quantizer: cli.quantizer,
            fps: settings.video.fps,
        },
        encoder,
    );
    service.run(&socket, rasters).await
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parser_accepts_canonical_integers() {
        assert_eq!(parse_strict::<u16>("0"), Ok(0));
        assert_eq!(parse_strict::<u16>("9600"), Ok(9600));
        assert_eq!(parse_strict::<u16>("65535"), Ok(65535));
    }

    #[test]
    fn strict_parser_rejects_non_canonical_forms() {
        assert!(parse_strict::<u16>("007").is_err());
        assert!(parse_strict::<u16>("+7").is_err());
        assert!(parse_strict::<u16>("-7").is_err());
        assert!(parse_strict::<u16>("7 ").is_err());
        assert!(parse_strict::<u16>("7x").is_err());
        assert!(parse_strict::<u16>("").is_err());
        assert!(parse_strict::<u16>("65536").is_err());
    }

    #[test]
    fn quantizer_range_is_enforced() {
        assert_eq!(parse_quantizer("127"), Ok(127));
        assert!(parse_quantizer("128").is_err());
    }

    #[test]
    fn cli_requires_all_four_arguments() {
        assert!(Cli::try_parse_from(["framecast-sender", "32", "host", "9600"]).is_err());

        let cli =
            Cli::try_parse_from(["framecast-sender", "32", "10.0.0.2", "9600", "1400"]).unwrap();
        assert_eq!(cli.quantizer, 32);
        assert_eq!(cli.host, "10.0.0.2");
        assert_eq!(cli.port, 9600);
        assert_eq!(cli.connection_id, 1400);
    }
}
