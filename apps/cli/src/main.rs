use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use tracing::{Level, error, info};
use usbdl_core::{SessionConfig, Target, UsbdlSession};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exynos USB download mode tool (Pure Rust)", long_about = None)]
struct Args {
    /// Payload binary to load and execute
    input_file: Option<String>,

    /// File to store data streamed back by the payload
    output_file: Option<String>,

    /// Load settings from a TOML file
    #[arg(long)]
    config: Option<String>,

    /// Seconds to wait after sending before releasing the device
    #[arg(long)]
    settle_secs: Option<u64>,

    /// Do not detach a kernel driver bound to the download interface
    #[arg(long)]
    no_detach: bool,

    /// Print the known targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn load_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(input) = &args.input_file {
        config.input_path = Some(input.clone());
    }
    if let Some(output) = &args.output_file {
        config.output_path = Some(output.clone());
    }
    if let Some(secs) = args.settle_secs {
        config.settle_delay_secs = secs;
    }
    if args.no_detach {
        config.detach_kernel_driver = false;
    }
    Ok(config)
}

fn log_level(verbose: u8, configured: Option<&str>) -> Level {
    match verbose {
        0 => configured
            .and_then(|level| level.parse().ok())
            .unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn usage() -> String {
    Args::command().render_help().to_string()
}

fn print_targets() {
    println!("{:<12} {:>12} {:>12}", "TARGET", "BUFFER", "RA PTR");
    for target in Target::ALL {
        println!(
            "{:<12} {:>#12x} {:>#12x}",
            target.name(),
            target.transfer_buffer_address(),
            target.return_address_pointer()
        );
    }
}

fn main() {
    // Usage problems print help and exit successfully.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                eprintln!("{}", e.render());
                std::process::exit(0);
            }
        },
    };

    if args.list_targets {
        print_targets();
        return;
    }

    let config = load_config(&args);
    let configured_level = config
        .as_ref()
        .ok()
        .and_then(|c| c.log_level.as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(log_level(args.verbose, configured_level).into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if config.input_path.is_none() {
        println!("{}", usage());
        return;
    }

    info!("Starting exynos-usbdl (nusb backend)...");

    match UsbdlSession::new(config).run() {
        Ok(report) => {
            info!(
                payload = report.payload_len,
                packet = report.packet_len,
                writes = report.write_calls,
                "Download finished"
            );
        }
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
