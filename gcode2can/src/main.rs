/*!
# gcode2can

Converts linear G-code moves into Makerbase servo CAN frames and sends
`.can` files to the motors through an slcan USB-CAN adapter.

## Usage

### Convert a file or a directory
```bash
gcode2can convert --file part.gcode
gcode2can convert --dir ./jobs --output ./frames --gear-ratios 13.5,150,150,48,67.82,67.82
```

### Send a converted file
```bash
gcode2can send --file part.can --device /dev/ttyACM0 --bitrate 500000
gcode2can send --file part.can --virtual
```

### Write a configuration template
```bash
gcode2can config --output gcode2can.toml
```
*/

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use shared::{CancelToken, Encoder};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;
mod convert;
mod send;
mod slcan;

use config::AppConfig;
use convert::ConvertSummary;

#[derive(Parser)]
#[command(name = "gcode2can")]
#[command(about = "G-code to Makerbase CAN frame converter and sender")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "gcode2can.toml", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert .gcode files into .can files
    Convert(ConvertArgs),

    /// Send a .can file to the motors
    Send(SendArgs),

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "gcode2can.toml")]
        output: PathBuf,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "dir"])))]
struct ConvertArgs {
    /// Single .gcode file to convert
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Directory whose .gcode files are converted
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Directory for the .can files (defaults to beside each input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Gear ratios for X,Y,Z,A,B,C
    #[arg(long, value_delimiter = ',')]
    gear_ratios: Option<Vec<f64>>,

    /// Print a JSON summary instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SendArgs {
    /// .can file to send
    #[arg(short, long)]
    file: PathBuf,

    /// Serial device of the slcan adapter
    #[arg(short, long)]
    device: Option<String>,

    /// CAN bitrate
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Serial line speed towards the adapter
    #[arg(long)]
    baud: Option<u32>,

    /// Seconds to wait for each motor reply, 0 to not wait
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Pause between frames in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Send to an in-memory bus instead of a device
    #[arg(long = "virtual")]
    use_virtual: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Logs go to stderr so --json output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert(args) => {
            let config = AppConfig::load_or_default(&cli.config)?;
            run_convert(args, config)
        }

        Commands::Send(args) => {
            let config = AppConfig::load_or_default(&cli.config)?;
            run_send(args, config)
        }

        Commands::Config { output } => generate_config_file(output),
    }
}

fn run_convert(args: ConvertArgs, mut config: AppConfig) -> Result<()> {
    if let Some(ratios) = args.gear_ratios {
        config.encoder.gear_ratios = ratios;
    }
    let settings = config
        .encoder
        .to_settings()
        .context("Invalid encoder configuration")?;
    let encoder = Encoder::new(settings)?;
    let output_dir = args.output.as_deref();

    let summary = match (args.file, args.dir) {
        (Some(file), _) => convert::convert_single(&file, output_dir, &encoder)?,
        (None, Some(dir)) => convert::convert_all(&dir, output_dir, &encoder)?,
        (None, None) => bail!("Either --file or --dir is required"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_convert_summary(&summary);
    }

    if !summary.failed.is_empty() {
        bail!("{} file(s) failed to convert", summary.failed.len());
    }
    Ok(())
}

fn print_convert_summary(summary: &ConvertSummary) {
    for file in &summary.converted {
        println!(
            "✅ {} -> {} ({} frames)",
            file.input.display(),
            file.output.display(),
            file.frames
        );
    }
    for file in &summary.failed {
        println!("❌ {}: {}", file.input.display(), file.error);
    }
    if summary.converted.is_empty() && summary.failed.is_empty() {
        println!("⚠️ No .gcode files found");
    }
}

fn run_send(args: SendArgs, mut config: AppConfig) -> Result<()> {
    let transmit = &mut config.transmit;
    if let Some(device) = args.device {
        transmit.device = device;
    }
    if let Some(bitrate) = args.bitrate {
        transmit.bitrate = bitrate;
    }
    if let Some(baud) = args.baud {
        transmit.serial_baud = baud;
    }
    if let Some(timeout) = args.timeout {
        transmit.timeout_seconds = timeout;
    }
    if let Some(delay_ms) = args.delay_ms {
        transmit.inter_frame_delay_ms = delay_ms;
    }
    transmit.use_virtual |= args.use_virtual;

    if !args.json {
        println!("🚀 Sending {}", args.file.display());
        if transmit.use_virtual {
            println!("🧪 Virtual bus");
        } else {
            println!("🔌 Device: {} at {} bit/s", transmit.device, transmit.bitrate);
        }
    }

    // Set up Ctrl+C handler
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, stopping after the current frame...");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    let opener = send::opener_for(transmit);
    let report = send::run_send(args.file, transmit, opener, cancel, args.json)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        let elapsed = report.finished_at - report.started_at;
        println!(
            "📊 Sent {}/{} frame(s) in {} ms",
            report.sent,
            report.total,
            elapsed.num_milliseconds()
        );
        println!(
            "📥 Replies: {} started, {} completed, {} failed, {} limit stopped, {} unknown",
            report.responses.started,
            report.responses.completed,
            report.responses.failed,
            report.responses.limit_stopped,
            report.responses.unknown
        );
    }

    if report.cancelled {
        warn!("Send cancelled after {} of {} frame(s)", report.sent, report.total);
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   gcode2can --config {} convert --dir <jobs>", output_path.display());

    Ok(())
}
