use std::{error::Error, path::PathBuf, process};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use smartscreen::{config::Config, controller::Controller, settings::FileSettings, signal};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server settings file
    ///
    /// Holds `server_ip` and `server_port` of the content management server.
    /// When missing or incomplete, the built-in server address is used.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("settings.toml"))]
    settings_file: String,

    /// Device name
    ///
    /// Name the device registers with on the server.
    ///
    /// [default: system hostname]
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    name: Option<String>,

    /// Device identifier
    ///
    /// MAC-style identifier sent with every message.
    ///
    /// [default: derived from the machine id]
    #[arg(long, env = "SMARTSCREEN_DEVICE_ID")]
    device_id: Option<String>,

    /// Directory to preload content into
    ///
    /// [default: a directory under the system temporary directory]
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    cache_dir: Option<PathBuf>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// Command line arguments take precedence over `RUST_LOG`, which takes
/// precedence over the default of `info`.
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // `quiet` and `verbose` are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Main application loop.
///
/// Runs the controller until the server asks for a shutdown or the process
/// receives SIGINT or SIGTERM. SIGHUP reloads the settings file and
/// reconnects.
///
/// # Errors
///
/// Will return `Err` if the settings file cannot be read, the configuration
/// is invalid, or the signal handlers cannot be installed.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let settings = FileSettings::open(&args.settings_file)?;

    let mut config = Config::new(args.name, args.device_id);
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    config.validate()?;
    info!(
        "device {} ({}), default server {}",
        config.device_name, config.device_id, config.default_endpoint
    );

    let mut signals = signal::Handler::new()?;
    let mut controller = Controller::new(config, Box::new(settings))?;

    loop {
        tokio::select! {
            // Prioritize signals.
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("received {signal}, shutting down gracefully");
                    controller.stop();
                    break Ok(());
                }

                info!("received {signal}, reloading settings");
                if let Err(e) = controller.reload() {
                    warn!("keeping current settings: {e}");
                }
            }

            result = controller.start() => {
                controller.stop();
                break result.map_err(Into::into);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
