use clap::{value_parser, Arg, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::warn;

use crate::config::{Settings, DEFAULT_REVOLUTIONS_PER_SECOND};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    /// Raw positional value; parsed leniently by [`apply_cli_overrides`].
    pub rps: Option<String>,
    pub topic: Option<String>,
    pub run_for_secs: Option<u64>,
}

fn command() -> Command {
    Command::new("encoder-relay")
        .version(VERSION)
        .about("Publishes simulated rotary-encoder revolutions to an MQTT broker")
        .arg(
            Arg::new("rps")
                .value_name("RPS")
                .allow_negative_numbers(true)
                .help("Revolutions per second (default 1.0)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("topic")
                .short('t')
                .long("topic")
                .value_name("TOPIC")
                .help("Topic to publish batches to"),
        )
        .arg(
            Arg::new("run-for")
                .long("run-for")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Shut down automatically after this many seconds"),
        )
}

pub fn parse_cli_args() -> CliArgs {
    from_matches(command().get_matches())
}

pub fn try_parse_from<I, T>(args: I) -> Result<CliArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    command().try_get_matches_from(args).map(from_matches)
}

fn from_matches(matches: clap::ArgMatches) -> CliArgs {
    CliArgs {
        config_file: matches.get_one::<PathBuf>("config").cloned(),
        rps: matches.get_one::<String>("rps").cloned(),
        topic: matches.get_one::<String>("topic").cloned(),
        run_for_secs: matches.get_one::<u64>("run-for").copied(),
    }
}

/// CLI values win over file and environment. An RPS that is not entirely
/// a positive number falls back to the default instead of aborting.
pub fn apply_cli_overrides(settings: &mut Settings, args: &CliArgs) {
    if let Some(raw) = &args.rps {
        match raw.trim().parse::<f64>() {
            Ok(rps) if rps.is_finite() && rps > 0.0 => {
                settings.encoder.revolutions_per_second = rps;
            }
            _ => {
                warn!("Invalid RPS value '{raw}', defaulting to {DEFAULT_REVOLUTIONS_PER_SECOND} RPS");
                settings.encoder.revolutions_per_second = DEFAULT_REVOLUTIONS_PER_SECOND;
            }
        }
    }
    if let Some(topic) = &args.topic {
        settings.delivery.topic = topic.clone();
    }
    if let Some(secs) = args.run_for_secs {
        settings.runtime.run_for_secs = Some(secs);
    }
}
