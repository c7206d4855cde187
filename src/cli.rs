//! Command-line surface of the `jiri` binary.
//!
//! Parsing is clap-derive: one top-level [`Cli`] with a few global
//! output flags and a subcommand per engine entry point (`update`,
//! `snapshot`, `checkout`, `validate`). The subcommand bodies live under
//! `src/commands/`; this module only decides how loud and how colorful
//! the run is before handing off.
//!
//! Output flags collapse into a single [`Cli::output_settings`] pass:
//! `--quiet` caps everything at errors, repeated `-v` raises the floor
//! past whatever `--log-level` asked for, and `--color` is a closed
//! enum so an unknown value dies in the parser instead of at runtime.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use env_logger::WriteStyle;
use log::LevelFilter;

use crate::commands;

/// jiri - reconcile a multi-repository workspace against its manifest
#[derive(Parser, Debug)]
#[command(name = "jiri")]
#[command(
    version,
    about,
    long_about = "jiri - reconcile a multi-repository workspace against a declarative manifest"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// When to colorize output
    #[arg(long, global = true, value_enum, value_name = "WHEN", default_value = "auto")]
    color: ColorMode,

    /// Minimum level of log messages to show
    #[arg(long, global = true, value_enum, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// More detail: -v for debug logs, -vv for trace
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update all projects to match the manifest
    Update(commands::update::UpdateArgs),

    /// Write a snapshot of the current workspace state
    Snapshot(commands::snapshot::SnapshotArgs),

    /// Reconcile the workspace against a snapshot file or URL
    Checkout(commands::checkout::CheckoutArgs),

    /// Load and validate the manifest without touching the workspace
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Execute the parsed CLI command
    pub fn execute(self) -> Result<()> {
        self.init_logger()?;

        match self.command {
            Commands::Update(args) => commands::update::execute(args),
            Commands::Snapshot(args) => commands::snapshot::execute(args),
            Commands::Checkout(args) => commands::checkout::execute(args),
            Commands::Validate(args) => commands::validate::execute(args),
        }
    }

    fn init_logger(&self) -> Result<()> {
        let (level, style) = self.output_settings();
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .write_style(style)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("logger already initialized: {e}"))
    }

    /// Resolve the effective log level and write style.
    ///
    /// `--quiet` beats everything; otherwise each `-v` outranks the
    /// configured `--log-level` (one for debug, two or more for trace).
    /// Color resolves `auto` against the terminal here so env_logger
    /// never second-guesses a redirected stderr.
    fn output_settings(&self) -> (LevelFilter, WriteStyle) {
        let level = if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => self.log_level.filter(),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        };

        // Logs go to stderr, so that is the stream whose capabilities
        // matter for `auto`.
        let style = match self.color {
            ColorMode::Always => WriteStyle::Always,
            ColorMode::Never => WriteStyle::Never,
            ColorMode::Auto => {
                if console::Term::stderr().features().colors_supported() {
                    WriteStyle::Auto
                } else {
                    WriteStyle::Never
                }
            }
        };

        (level, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("jiri").chain(args.iter().copied());
        Cli::try_parse_from(argv).expect("argv should parse")
    }

    fn level_of(args: &[&str]) -> LevelFilter {
        parse(args).output_settings().0
    }

    #[test]
    fn default_level_is_info() {
        assert_eq!(level_of(&["validate"]), LevelFilter::Info);
    }

    #[test]
    fn explicit_log_level_is_used() {
        assert_eq!(level_of(&["validate", "--log-level", "warn"]), LevelFilter::Warn);
        assert_eq!(level_of(&["validate", "--log-level", "trace"]), LevelFilter::Trace);
        assert_eq!(level_of(&["validate", "--log-level", "off"]), LevelFilter::Off);
    }

    #[test]
    fn verbose_outranks_log_level() {
        assert_eq!(
            level_of(&["validate", "--log-level", "error", "-v"]),
            LevelFilter::Debug
        );
        assert_eq!(level_of(&["validate", "-vv"]), LevelFilter::Trace);
        assert_eq!(level_of(&["validate", "-v", "-v", "-v"]), LevelFilter::Trace);
    }

    #[test]
    fn quiet_caps_at_errors() {
        assert_eq!(level_of(&["validate", "--quiet"]), LevelFilter::Error);
        assert_eq!(
            level_of(&["validate", "-q", "--log-level", "trace"]),
            LevelFilter::Error
        );
    }

    #[test]
    fn quiet_and_verbose_refuse_to_combine() {
        assert!(Cli::try_parse_from(["jiri", "validate", "-q", "-v"]).is_err());
    }

    #[test]
    fn unknown_log_level_is_a_parse_error() {
        assert!(Cli::try_parse_from(["jiri", "validate", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn explicit_color_modes_map_directly() {
        let (_, style) = parse(&["validate", "--color", "never"]).output_settings();
        assert!(matches!(style, WriteStyle::Never));

        let (_, style) = parse(&["validate", "--color", "always"]).output_settings();
        assert!(matches!(style, WriteStyle::Always));
    }

    #[test]
    fn auto_color_never_escalates_past_auto() {
        // What `auto` resolves to depends on the terminal running the
        // tests; it must only ever be Auto or Never.
        let (_, style) = parse(&["validate", "--color", "auto"]).output_settings();
        assert!(matches!(style, WriteStyle::Auto | WriteStyle::Never));
    }

    #[test]
    fn unknown_color_mode_is_a_parse_error() {
        assert!(Cli::try_parse_from(["jiri", "validate", "--color", "sometimes"]).is_err());
    }

    #[test]
    fn global_flags_parse_before_the_subcommand_too() {
        assert_eq!(level_of(&["--quiet", "validate"]), LevelFilter::Error);
        let (_, style) = parse(&["--color", "never", "validate"]).output_settings();
        assert!(matches!(style, WriteStyle::Never));
    }
}
