// mdroom CLI entry point.

use clap::Parser;

mod commands;
mod context;
mod exit_code;
mod output;

use context::GlobalArgs;
use exit_code::ExitCode;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "mdroom", about = "Collaborative markdown rooms from the terminal")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.global.json);
    match commands::run(cli.global, cli.command) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from_error(&error).into()
        }
    }
}
