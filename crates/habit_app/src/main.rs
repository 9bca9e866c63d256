use clap::Parser;
use habit_app::app::{run, AppConfig, Command};

#[derive(Parser)]
#[command(name = "habits", version, about = "Habit tracker with recurring reminders")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = AppConfig::from_env().unwrap_or_default();
    if let Err(err) = run(config, cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
