use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use dbupgrade::{ConnectionParams, ProcessorConfig, ScriptSource, UpgradeProcessor, Version};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbupgrade")]
#[command(about = "Bring a database to a version described by an upgrade script")]
struct Cli {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DatabaseArgs {
    /// Upgrade script
    #[arg(long, short)]
    script: PathBuf,

    /// Driver of the default connection
    #[arg(long, default_value = "sqlite")]
    driver: String,

    /// Location of the default database
    #[arg(long)]
    url: String,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Secondary connection as <name>=<driver>:<url>, may be repeated
    #[arg(long = "connection", value_name = "NAME=DRIVER:URL")]
    connections: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Upgrade to a version, a prefix ending in '*' or, when omitted, the latest version
    Upgrade {
        #[arg(long, short, default_value = "")]
        target: String,
        /// Allow DOWNGRADE segments in the path
        #[arg(long)]
        downgrade: bool,
    },
    /// List versions reachable from the current one
    Targets {
        #[arg(long)]
        downgrade: bool,
    },
    /// Print the history log
    History {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the current version
    Current,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut processor = open(&cli.database)?;
    let outcome = match cli.command {
        Command::Upgrade { target, downgrade } => processor
            .upgrade(&target, downgrade)
            .with_context(|| format!("Upgrade of {} failed", cli.database.url)),
        Command::Targets { downgrade } => processor
            .targets(downgrade)
            .map(|targets| {
                for target in targets {
                    println!("{target}");
                }
            })
            .context("Failed to list targets"),
        Command::History { json } => print_history(&processor, json),
        Command::Current => {
            println!("{}", describe(processor.current(), processor.current_branch().map(|b| b.as_str())));
            Ok(())
        }
    };
    processor.end().context("Failed to close connections")?;
    outcome
}

fn open(args: &DatabaseArgs) -> Result<UpgradeProcessor> {
    let mut default = ConnectionParams::new(&args.driver, &args.url);
    if let Some(user) = &args.user {
        default = default.username(user);
    }
    if let Some(password) = &args.password {
        default = default.password(password);
    }

    let mut config = ProcessorConfig::new(default);
    for text in &args.connections {
        let params = ConnectionParams::from_named_url(text)
            .with_context(|| format!("Invalid --connection '{text}'"))?;
        config = config.connection(params);
    }

    if !args.script.exists() {
        return Err(anyhow!("Upgrade script '{}' does not exist", args.script.display()));
    }

    let mut processor = UpgradeProcessor::new(config).context("Invalid connection configuration")?;
    processor
        .init(ScriptSource::from_path(&args.script))
        .with_context(|| format!("Failed to load '{}'", args.script.display()))?;
    Ok(processor)
}

fn describe(version: Option<&Version>, branch: Option<&str>) -> String {
    match (version, branch) {
        (None, _) => "<no version>".to_string(),
        (Some(version), None) => version.to_string(),
        (Some(version), Some(branch)) => format!("{version} (branch {branch})"),
    }
}

fn print_history(processor: &UpgradeProcessor, json: bool) -> Result<()> {
    if json {
        println!("{}", processor.history_json()?);
        return Ok(());
    }

    for entry in processor.history() {
        println!(
            "{:>4}  {:<9}  {:>12} --> {:<12}  {:<10}  {}",
            entry.sequence,
            entry.kind.keyword(),
            entry.source.as_ref().map(Version::as_str).unwrap_or(""),
            entry.target.as_str(),
            entry.branch.as_ref().map(|b| b.as_str()).unwrap_or(""),
            entry
                .stamp
                .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}
