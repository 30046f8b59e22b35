use anyhow::Result;
use capitan::{CapitanApp, CapitanSettings, CommandKind, DockerRuntime, ProjectDefinition};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "capitan")]
#[command(about = "Deploy and orchestrate docker containers from a project definition")]
#[command(version)]
#[command(long_about = "Capitan reads a project definition produced by a config command, \
expands its services into numbered container instances and brings the docker engine in line \
with it: creating, recreating, starting and tearing down containers in placement order.")]
struct Args {
    /// Command producing the project definition
    #[arg(
        short,
        long,
        global = true,
        default_value = "./capitan.cfg.sh",
        help = "Config command, or a .toml file, producing the project definition"
    )]
    cmd: String,

    /// Tool settings file
    #[arg(
        long,
        global = true,
        default_value = "capitan.settings.toml",
        help = "Path to the optional settings file"
    )]
    settings: String,

    /// Enable debug logging
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Print what would change without changing it
    #[arg(long, global = true, alias = "dry", help = "Preview changes without applying them")]
    dry_run: bool,

    /// Restrict the run to one service type or container name
    #[arg(short, long, global = true, help = "Only act on a service type or container name")]
    filter: Option<String>,

    /// Override log format (json, pretty, compact)
    #[arg(
        long,
        global = true,
        value_name = "FORMAT",
        help = "Log output format: json, pretty, or compact"
    )]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, recreate and start containers
    Up {
        #[arg(short, long, help = "Stay attached to container output")]
        attach: bool,
    },
    /// Create containers without starting them
    Create,
    /// Start existing containers
    Start {
        #[arg(short, long, help = "Stay attached to container output")]
        attach: bool,
    },
    /// Bring one service to its declared scale
    Scale { service: String },
    /// Restart containers
    Restart {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop containers
    Stop {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Kill containers
    Kill {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Remove containers
    Rm {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List containers
    Ps {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print container addresses
    Ip,
    /// Build images with a build context
    Build,
    /// Pull images without a build context
    Pull,
    /// Follow container logs
    Logs,
    /// Stream container stats
    Stats,
    /// Print the interpreted project
    Show,
}

impl Command {
    fn into_kind(self) -> CommandKind {
        match self {
            Command::Up { attach } => CommandKind::Up { attach },
            Command::Create => CommandKind::Create,
            Command::Start { attach } => CommandKind::Start { attach },
            Command::Scale { service } => CommandKind::Scale { service },
            Command::Restart { args } => CommandKind::Restart { args },
            Command::Stop { args } => CommandKind::Stop { args },
            Command::Kill { args } => CommandKind::Kill { args },
            Command::Rm { args } => CommandKind::Rm { args },
            Command::Ps { args } => CommandKind::Ps { args },
            Command::Ip => CommandKind::Ip,
            Command::Build => CommandKind::Build,
            Command::Pull => CommandKind::Pull,
            Command::Logs => CommandKind::Logs,
            Command::Stats => CommandKind::Stats,
            Command::Show => CommandKind::Show,
        }
    }
}

/// Sub-command name and arguments handed to the config command
fn config_command_args(command: &CommandKind) -> Vec<String> {
    let mut args = vec![command.name().to_string()];
    match command {
        CommandKind::Scale { service } => args.push(service.clone()),
        CommandKind::Restart { args: extra }
        | CommandKind::Stop { args: extra }
        | CommandKind::Kill { args: extra }
        | CommandKind::Rm { args: extra }
        | CommandKind::Ps { args: extra } => args.extend(extra.iter().cloned()),
        _ => {}
    }
    args
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    if args.dry_run {
        info!("Previewing changes, nothing will be modified");
    }

    let settings = CapitanSettings::load_from_file(&args.settings)?;
    settings.validate()?;

    let command = args.command.into_kind();
    let definition = ProjectDefinition::load(
        &args.cmd,
        &settings.hooks.shell,
        &config_command_args(&command),
    )
    .await?;

    let mut project = definition.expand(settings.scale.window);
    if let Some(filter) = args.filter.as_deref() {
        project = project.filtered(filter);
        if project.declared.is_empty() && project.cleanup.is_empty() {
            warn!("Filter {} matches no containers", filter);
        }
    }

    let runtime = Arc::new(DockerRuntime::new(settings.runtime.binary.clone()));
    let app = CapitanApp::new(settings, project, runtime, args.dry_run);
    app.run(&command).await?;
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug { "debug" } else { "info" };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("capitan={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().compact().with_target(false).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}
