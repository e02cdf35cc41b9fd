use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tether_cli::commands::{self, RemoteArgs};
use tether_cli::confirm::ConfirmPolicy;
use tether_cli::profiles::{self, Profile, ProfileManager};
use tether_cli::CliSymlinks;
use tether_pipeline::{default_host_id, ScanOptions, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about = "Two-way directory synchronization over ssh")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Connection {
    /// Remote replica root. Without --host it is a local directory.
    #[arg(long)]
    remote_root: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    identity: Option<Utf8PathBuf>,
    /// `tether` executable on the remote host.
    #[arg(long)]
    remote_bin: Option<String>,
}

#[derive(Args, Clone, Copy)]
struct ScanFlags {
    #[arg(long, value_enum)]
    symlinks: Option<CliSymlinks>,
    #[arg(long)]
    include_dirs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage profiles (saved replica pairs)
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Run one synchronization round
    Sync {
        /// Local replica root
        #[arg(required_unless_present = "profile")]
        path: Option<Utf8PathBuf>,
        #[arg(short, long, help = "Use settings from a named profile")]
        profile: Option<String>,
        #[command(flatten)]
        connection: Connection,
        #[command(flatten)]
        scan: ScanFlags,
        /// Only report what a round would do
        #[arg(long)]
        status: bool,
        /// Rename conflicting local files aside instead of stopping
        #[arg(long)]
        rename: bool,
        #[arg(long, help = "Approve deletions on the local replica")]
        delete_local: bool,
        #[arg(long, help = "Approve deletions on the remote replica")]
        delete_remote: bool,
        #[arg(short, long, help = "Approve all deletions")]
        yes: bool,
        /// Name written into conflict copies
        #[arg(long, env = "TETHER_HOST_ID")]
        host_id: Option<String>,
    },
    /// Print paths changed after a mark (run on the remote side by `sync`)
    Changes {
        #[arg(long)]
        root: Utf8PathBuf,
        #[arg(long, default_value_t = 0)]
        since: u64,
        #[command(flatten)]
        scan: ScanFlags,
    },
    /// Print a replica's sync mark
    Mark { root: Utf8PathBuf },
}

#[derive(Subcommand)]
enum ProfileCommands {
    List,
    Add {
        #[arg(long, help = "Unique slug ID for the profile")]
        id: String,
        name: String,
        path: Utf8PathBuf,
        #[command(flatten)]
        connection: Connection,
        #[command(flatten)]
        scan: ScanFlags,
        #[arg(long)]
        rename: bool,
    },
    Remove {
        name: String,
    },
}

fn scan_options(flags: ScanFlags, base: ScanOptions) -> ScanOptions {
    ScanOptions {
        symlinks: flags.symlinks.map(Into::into).unwrap_or(base.symlinks),
        include_dirs: flags.include_dirs || base.include_dirs,
    }
}

fn remote_args(connection: Connection) -> anyhow::Result<RemoteArgs> {
    let root = connection
        .remote_root
        .ok_or_else(|| anyhow::anyhow!("--remote-root is required without --profile"))?;
    Ok(RemoteArgs {
        root,
        host: connection.host,
        user: connection.user,
        port: connection.port,
        identity_file: connection.identity,
        remote_bin: connection.remote_bin,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    // stdout carries `changes` and `mark` output.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Profile { command } => {
            let mgr = ProfileManager::new();
            match command {
                ProfileCommands::List => profiles::handle_list(&mgr)?,
                ProfileCommands::Add {
                    id,
                    name,
                    path,
                    connection,
                    scan,
                    rename,
                } => {
                    let profile = Profile {
                        id,
                        name,
                        local_path: path,
                        remote: remote_args(connection)?.into_spec(),
                        auto_rename: rename,
                        scan: scan_options(scan, ScanOptions::default()),
                    };
                    profiles::handle_add(&mgr, profile)?
                }
                ProfileCommands::Remove { name } => profiles::handle_remove(&mgr, &name)?,
            }
        }
        Commands::Sync {
            path,
            profile,
            connection,
            scan,
            status,
            rename,
            delete_local,
            delete_remote,
            yes,
            host_id,
        } => {
            let mut config = if let Some(p_name) = profile {
                let p = ProfileManager::new().find(&p_name)?;
                let mut config = p.to_config();
                if let Some(path) = path {
                    config.local_root = path;
                }
                config
            } else {
                let path = path.ok_or_else(|| anyhow::anyhow!("a local path is required"))?;
                SyncConfig::new(path, remote_args(connection)?.into_spec())
            };
            config.auto_rename |= rename;
            config.scan = scan_options(scan, config.scan);
            config.host_id = host_id.unwrap_or_else(default_host_id);

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!(":: Cancelling...");
                        cancel.cancel();
                    }
                });
            }

            let policy = ConfirmPolicy::from_flags(delete_local, delete_remote, yes);
            let code = commands::cmd_sync(config, status, policy, cancel).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Changes { root, since, scan } => {
            commands::cmd_changes(root, since, scan_options(scan, ScanOptions::default()))?
        }
        Commands::Mark { root } => commands::cmd_mark(root)?,
    }

    Ok(())
}
