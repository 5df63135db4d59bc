use anyhow::{Context, bail};
use burst_buffer::client::router::RequestRouter;
use burst_buffer::config::{ClientConfig, FatalPolicy};
use burst_buffer::fleet::hash::HashKind;
use burst_buffer::fleet::types::Node;
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CHUNK: usize = 1 << 20;

/// Command-line client for a burst buffer fleet.
#[derive(Debug, Parser)]
#[command(name = "bbctl", version)]
struct Cli {
    /// JSON client config listing the fleet.
    #[arg(long, env = "BB_CLIENT_CONFIG", conflicts_with = "node")]
    config: Option<PathBuf>,

    /// Fleet member as host:port, in ring order. Repeatable.
    #[arg(long = "node", env = "BB_NODES", value_delimiter = ',')]
    node: Vec<Node>,

    #[arg(long, value_enum, default_value_t = HashKind::Md5)]
    hash: HashKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show attributes of a path.
    Stat { path: String },
    /// List a directory across the fleet.
    Ls { path: String },
    Mkdir {
        path: String,
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Remove a file, link or empty directory.
    Rm { path: String },
    /// Print a file to stdout.
    Cat { path: String },
    /// Upload a local file.
    Put { source: PathBuf, path: String },
    Mv { old: String, new: String },
    /// Run a write-back sweep on every node.
    Export,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("invalid octal mode {}: {}", s, e))
}

impl Cli {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        if let Some(path) = &self.config {
            return Ok(ClientConfig::from_file(path)?);
        }
        if self.node.is_empty() {
            bail!("pass --config or at least one --node");
        }

        let mut config = ClientConfig::new(self.node.clone());
        config.hash = self.hash;
        config.fatal = FatalPolicy::Propagate;
        config.prefetch.workers = 0;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let router = RequestRouter::connect(&cli.client_config()?)?;

    match cli.command {
        Command::Stat { path } => stat(&router, &path).await,
        Command::Ls { path } => ls(&router, &path).await,
        Command::Mkdir { path, mode } => Ok(router.mkdir(&path, mode).await?),
        Command::Rm { path } => rm(&router, &path).await,
        Command::Cat { path } => cat(&router, &path).await,
        Command::Put { source, path } => put(&router, &source, &path).await,
        Command::Mv { old, new } => Ok(router.rename(&old, &new).await?),
        Command::Export => Ok(router.local_file_export().await?),
    }
}

async fn stat(router: &Arc<RequestRouter>, path: &str) -> anyhow::Result<()> {
    let (stat, link) = router.get_attr(path).await?;
    let owner = router.owner(path)?;

    println!("  Path: {}", path);
    println!("  Size: {}", stat.size);
    println!("  Mode: {:o}", stat.mode);
    println!(" Links: {}", stat.nlink);
    println!("   Uid: {}  Gid: {}", stat.uid, stat.gid);
    println!(" Mtime: {}.{:09}", stat.mtime.sec, stat.mtime.nsec);
    if let Some(target) = link {
        println!("Target: {}", target);
    }
    println!(" Owner: {}", owner);
    Ok(())
}

async fn ls(router: &Arc<RequestRouter>, path: &str) -> anyhow::Result<()> {
    let mut entries = router.read_dir(path, 0).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        let kind = match entry.mode & libc::S_IFMT {
            libc::S_IFDIR => 'd',
            libc::S_IFLNK => 'l',
            _ => '-',
        };
        println!("{} {}", kind, entry.name);
    }
    Ok(())
}

async fn rm(router: &Arc<RequestRouter>, path: &str) -> anyhow::Result<()> {
    let (stat, _) = router.get_attr(path).await?;
    if stat.is_dir() {
        router.rmdir(path).await?;
    } else {
        router.unlink(path).await?;
    }
    Ok(())
}

async fn cat(router: &Arc<RequestRouter>, path: &str) -> anyhow::Result<()> {
    let handle = router.open(path, libc::O_RDONLY).await?;
    let mut stdout = std::io::stdout().lock();
    let mut offset = 0u64;

    let result = loop {
        match router.read(&handle, CHUNK, offset).await {
            Ok(bytes) if bytes.is_empty() => break Ok(()),
            Ok(bytes) => {
                stdout.write_all(&bytes)?;
                offset += bytes.len() as u64;
            }
            Err(e) => break Err(e),
        }
    };

    router.release(&handle).await?;
    stdout.flush()?;
    Ok(result?)
}

async fn put(router: &Arc<RequestRouter>, source: &Path, path: &str) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(source)
        .with_context(|| format!("opening {}", source.display()))?;
    let handle = router
        .create(path, libc::O_WRONLY | libc::O_TRUNC, 0o644)
        .await?;

    let mut buf = vec![0u8; CHUNK];
    let mut offset = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let written = router.write(&handle, offset, &buf[..n]).await?;
        offset += written as u64;
    }

    router.release(&handle).await?;
    eprintln!("{} bytes -> {} (on {})", offset, path, handle.node);
    Ok(())
}
