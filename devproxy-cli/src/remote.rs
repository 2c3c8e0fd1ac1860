//! `devproxy ping|browse`: commands that talk to a relay.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use devproxy::{
    BrowseEvent, BrowseFlags, Reference, Session, SessionConfig, SocketAddress, StreamTransport,
};
use tokio::net::TcpStream;

/// Relay connection options shared by remote commands.
#[derive(clap::Args)]
pub struct ConnectArgs {
    /// Relay address (`host:port`).
    #[arg(long, short = 'c', env = "DEVPROXY_RELAY")]
    connect: String,

    /// Proxy to route through; the relay's default proxy when omitted.
    #[arg(long, default_value_t = Reference::NULL)]
    proxy: Reference,

    /// Session configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Subcommands for `devproxy browse`.
#[derive(clap::Subcommand)]
pub enum BrowseAction {
    /// Resolve a host name to addresses.
    Resolve {
        /// Host name.
        host: String,
    },
    /// Discover instances of a service type (e.g. `_ipp._tcp`).
    Services {
        /// Service type.
        service_type: String,
    },
    /// List a directory on the proxy host.
    Dir {
        /// Directory path.
        path: String,
    },
}

impl ConnectArgs {
    /// Connects to the relay and starts a session.
    async fn session(&self) -> Result<Session> {
        let config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SessionConfig::default(),
        };
        let stream = TcpStream::connect(&self.connect)
            .await
            .with_context(|| format!("failed to connect to {}", self.connect))?;
        stream.set_nodelay(true)?;
        tracing::debug!(relay = %self.connect, "connected");
        let transport = StreamTransport::new(stream).with_max_frame(config.max_frame);
        Ok(Session::connect(transport, config)?)
    }
}

/// Pings `address` through the proxy and prints the result.
pub async fn ping(conn: &ConnectArgs, address: &str) -> Result<()> {
    let target = parse_address(address)?;
    let session = conn.session().await?;
    let resp = session.ping(conn.proxy, target).await?;
    let mac = resp
        .physical_address
        .0
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":");
    println!("{} ({mac}) time={}ms", resp.address, resp.time_ms);
    session.close();
    Ok(())
}

/// Runs one browse and prints results until the proxy reports the batch
/// complete.
pub async fn browse(conn: &ConnectArgs, action: BrowseAction) -> Result<()> {
    let session = conn.session().await?;
    let mut browser = session.browse(conn.proxy).await?;
    {
        let mut stream = match &action {
            BrowseAction::Resolve { host } => browser.resolve(host).await?,
            BrowseAction::Services { service_type } => browser.services(service_type).await?,
            BrowseAction::Dir { path } => browser.dirpath(path).await?,
        };
        while let Some(event) = stream.next().await? {
            match event {
                BrowseEvent::Item(item) => {
                    let mark = if item.flags.contains(BrowseFlags::REMOVED) {
                        "-"
                    } else {
                        "+"
                    };
                    println!("{mark} {}", item.item);
                }
                BrowseEvent::Done(_) => break,
                _ => {}
            }
        }
    }
    browser.close().await?;
    session.close();
    Ok(())
}

/// Parses `ip:port`, falling back to a proxy-resolved `host:port`.
fn parse_address(s: &str) -> Result<SocketAddress> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr.into());
    }
    let Some((host, port)) = s.rsplit_once(':') else {
        bail!("address `{s}` has no port");
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid port in `{s}`"))?;
    Ok(SocketAddress::proxy(host, port))
}
