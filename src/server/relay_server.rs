//! TCP accept loop and shared server state

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::server::delivery::DeliveryEngine;
use crate::server::dispatcher;
use crate::server::files::FileRelay;
use crate::server::groups::GroupStore;
use crate::server::mailbox::OfflineMailbox;
use crate::server::registry::SessionRegistry;
use crate::server::store::{ChatLog, EventLog, UserDirectory};

/// Shared state handed to every connection task.
pub struct ServerContext {
    pub config: RelayConfig,
    pub registry: Arc<SessionRegistry>,
    pub groups: Arc<GroupStore>,
    pub mailbox: Arc<OfflineMailbox>,
    pub chat_log: Arc<ChatLog>,
    pub event_log: Arc<EventLog>,
    pub users: Arc<UserDirectory>,
    pub files: Arc<FileRelay>,
    pub delivery: Arc<DeliveryEngine>,
}

/// The relay server: a bound listener plus the shared stores.
pub struct RelayServer {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayServer {
    /// Load durable state and bind the listener. A missing credential table
    /// or an unbindable address is fatal.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let users = Arc::new(UserDirectory::load(config.users_file()).await?);
        let groups = Arc::new(GroupStore::load(config.groups_file()).await?);
        let chat_log = Arc::new(ChatLog::open(config.chat_logs_dir()).await?);
        let event_log = Arc::new(EventLog::new(config.event_log_file()));
        let files = Arc::new(FileRelay::open(config.shared_files_dir()).await?);
        let registry = Arc::new(SessionRegistry::new());
        let mailbox = Arc::new(OfflineMailbox::new());

        let delivery = Arc::new(DeliveryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&groups),
            Arc::clone(&mailbox),
            Arc::clone(&chat_log),
            Arc::clone(&users),
        ));

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Relay listening on {} ({} registered users)",
            local_addr,
            users.usernames().len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(ServerContext {
            config,
            registry,
            groups,
            mailbox,
            chat_log,
            event_log,
            users,
            files,
            delivery,
        });

        Ok(Self {
            ctx,
            listener,
            local_addr,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops the accept loop and all connection tasks.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown is signalled. Accept errors are
    /// logged and the loop keeps going.
    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown signalled, closing listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("set_nodelay failed for {}: {}", addr, e);
                        }
                        let ctx = Arc::clone(&self.ctx);
                        let shutdown = self.shutdown_rx.clone();
                        tokio::spawn(dispatcher::handle_connection(ctx, stream, shutdown));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                    }
                },
            }
        }
    }
}
