use std::sync::Arc;

use anyhow::Context;
use cloudtree_core::StorageProvider;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::config::{AppConfig, StorageSettings};
use crate::gateway::ConsistencyGateway;
use crate::service::CommandService;
use crate::session::{SessionEngine, SessionRequest, SessionResponse};
use crate::storage::{LocalDiskStore, MetadataStore, SqliteMetadataStore};

/// Wired-up runtime: both stores opened, tree loaded.
pub struct App {
    pub config: AppConfig,
    pub service: Arc<CommandService>,
    pub sessions: SessionEngine,
}

impl App {
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.storage_root)
            .await
            .with_context(|| {
                format!("failed to create storage root at {:?}", config.storage_root)
            })?;
        let physical = LocalDiskStore::open(config.data_root())
            .await
            .context("failed to open the byte store")?;

        let metadata: Arc<dyn MetadataStore> = match &config.storage {
            StorageSettings::Sqlite { url } => Arc::new(
                SqliteMetadataStore::connect(url)
                    .await
                    .with_context(|| format!("failed to open metadata database {url}"))?,
            ),
            StorageSettings::SqlServer { .. } => anyhow::bail!(
                "the {} provider is not available in this build; use {}",
                StorageProvider::SqlServer,
                StorageProvider::Sqlite
            ),
        };

        let gateway = ConsistencyGateway::open(Arc::new(physical), metadata, config.policies)
            .await
            .context("failed to load the tree from metadata")?;
        let gateway = Arc::new(gateway);
        let service = Arc::new(CommandService::new(
            Arc::clone(&gateway),
            config.export.clone(),
        ));
        let sessions = SessionEngine::with_shutdown(gateway, service.shutdown_token());
        info!(
            root = %config.storage_root.display(),
            provider = %config.storage.provider(),
            conflict = %config.policies.file_conflict,
            delete = %config.policies.directory_delete,
            "cloudtree started"
        );
        Ok(Self {
            config,
            service,
            sessions,
        })
    }

    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        serve(&self.sessions, BufReader::new(tokio::io::stdin()), &mut stdout).await
    }
}

/// One JSON request per input line, one JSON response per output line,
/// until the input ends.
pub async fn serve<R, W>(sessions: &SessionEngine, reader: R, writer: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<SessionRequest>(&line) {
            Ok(request) => sessions.handle(request).await,
            Err(err) => {
                warn!(%err, "undecodable request");
                SessionResponse::rejected(format!("invalid request: {err}"))
            }
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .context("failed to write response")?;
        writer.flush().await?;
        served += 1;
    }
    info!(served, "input closed");
    Ok(())
}
