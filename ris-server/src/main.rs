//! RIS服务器主程序

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ris_admin::{init_tracing, ConfigManager, IntegrationConfig, RisConfig, StoreBackend};
use ris_core::integration::{ArchiveLinker, SigningService};
use ris_core::utils::SystemClock;
use ris_core::{MemoryOrderStore, OrderStore};
use ris_database::{DatabasePool, DatabaseQueries, PgOrderStore, PoolSettings};
use ris_integration::{
    DigestSigningService, HttpArchiveLinker, LoggingArchiveLinker, PlainTextRenderer,
    RemoteSigningClient,
};
use ris_web::{AppState, WebServer};
use ris_workflow::{Collaborators, RadiologyWorkflow, WorkflowSettings};
use tracing::{error, info, warn};

/// RIS服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "ris-server")]
#[command(about = "RIS (Radiology Information System) 服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 输出生效配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::load(args.config.as_deref())?;
    if args.print_config {
        println!("{}", manager.to_toml().await?);
        return Ok(());
    }

    let mut config = manager.get_config().await;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("启动RIS服务器...");
    info!("  存储后端: {:?}", config.store.backend);
    info!("  排队时区偏移: {} 分钟", config.queue.utc_offset_minutes);

    let store = open_store(&config).await?;
    let workflow = RadiologyWorkflow::new(
        store,
        Arc::new(SystemClock),
        collaborators(&config.integration)?,
        WorkflowSettings {
            utc_offset_minutes: config.queue.utc_offset_minutes,
            ..WorkflowSettings::default()
        },
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let server = WebServer::new(addr, AppState::new(Arc::new(workflow)));

    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn open_store(config: &RisConfig) -> Result<Arc<dyn OrderStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, data will be lost on restart");
            Ok(Arc::new(MemoryOrderStore::new()))
        }
        StoreBackend::Postgres => {
            let settings = PoolSettings {
                max_connections: config.database.max_connections,
                min_connections: config.database.min_connections,
                connect_timeout: config.database.connect_timeout(),
            };
            let pool = DatabasePool::connect(&config.database.url, &settings).await?;
            DatabaseQueries::new(&pool)
                .create_tables()
                .await
                .context("Failed to prepare database schema")?;
            Ok(Arc::new(PgOrderStore::new(pool, config.queue.max_assign_retries)))
        }
    }
}

fn collaborators(config: &IntegrationConfig) -> Result<Collaborators> {
    let signer: Arc<dyn SigningService> = match &config.signing_url {
        Some(url) => {
            info!("Using remote signing gateway at {}", url);
            Arc::new(RemoteSigningClient::new(url, config.request_timeout())?)
        }
        None => {
            warn!("No signing gateway configured, reports are signed with a local digest");
            Arc::new(DigestSigningService::new(config.signing_secret.clone()))
        }
    };

    let archive: Arc<dyn ArchiveLinker> = match &config.archive_url {
        Some(url) => Arc::new(HttpArchiveLinker::new(url, config.request_timeout())?),
        None => Arc::new(LoggingArchiveLinker),
    };

    Ok(Collaborators {
        signer,
        renderer: Arc::new(PlainTextRenderer::new(config.hospital_name.clone())),
        archive,
    })
}
