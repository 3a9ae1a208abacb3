use dotenv::dotenv;
use human_panic::setup_panic;
use tracing::{debug, error, info, warn};

// 从 lib.rs 导入模块
use classroom_sync::config::AppConfig;
use classroom_sync::runtime::SyncSession;
use classroom_sync::runtime::lifetime;

fn main() {
    dotenv().ok();

    // 启动前预处理 //

    // 初始化配置
    setup_panic!();
    if let Err(e) = AppConfig::init() {
        eprintln!("Failed to initialize configuration: {e}");
        std::process::exit(1);
    }
    let config = AppConfig::get();

    // 初始化日志
    let stdout_log = std::io::stdout();
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(stdout_log);
    let filter = tracing_subscriber::EnvFilter::new(&config.app.log_level);
    let tracing_format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_ansi(true);

    let tracing_builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking_writer)
        .event_format(tracing_format);

    if config.is_development() {
        tracing_builder
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_builder.json().init();
    }

    debug!("Configuration loaded: {:?}", config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("{}", e.format_simple());
        std::process::exit(1);
    }
}

async fn run(config: &'static AppConfig) -> classroom_sync::errors::Result<()> {
    let context = lifetime::startup::prepare_session_startup(config).await?;
    warn!(
        "{} starting for {} {} with {} workers",
        config.app.system_name, context.viewer.role, context.viewer.id, config.runtime.workers
    );

    let session = SyncSession::start(
        context.viewer,
        context.provider,
        context.documents,
        context.options,
    )
    .await;

    let mut feed = session.subscribe_feed();
    let mut errors = session.sync_errors();

    tokio::select! {
        _ = async {
            loop {
                tokio::select! {
                    changed = feed.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = feed.borrow_and_update().clone();
                        info!(
                            "Feed updated (state v{}): {} notifications, {} unread",
                            current.state_version,
                            current.items.len(),
                            current.unread_count
                        );
                        for item in &current.items {
                            debug!("[{}] {} - {}", item.kind, item.title, item.message);
                        }
                    }
                    received = errors.recv() => {
                        match received {
                            Ok(e) => warn!("Sync error: {}", e.format_simple()),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Missed {} sync errors", n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        } => {}
        _ = lifetime::shutdown::listen_for_shutdown() => {}
    }

    session.shutdown().await;
    warn!("Graceful shutdown: all subscriptions released");
    Ok(())
}
