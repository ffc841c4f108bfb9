//! 主应用程序入口
//!
//! 读取配置、连接 Postgres 和 Redis、启动通知总线，然后提供 Axum 服务。
//! 收到 Ctrl-C / SIGTERM 后先停止接收新连接，再取消并等待后台任务。

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use application::{RelayHub, RelaySettings};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 配置文件路径：命令行第一个参数，其次 RELAY_CONFIG
    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("RELAY_CONFIG").ok())
        .map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("加载配置失败")?;
    config.validate().context("配置校验失败")?;

    tracing::info!(
        database = %config.database.url.split('@').last().unwrap_or("unknown"),
        channel = %config.redis.channel,
        protocol = config.relay.protocol_version,
        "配置已加载"
    );

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("连接外部依赖失败")?;

    let hub = Arc::new(RelayHub::new(
        RelaySettings::from_config(&config),
        infrastructure.dependencies(),
    )?);
    if !hub.start().await {
        anyhow::bail!("启动时取消，未完成首次快照加载");
    }

    let app = router(AppState::new(hub.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址 {} 失败", addr))?;

    tracing::info!("状态中继服务启动在 http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub.clone()))
    .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 等待停止信号；WebSocket 是长连接，先停止后台任务并关闭连接，
/// 优雅关闭才能结束
async fn shutdown_signal(hub: Arc<RelayHub>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "监听 Ctrl-C 失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "监听 SIGTERM 失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("收到停止信号");
    hub.shutdown().await;
}
