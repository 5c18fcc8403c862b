//! 家庭 SDK CLI（模拟版）
//!
//! 在进程内远端树上跑一遍完整流程：建家庭、发起回家请求、成员走回家被自动清除、
//! 聊天窗口实时更新和向前翻页。

use anyhow::{Context, Result};
use clap::Parser;
use family_sdk_core::sdk::call_home::{CallHomeListener, CallHomeStatus, ClearedRequest};
use family_sdk_core::sdk::chat::{ChatItem, ChatWindowView};
use family_sdk_core::{
    FamilyClient, GeoPoint, MemoryStore, RemoteStore, SdkConfig, SdkError, SessionContext,
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

const FAMILY_ID: &str = "demo-family";
const PARENT_ID: &str = "parent";
const KID_ID: &str = "kid";
const HOME: GeoPoint = GeoPoint {
    latitude: 31.2304,
    longitude: 121.4737,
};
/// 一度纬度约合的米数
const METERS_PER_DEGREE: f64 = 111_195.0;

/// 家庭 SDK CLI
#[derive(Parser, Debug)]
#[command(name = "family-cli")]
#[command(about = "家庭定位 SDK CLI - 在内存远端上模拟回家请求和家庭聊天", long_about = None)]
struct Args {
    /// 成员出发时距家的距离（米）
    #[arg(long, default_value = "500")]
    start_meters: f64,

    /// 每步走近的距离（米）
    #[arg(long, default_value = "60")]
    step_meters: f64,

    /// 每步间隔（毫秒）
    #[arg(long, default_value = "200")]
    step_interval_ms: u64,

    /// 预置的历史聊天消息数量
    #[arg(long, default_value = "45")]
    history: i64,

    /// 聊天分页大小
    #[arg(long, default_value = "20")]
    page_size: usize,

    /// 日期分隔符使用的时区偏移（分钟）
    #[arg(long, default_value = "480")]
    utc_offset_minutes: i32,

    /// 云函数地址；不指定时不发送通知
    #[arg(long)]
    functions_url: Option<String>,

    /// 日志级别（默认: info,family_sdk_core=debug）
    #[arg(long, default_value = "info,family_sdk_core=debug")]
    log_level: String,

    /// 额外写入的日志文件
    #[arg(long)]
    log_file: Option<String>,
}

/// 初始化日志（stdout，可选同时写文件）
fn init_logger(log_level: &str, log_file: Option<&str>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path);
    }
    Ok(())
}

struct CliCallHomeListener;

#[async_trait::async_trait]
impl CallHomeListener for CliCallHomeListener {
    async fn on_request_cleared(&self, cleared: ClearedRequest) {
        info!(
            "[CLI/CallHome] 🏠 {} 已到家（{} 米），回家请求已清除",
            cleared.target_id, cleared.distance_meters
        );
    }

    async fn on_watch_failed(&self, error: SdkError) {
        error!("[CLI/CallHome] ❌ 自动清除中断: {}", error);
    }
}

fn north_of_home(meters: f64) -> GeoPoint {
    GeoPoint::new(HOME.latitude + meters / METERS_PER_DEGREE, HOME.longitude)
}

/// 预置家庭、成员和历史聊天
async fn seed(store: &MemoryStore, start_meters: f64, history: i64) -> Result<()> {
    let start = north_of_home(start_meters);
    store
        .set(
            &family_sdk_core::sdk::store::DataPath::root(),
            json!({
                "users": {
                    PARENT_ID: {"name": "Parent", "familyId": FAMILY_ID, "batteryLevel": 76,
                                "lastLocation": {"latitude": HOME.latitude, "longitude": HOME.longitude}},
                    KID_ID: {"name": "Kid", "familyId": FAMILY_ID, "batteryLevel": 41,
                             "lastLocation": {"latitude": start.latitude, "longitude": start.longitude}}
                },
                "families": {
                    FAMILY_ID: {
                        "members": {PARENT_ID: true, KID_ID: true},
                        "home": {"latitude": HOME.latitude, "longitude": HOME.longitude}
                    }
                }
            }),
        )
        .await?;

    // 每 6 小时一条，跨越多天
    let now = chrono::Utc::now().timestamp_millis();
    for i in 0..history {
        let timestamp = now - (history - i) * 6 * 3_600_000;
        let id = format!("history-{:03}", i);
        let sender = if i % 2 == 0 { PARENT_ID } else { KID_ID };
        store
            .set(
                &family_sdk_core::sdk::store::paths::chat_message(FAMILY_ID, &id),
                json!({
                    "senderId": sender,
                    "timestamp": timestamp,
                    "negTimestamp": -timestamp,
                    "type": "TEXT",
                    "text": format!("历史消息 #{}", i)
                }),
            )
            .await?;
    }
    info!("[CLI] 🌱 已预置家庭 {} 和 {} 条历史消息", FAMILY_ID, history);
    Ok(())
}

fn print_view(view: &ChatWindowView) {
    let messages = view
        .items
        .iter()
        .filter(|item| matches!(item, ChatItem::Message(_)))
        .count();
    info!(
        "[CLI/Chat] 💬 窗口 {} 条消息, has_more={}, loading={}",
        messages, view.has_more, view.loading
    );
    for item in view.items.iter().take(4) {
        match item {
            ChatItem::Message(m) => info!(
                "[CLI/Chat]   {} {}: {} {:?}",
                m.id,
                m.sender_id,
                m.text.as_deref().unwrap_or("<media>"),
                m.reactions
            ),
            ChatItem::DateSeparator(day) => info!("[CLI/Chat]   ──── {} ────", day),
        }
    }
    if let Some(e) = &view.fetch_error {
        warn!("[CLI/Chat] 历史拉取失败: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_deref())?;

    info!("[CLI] 🚀 家庭 SDK CLI（模拟模式）");
    info!(
        "[CLI] 🚶 出发距离 {} 米，每步 {} 米",
        args.start_meters, args.step_meters
    );

    let store = Arc::new(MemoryStore::new());
    seed(&store, args.start_meters, args.history).await?;

    let mut config = SdkConfig::new();
    config.chat_page_size = args.page_size;
    config.utc_offset_minutes = args.utc_offset_minutes;
    if let Some(url) = &args.functions_url {
        config.functions_base_url = url.clone();
    }

    let mut parent = FamilyClient::new(
        config.clone(),
        SessionContext::new(PARENT_ID, "parent-token"),
        store.clone(),
    );
    if args.functions_url.is_some() {
        parent.connect_functions()?;
    }
    parent.set_call_home_listener(Arc::new(CliCallHomeListener));
    let kid = FamilyClient::new(config, SessionContext::new(KID_ID, "kid-token"), store.clone());

    // 成员汇总
    let mut overview = parent.families().member_overview(FAMILY_ID);
    let overview_task = tokio::spawn(async move {
        while let Some(item) = overview.next().await {
            match item {
                Ok(rows) => {
                    for row in rows {
                        info!(
                            "[CLI/Family] 👤 {} 电量={:?} 回家中={} 距家={:?}",
                            row.member.name,
                            row.member.battery_level,
                            row.going_home,
                            row.distance_to_home
                        );
                    }
                }
                Err(e) => {
                    error!("[CLI/Family] ❌ 成员订阅结束: {}", e);
                    break;
                }
            }
        }
    });

    // 回家请求
    let call_home = parent
        .current_call_home()
        .await
        .context("查找当前家庭失败")?;
    let watch = call_home.watch_auto_clear();
    call_home.create(KID_ID).await.context("创建回家请求失败")?;
    if let Err(e) = call_home.create(KID_ID).await {
        info!("[CLI] 重复请求被拒绝: {}", e);
    }
    kid.call_home(FAMILY_ID)
        .resolve(KID_ID, CallHomeStatus::Accepted)
        .await
        .context("接受回家请求失败")?;

    let mut request = call_home.request(KID_ID);
    let presence = kid.presence();
    let mut remaining = args.start_meters;
    loop {
        remaining = (remaining - args.step_meters).max(0.0);
        presence.report_location(north_of_home(remaining)).await?;
        sleep(Duration::from_millis(args.step_interval_ms)).await;
        if remaining <= 0.0 {
            break;
        }
    }
    match request.next().await {
        Some(Ok(None)) => info!("[CLI] ✅ 回家请求已不存在"),
        Some(Ok(Some(r))) => warn!("[CLI] 回家请求仍存在，状态 {}", r.status),
        Some(Err(e)) => error!("[CLI] ❌ 读取回家请求失败: {}", e),
        None => {}
    }
    drop(watch);

    // 聊天窗口
    let (mut window, handle) = parent.open_chat_window(FAMILY_ID);
    let first = window.next().await.context("聊天窗口意外关闭")??;
    print_view(&first);

    let kid_chat = kid.chat(FAMILY_ID);
    let sent = kid_chat.send_text("我到家啦").await?;
    if let Some(Ok(view)) = window.next().await {
        print_view(&view);
    }
    parent.chat(FAMILY_ID).set_reaction(&sent.id, Some("👍")).await?;
    if let Some(Ok(view)) = window.next().await {
        print_view(&view);
    }

    let mut view = first;
    while let Some(oldest) = window.state().messages().last().map(|m| m.id.clone()) {
        if !window.state().should_fetch(&oldest) {
            break;
        }
        handle.scrolled_to(&oldest);
        // 一次 loading，一次合并结果
        for _ in 0..2 {
            match window.next().await {
                Some(Ok(next)) => view = next,
                Some(Err(e)) => return Err(e).context("聊天窗口结束"),
                None => break,
            }
        }
        print_view(&view);
    }
    let separators = view
        .items
        .iter()
        .filter(|item| matches!(item, ChatItem::DateSeparator(_)))
        .count();
    info!(
        "[CLI] 📚 全部 {} 条消息已加载，共 {} 个日期分隔符",
        window.state().messages().len(),
        separators
    );

    drop(window);
    overview_task.abort();
    info!(
        "[CLI] 👋 程序退出，残留监听 {} 个",
        store.active_listener_count()
    );
    Ok(())
}
