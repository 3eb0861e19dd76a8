//! VK 会话归档命令行工具
//!
//! 子命令对应归档的四个阶段：dump（拉取到本地存储）、parse（生成聊天记录）、
//! atch（下载附件）、export（导出 JSON Lines）

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use vkms_rust::{
    parse_peer_ids, ArchiveListener, Archiver, ArchiverConfig, AttachmentKind, Phase, RunReport,
};

/// VK 会话归档工具
#[derive(Parser, Debug)]
#[command(name = "vkms-cli")]
#[command(about = "VK 会话归档工具 - 增量拉取会话、生成聊天记录并下载附件", long_about = None)]
struct Args {
    /// 输出目录
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// 只处理这些会话（逗号分隔，群聊可写作 c12）
    #[arg(short, long)]
    include: Option<String>,

    /// 跳过这些会话（逗号分隔）
    #[arg(short, long)]
    exclude: Option<String>,

    /// 日志级别（默认: info,vkms_rust=debug）
    #[arg(long, default_value = "info,vkms_rust=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 拉取会话到本地存储
    Dump {
        /// VK access token
        #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
        token: String,

        /// 并发处理的会话数
        #[arg(short, long, default_value_t = 2)]
        threads: usize,

        /// 每个会话最多拉取的消息数
        #[arg(short, long, default_value_t = 75_000, conflicts_with = "unbounded")]
        max: u64,

        /// 不限制消息数
        #[arg(long)]
        unbounded: bool,

        /// 增量模式：只拉取比本地最新消息更新的消息
        #[arg(long)]
        append: bool,
    },

    /// 生成聊天记录
    Parse {
        /// 输出格式
        #[arg(short, long, value_enum, default_value_t = TranscriptFormat::Txt)]
        format: TranscriptFormat,

        /// 并发处理的会话数
        #[arg(short, long, default_value_t = 2)]
        threads: usize,
    },

    /// 下载附件
    Atch {
        /// 下载并发数
        #[arg(short, long, default_value_t = 8)]
        threads: usize,

        /// 只下载这些类型（逗号分隔，如 photo,doc）
        #[arg(long, value_delimiter = ',')]
        types: Vec<AttachmentKind>,
    },

    /// 导出为 JSON Lines
    Export {
        /// 使用 gzip 压缩
        #[arg(long)]
        gzip: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TranscriptFormat {
    Txt,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str, out_dir: &Path) -> Result<PathBuf> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("无法创建输出目录 {}", out_dir.display()))?;
    let log_path = out_dir.join("vkms.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("无法创建日志文件 {}", log_path.display()))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(log_path)
}

/// 进度输出
struct CliArchiveListener;

#[async_trait::async_trait]
impl ArchiveListener for CliArchiveListener {
    async fn on_phase_start(&self, phase: Phase, total: usize) {
        info!("[CLI] 🔄 {} 开始，共 {} 个会话", phase.as_str(), total);
    }

    async fn on_progress(&self, phase: Phase, peer_id: i64, progress: i32) {
        info!("[CLI] 📊 {} 进度: {}%（会话 {}）", phase.as_str(), progress, peer_id);
    }

    async fn on_conversation_failed(&self, phase: Phase, peer_id: i64, error: String) {
        warn!("[CLI] ❌ {} 会话 {} 失败: {}", phase.as_str(), peer_id, error);
    }

    async fn on_phase_finish(&self, phase: Phase, failed: usize) {
        info!("[CLI] ✅ {} 结束，失败 {} 个", phase.as_str(), failed);
    }
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        match (&outcome.summary, &outcome.error) {
            (_, Some(err)) => error!("[CLI]   {} ❌ {}", outcome.peer_id, err),
            (Some(summary), None) => info!("[CLI]   {} ✅ {}", outcome.peer_id, summary),
            (None, None) => info!("[CLI]   {} ✅", outcome.peer_id),
        }
    }
    info!(
        "[CLI] 📋 {}：成功 {}，失败 {}",
        report.phase.as_str(),
        report.succeeded(),
        report.failed()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 参数校验先于任何 I/O
    let include = args.include.as_deref().map(parse_peer_ids).transpose()?;
    let exclude = args
        .exclude
        .as_deref()
        .map(parse_peer_ids)
        .transpose()?
        .unwrap_or_default();

    let log_path = init_logger(&args.log_level, &args.out)?;
    info!("[CLI] 🚀 VK 会话归档工具");
    info!("[CLI] 📂 输出目录: {}，日志: {}", args.out.display(), log_path.display());

    let mut config = ArchiverConfig::new(String::new(), args.out.clone());
    config.include = include;
    config.exclude = exclude;

    match &args.command {
        Command::Dump {
            token,
            threads,
            max,
            unbounded,
            append,
        } => {
            config.token = token.clone();
            config.threads = *threads;
            config.max_messages = if *unbounded { None } else { Some(*max) };
            config.append = *append;
        }
        Command::Parse { format, threads } => {
            info!("[CLI] 📝 输出格式: {:?}", format);
            config.threads = *threads;
        }
        Command::Atch { threads, types } => {
            config.attachment_threads = *threads;
            if !types.is_empty() {
                config.attachment_types = Some(types.iter().copied().collect::<BTreeSet<_>>());
            }
        }
        Command::Export { gzip } => {
            config.gzip = *gzip;
        }
    }

    let mut archiver = Archiver::new(config)?;
    archiver.set_listener(Arc::new(CliArchiveListener));

    let report = match args.command {
        Command::Dump { .. } => archiver.dump().await?,
        Command::Parse { .. } => archiver.parse().await?,
        Command::Atch { .. } => archiver.attachments().await?,
        Command::Export { .. } => archiver.export().await?,
    };
    print_report(&report);

    if !report.is_success() {
        anyhow::bail!("{} 个会话处理失败", report.failed());
    }
    Ok(())
}
