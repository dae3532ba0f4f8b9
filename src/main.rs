mod config;
mod crawler;
mod digest;
mod mailer;
mod parser;
mod summarizer;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::AppConfig;
use crawler::{ArxivCrawler, PaperItem};
use digest::PaperDigest;
use mailer::Mailer;
use parser::FigureExtractor;
use summarizer::Summarizer;
use utils::logger;

#[derive(Parser)]
#[command(name = "arxivbot")]
#[command(about = "arXiv 每日论文摘要邮件机器人", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 抓取、总结并发送今日摘要邮件
    Run,
    /// 只写本地 HTML 预览，不连接 SMTP
    Preview,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("arxivbot 启动");

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_command(true).await?,
        Commands::Preview => run_command(false).await?,
    }

    Ok(())
}

/// 全流程严格串行：逐篇论文总结，单篇失败记为跳过不影响其余；
/// 邮件组装与投递失败则整体终止。
async fn run_command(deliver: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    info!(
        "分类: {}, 回看窗口: {}h, 收件人: {}",
        config.fetcher.category,
        config.fetcher.lookback_hours,
        config.mail.recipients.len()
    );

    let arxiv = ArxivCrawler::new();
    let papers = arxiv
        .fetch_latest_day(&config.fetcher.category, config.fetcher.lookback_hours)
        .await?;

    let summarizer = Summarizer::new(&config.summarizer);
    let figure_extractor = FigureExtractor::new();

    let mut digests = Vec::new();
    let mut skipped = 0usize;
    for (i, paper) in papers.iter().enumerate() {
        info!("处理论文 {}/{}: {}", i + 1, papers.len(), paper.arxiv_id);

        let (summary_en, zh_summary) = match summarizer.summarize_paper(paper).await {
            Ok(texts) => texts,
            Err(e) => {
                warn!("摘要生成失败，跳过 {}: {}", paper.arxiv_id, e);
                skipped += 1;
                continue;
            }
        };

        let figure = fetch_main_figure(&arxiv, &figure_extractor, paper).await;
        digests.push(PaperDigest::new(paper.clone(), summary_en, zh_summary, figure));
    }

    // 没有新论文也照常发占位邮件
    let email = digest::build_digest_email(&digests, &config)?;
    mailer::write_preview(&email.html_body).await?;

    if deliver {
        let mailer = Mailer::new(&config.mail)?;
        mailer.send(email.message).await?;
    } else {
        info!("预览模式，跳过发送");
    }

    info!("✅ 完成: {} 篇入报, {} 篇跳过", digests.len(), skipped);
    Ok(())
}

/// 主图是 best effort：下载或提取失败一律降级为无图。
async fn fetch_main_figure(
    arxiv: &ArxivCrawler,
    extractor: &FigureExtractor,
    paper: &PaperItem,
) -> Option<Vec<u8>> {
    let pdf_bytes = match arxiv.download_pdf(&paper.pdf_url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("主图下载失败 {}: {}", paper.arxiv_id, e);
            return None;
        }
    };

    match extractor.extract_main_figure(&pdf_bytes) {
        Ok(figure) => figure,
        Err(e) => {
            warn!("主图提取失败 {}: {}", paper.arxiv_id, e);
            None
        }
    }
}
