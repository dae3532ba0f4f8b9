use std::env;

use crate::utils::{BotError, BotResult};

/// 运行期配置，启动时从环境变量读取一次，之后只读。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub fetcher: FetcherConfig,
    pub summarizer: SummarizerConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub category: String,
    pub lookback_hours: i64,
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub recipients: Vec<String>,
    /// 是否在邮件正文内嵌论文主图（默认关闭）
    pub include_figures: bool,
}

impl AppConfig {
    /// 读取 .env 与进程环境变量，组装配置。
    pub fn from_env() -> BotResult<Self> {
        dotenvy::dotenv().ok();

        let category = env_or("ARXIV_CATEGORY", "cs.CR");
        let lookback_hours = env_or("ARXIV_LOOKBACK_HOURS", "168")
            .parse::<i64>()
            .map_err(|e| BotError::Config(format!("ARXIV_LOOKBACK_HOURS 无效: {}", e)))?;

        let smtp_host = require("SMTP_HOST")?;
        let smtp_port = env_or("SMTP_PORT", "587")
            .parse::<u16>()
            .map_err(|e| BotError::Config(format!("SMTP_PORT 无效: {}", e)))?;
        let smtp_user = require("SMTP_USER")?;
        let smtp_pass = require("SMTP_PASS")?;

        let mail_to = env::var("MAIL_TO").unwrap_or_else(|_| smtp_user.clone());
        let recipients = parse_recipients(&mail_to);
        if recipients.is_empty() {
            return Err(BotError::Config("MAIL_TO 未包含任何收件地址".to_string()));
        }

        let api_key = require("GOOGLE_API_KEY")?;
        let model = env_or("GEMINI_MODEL", "gemini-2.5-flash");

        let include_figures = matches!(
            env_or("ARXIV_INCLUDE_FIGURES", "false").to_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        Ok(Self {
            fetcher: FetcherConfig {
                category,
                lookback_hours,
            },
            summarizer: SummarizerConfig { api_key, model },
            mail: MailConfig {
                smtp_host,
                smtp_port,
                smtp_user,
                smtp_pass,
                recipients,
                include_figures,
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require(key: &str) -> BotResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BotError::Config(format!("缺少环境变量 {}", key))),
    }
}

/// 逗号分隔的收件人列表，去掉空白项。
fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
