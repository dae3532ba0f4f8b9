use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::MailConfig;
use crate::utils::BotResult;

/// 每次运行覆盖写入的本地预览文件
pub const PREVIEW_FILE: &str = "arxiv_daily.html";

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    /// STARTTLS + 登录认证的 SMTP 通道。
    pub fn new(config: &MailConfig) -> BotResult<Self> {
        let credentials = Credentials::new(config.smtp_user.clone(), config.smtp_pass.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();
        Ok(Self { transport })
    }

    /// 单次投递，中继或认证失败直接向上传播终止本次运行。
    pub async fn send(&self, message: Message) -> BotResult<()> {
        info!("正在发送邮件...");
        self.transport.send(message).await?;
        info!("邮件发送完成");
        Ok(())
    }
}

/// 发送前把 HTML 正文写到固定预览文件，覆盖上一次的产物。
pub async fn write_preview(html_body: &str) -> BotResult<()> {
    tokio::fs::write(PREVIEW_FILE, html_body).await?;
    info!("预览已写入 {}", PREVIEW_FILE);
    Ok(())
}
