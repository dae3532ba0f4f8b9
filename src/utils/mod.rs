pub mod logger;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("网络请求错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("PDF处理错误: {0}")]
    Pdf(String),

    #[error("模型API错误: {0}")]
    Model(String),

    #[error("邮件构建错误: {0}")]
    MailBuild(#[from] lettre::error::Error),

    #[error("收件地址错误: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("邮件发送错误: {0}")]
    Mail(#[from] lettre::transport::smtp::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type BotResult<T> = Result<T, BotError>;
