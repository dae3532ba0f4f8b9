use std::io::Write;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SummarizerConfig;
use crate::crawler::PaperItem;
use crate::parser::AffiliationExtractor;
use crate::utils::{BotError, BotResult};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// 送入模型的正文截断长度（按字符计）
const MAX_PROMPT_CHARS: usize = 20_000;

/// Gemini generateContent 请求体
#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

/// Gemini generateContent 响应体
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

pub struct Summarizer {
    client: Client,
    config: SummarizerConfig,
    affiliations: AffiliationExtractor,
}

impl Summarizer {
    pub fn new(config: &SummarizerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("arxivbot/0.1 (daily digest; mailto:user@example.com)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config: config.clone(),
            affiliations: AffiliationExtractor::new(),
        }
    }

    /// 下载 PDF 到临时文件，提取机构与全文，先生成英文总结再翻译成中文。
    /// 返回 (summary_en, zh_summary)。两次模型调用均为单次尝试，不重试。
    pub async fn summarize_paper(&self, paper: &PaperItem) -> BotResult<(String, String)> {
        info!("下载论文 PDF: {}", paper.pdf_url);
        let bytes = self.download_pdf(&paper.pdf_url).await?;

        // 临时文件随作用域结束删除，任何退出路径都会清理
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile()?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        let pdf_bytes = std::fs::read(tmp.path())?;

        let affiliations = match self.affiliations.extract(&pdf_bytes) {
            Ok(affs) => affs,
            Err(e) => {
                warn!("机构提取失败，按无机构处理: {}", e);
                Vec::new()
            }
        };

        let pages = pdf_extract::extract_text_from_mem_by_pages(&pdf_bytes)
            .map_err(|e| BotError::Pdf(e.to_string()))?;
        let full_text = pages.join("\n");
        let content = truncate_chars(&full_text, MAX_PROMPT_CHARS);

        let aff_text = affiliation_phrase(&affiliations);
        info!("生成英文总结: {}", paper.arxiv_id);
        let summary_en = self
            .generate(&build_summary_prompt(paper, &aff_text, content))
            .await?
            .trim()
            .to_string();

        info!("翻译为中文: {}", paper.arxiv_id);
        let zh_summary = self
            .generate(&build_translation_prompt(&summary_en))
            .await?
            .trim()
            .to_string();

        Ok((summary_en, zh_summary))
    }

    async fn download_pdf(&self, url: &str) -> BotResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BotError::Pdf(format!("PDF下载失败: {}", response.status())));
        }
        let bytes = response.bytes().await?.to_vec();
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            return Err(BotError::Pdf("响应不是有效的PDF文件".to_string()));
        }
        Ok(bytes)
    }

    /// 调用 Gemini generateContent，单次尝试。
    async fn generate(&self, prompt: &str) -> BotResult<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_ENDPOINT, self.config.model, self.config.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Model(format!("API 返回错误 {}: {}", status, body)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BotError::Model(format!("解析 API 响应失败: {}", e)))?;

        extract_candidate_text(parsed)
            .ok_or_else(|| BotError::Model("响应缺少候选文本".to_string()))
    }
}

fn extract_candidate_text(response: GenerateResponse) -> Option<String> {
    let candidate = response.candidates.into_iter().next()?;
    let part = candidate.content.parts.into_iter().next()?;
    Some(part.text)
}

fn affiliation_phrase(affiliations: &[String]) -> String {
    if affiliations.is_empty() {
        "the research team".to_string()
    } else {
        affiliations.join(", ")
    }
}

fn build_summary_prompt(paper: &PaperItem, aff_text: &str, content: &str) -> String {
    format!(
        "You are an expert academic summarizer.\n\
         Based on the following paper content, write a concise summary (1-2 paragraphs) in English.\n\
         The summary should start with: \"{aff_text} ...\" describing what they did, and naturally include the motivation, method, and results.\n\
         Write in formal academic English.\n\n\
         Title: {title}\n\
         Authors: {authors}\n\
         Affiliations: {aff_text}\n\
         Paper Content:\n{content}",
        aff_text = aff_text,
        title = paper.title,
        authors = paper.authors.join(", "),
        content = content,
    )
}

fn build_translation_prompt(summary_en: &str) -> String {
    format!(
        "将以下英文研究总结翻译成流畅、正式的学术中文，并保留专业术语。保持开头格式不变：\n\n{}",
        summary_en
    )
}

/// 按字符截断，避免切在多字节边界上。
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper() -> PaperItem {
        PaperItem {
            arxiv_id: "2401.00001v1".to_string(),
            title: "A Study".to_string(),
            summary: "abs".to_string(),
            authors: vec!["Alice".to_string(), "Bob".to_string()],
            pdf_url: "https://arxiv.org/pdf/2401.00001v1".to_string(),
            abs_url: "http://arxiv.org/abs/2401.00001v1".to_string(),
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("中文字符串", 3), "中文字");
        assert_eq!(truncate_chars("short", 20_000), "short");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn affiliation_phrase_fallback() {
        assert_eq!(affiliation_phrase(&[]), "the research team");
        assert_eq!(
            affiliation_phrase(&["MIT".to_string(), "CMU".to_string()]),
            "MIT, CMU"
        );
    }

    #[test]
    fn summary_prompt_carries_context() {
        let p = paper();
        let prompt = build_summary_prompt(&p, "the research team", "body text");
        assert!(prompt.contains("start with: \"the research team ...\""));
        assert!(prompt.contains("Title: A Study"));
        assert!(prompt.contains("Authors: Alice, Bob"));
        assert!(prompt.contains("Paper Content:\nbody text"));
    }

    #[test]
    fn translation_prompt_keeps_opening_instruction() {
        let prompt = build_translation_prompt("The team did X.");
        assert!(prompt.contains("保持开头格式不变"));
        assert!(prompt.ends_with("The team did X."));
    }

    #[test]
    fn candidate_text_from_response_json() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}],"role":"model"}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_candidate_text(parsed).as_deref(), Some("hello"));

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(extract_candidate_text(empty).is_none());
    }
}
