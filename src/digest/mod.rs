use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::crawler::PaperItem;
use crate::utils::BotResult;

/// 一篇论文的处理结果，构造后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperDigest {
    pub paper: PaperItem,
    pub summary_en: String,
    pub zh_summary: String,
    pub main_img_bytes: Option<Vec<u8>>,
    pub main_img_cid: Option<String>,
}

impl PaperDigest {
    /// cid 与图片字节同生同灭：只有非空图片才配 cid。
    pub fn new(
        paper: PaperItem,
        summary_en: String,
        zh_summary: String,
        main_img_bytes: Option<Vec<u8>>,
    ) -> Self {
        let main_img_bytes = main_img_bytes.filter(|b| !b.is_empty());
        let main_img_cid = main_img_bytes
            .as_ref()
            .map(|_| format!("img-{}", paper.arxiv_id));
        Self {
            paper,
            summary_en,
            zh_summary,
            main_img_bytes,
            main_img_cid,
        }
    }
}

/// 组装完成的邮件，正文单独保留一份用于写预览文件。
pub struct DigestEmail {
    pub message: Message,
    pub html_body: String,
}

/// 组装日报邮件：multipart/related(multipart/alternative(纯文本, HTML), 内嵌图...)。
/// 摘要列表为空时仍生成占位正文。
pub fn build_digest_email(digests: &[PaperDigest], config: &AppConfig) -> BotResult<DigestEmail> {
    let html_body = render_html_body(
        &config.fetcher.category,
        digests,
        config.mail.include_figures,
    );

    let subject = format!(
        "[arXiv {}] 每日摘要（{}）",
        config.fetcher.category,
        Local::now().format("%Y-%m-%d")
    );

    let mut builder = Message::builder()
        .from(config.mail.smtp_user.parse::<Mailbox>()?)
        .subject(subject);
    for to in &config.mail.recipients {
        builder = builder.to(to.parse::<Mailbox>()?);
    }

    let alternative = MultiPart::alternative()
        .singlepart(SinglePart::plain("请使用 HTML 邮件查看。".to_string()))
        .singlepart(SinglePart::html(html_body.clone()));

    let mut related = MultiPart::related().multipart(alternative);
    if config.mail.include_figures {
        for digest in digests {
            if let (Some(bytes), Some(cid)) = (&digest.main_img_bytes, &digest.main_img_cid) {
                let inline = Attachment::new_inline(cid.clone()).body(
                    Body::new(bytes.clone()),
                    ContentType::parse("image/png").expect("valid mime"),
                );
                related = related.singlepart(inline);
            }
        }
    }

    let message = builder.multipart(related)?;
    Ok(DigestEmail { message, html_body })
}

fn render_html_body(category: &str, digests: &[PaperDigest], include_figures: bool) -> String {
    let blocks: String = digests
        .iter()
        .enumerate()
        .map(|(i, d)| render_block(i + 1, d, include_figures))
        .collect();

    format!(
        "<html><body>\n\
         <h2>arXiv {category} 每日摘要</h2>\n\
         {content}\
         <hr/><p style=\"color:#888\">Gemini 自动生成 · 请核对原文。</p></body></html>",
        category = category,
        content = if blocks.is_empty() {
            "<p>今日暂无新论文。</p>\n".to_string()
        } else {
            blocks
        },
    )
}

fn render_block(index: usize, digest: &PaperDigest, include_figures: bool) -> String {
    let p = &digest.paper;
    let mut block = format!(
        "<h3>{index}. {title}</h3>\n\
         <p><b>作者：</b>{authors}<br/>\n\
         <a href=\"{abs_url}\">摘要页</a> | <a href=\"{pdf_url}\">PDF</a></p>\n\
         <p style=\"white-space: pre-line;\">{summary}</p>\n",
        index = index,
        title = html_escape(&p.title),
        authors = html_escape(&p.authors.join(", ")),
        abs_url = p.abs_url,
        pdf_url = p.pdf_url,
        summary = html_escape(&digest.zh_summary),
    );

    if include_figures {
        if let Some(cid) = &digest.main_img_cid {
            block.push_str(&format!(
                "<p><img src=\"cid:{}\" style=\"max-width:720px;\"/></p>\n",
                cid
            ));
        }
    }

    block
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetcherConfig, MailConfig, SummarizerConfig};

    fn paper(id: &str, title: &str) -> PaperItem {
        PaperItem {
            arxiv_id: id.to_string(),
            title: title.to_string(),
            summary: "abs".to_string(),
            authors: vec!["Alice <Liu>".to_string()],
            pdf_url: format!("https://arxiv.org/pdf/{}", id),
            abs_url: format!("http://arxiv.org/abs/{}", id),
        }
    }

    fn digest(id: &str, title: &str, img: Option<Vec<u8>>) -> PaperDigest {
        PaperDigest::new(
            paper(id, title),
            "english".to_string(),
            "第一段\n第二段".to_string(),
            img,
        )
    }

    fn config(include_figures: bool, recipients: Vec<&str>) -> AppConfig {
        AppConfig {
            fetcher: FetcherConfig {
                category: "cs.CR".to_string(),
                lookback_hours: 168,
            },
            summarizer: SummarizerConfig {
                api_key: "k".to_string(),
                model: "gemini-2.5-flash".to_string(),
            },
            mail: MailConfig {
                smtp_host: "smtp.example.com".to_string(),
                smtp_port: 587,
                smtp_user: "bot@example.com".to_string(),
                smtp_pass: "secret".to_string(),
                recipients: recipients.into_iter().map(String::from).collect(),
                include_figures,
            },
        }
    }

    #[test]
    fn cid_present_iff_image_present() {
        let with_img = digest("2401.1v1", "T", Some(vec![1, 2, 3]));
        assert!(with_img.main_img_bytes.is_some());
        assert_eq!(with_img.main_img_cid.as_deref(), Some("img-2401.1v1"));

        let without = digest("2401.2v1", "T", None);
        assert!(without.main_img_bytes.is_none() && without.main_img_cid.is_none());

        // 空字节视同无图
        let empty = digest("2401.3v1", "T", Some(Vec::new()));
        assert!(empty.main_img_bytes.is_none() && empty.main_img_cid.is_none());
    }

    #[test]
    fn html_escapes_metadata() {
        let body = render_html_body("cs.CR", &[digest("1v1", "Tags <b> & more", None)], false);
        assert!(body.contains("Tags &lt;b&gt; &amp; more"));
        assert!(body.contains("Alice &lt;Liu&gt;"));
        assert!(!body.contains("Tags <b>"));
    }

    #[test]
    fn blocks_are_numbered_and_preserve_paragraphs() {
        let body = render_html_body(
            "cs.CR",
            &[digest("1v1", "First", None), digest("2v1", "Second", None)],
            false,
        );
        assert!(body.contains("<h3>1. First</h3>"));
        assert!(body.contains("<h3>2. Second</h3>"));
        assert!(body.contains("white-space: pre-line"));
        assert!(body.contains("第一段\n第二段"));
    }

    #[test]
    fn empty_digest_list_renders_placeholder() {
        let body = render_html_body("cs.CR", &[], false);
        assert!(body.contains("<p>今日暂无新论文。</p>"));
        assert!(!body.contains("<h3>"));
    }

    #[test]
    fn figures_inlined_only_when_enabled() {
        let digests = vec![digest("1v1", "T", Some(vec![9, 9]))];
        let off = render_html_body("cs.CR", &digests, false);
        assert!(!off.contains("cid:"));

        let on = render_html_body("cs.CR", &digests, true);
        assert!(on.contains("<img src=\"cid:img-1v1\""));
    }

    #[test]
    fn message_addresses_every_recipient() {
        let cfg = config(false, vec!["a@example.com", "b@example.com"]);
        let email = build_digest_email(&[], &cfg).unwrap();
        assert_eq!(email.message.envelope().to().len(), 2);
        assert!(email.html_body.contains("今日暂无新论文"));
    }
}
