use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 一条 arXiv 列表条目，抓取后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperItem {
    pub arxiv_id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub pdf_url: String,
    pub abs_url: String,
}

pub struct ArxivCrawler {
    client: Client,
    base_url: String,
    page_size: usize,
    max_results: usize,
    page_delay: Duration,
    max_retries: u32,
}

impl ArxivCrawler {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("arxivbot/0.1 (daily digest; mailto:user@example.com)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: "https://export.arxiv.org/api/query".to_string(),
            page_size: 100,
            max_results: 200,
            page_delay: Duration::from_secs(2),
            max_retries: 3,
        }
    }

    /// 按提交时间倒序分页抓取指定分类，过滤回看窗口之外的条目，
    /// 按 UTC 日期分组后只返回最新一天的论文（保持 API 返回顺序）。
    pub async fn fetch_latest_day(
        &self,
        category: &str,
        lookback_hours: i64,
    ) -> Result<Vec<PaperItem>> {
        let cutoff = Utc::now() - chrono::Duration::hours(lookback_hours);
        let mut entries: Vec<(PaperItem, DateTime<Utc>)> = Vec::new();

        let mut start = 0usize;
        while start < self.max_results {
            let page_size = self.page_size.min(self.max_results - start);
            let url = format!(
                "{}?search_query=cat:{}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
                self.base_url, category, start, page_size
            );

            // arXiv 要求请求间隔，每页请求前固定等待
            tokio::time::sleep(self.page_delay).await;

            info!("正在请求 arXiv 列表: start={}, page_size={}", start, page_size);
            let xml = self.fetch_page(&url).await?;
            let page = parse_entries(&xml);

            if page.is_empty() {
                // 提前出现的空页视为结果取完，不算错误
                info!("结果已取完或无更多条目，停止翻页");
                break;
            }

            let page_len = page.len();
            entries.extend(page);

            if page_len < page_size {
                break;
            }
            start += page_len;
        }

        let papers = select_latest_day(entries, cutoff);
        info!("最新一天共 {} 篇论文", papers.len());
        Ok(papers)
    }

    /// 单页请求，仅对限流/服务不可用做有限重试。
    async fn fetch_page(&self, url: &str) -> Result<String> {
        for attempt in 1..=self.max_retries {
            let response = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("请求失败 (第 {}/{} 次): {}", attempt, self.max_retries, e);
                    if attempt == self.max_retries {
                        return Err(e.into());
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await?;

            // 429/502/503 或响应体含 "Rate exceeded" 都视为限流/服务不可用
            if status.as_u16() == 429
                || status.as_u16() == 502
                || status.as_u16() == 503
                || text.contains("Rate exceeded")
            {
                warn!("arXiv 返回 {} (第 {}/{} 次尝试)", status, attempt, self.max_retries);
                if attempt < self.max_retries {
                    let backoff = Duration::from_secs(10 * attempt as u64);
                    info!("等待 {}s 后重试...", backoff.as_secs());
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            if !status.is_success() {
                anyhow::bail!("arXiv API 错误: {}", status);
            }
            return Ok(text);
        }

        anyhow::bail!("arXiv API 请求在 {} 次重试后仍然失败", self.max_retries)
    }

    /// 下载 PDF 并校验文件头。
    pub async fn download_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("下载失败: {}", response.status());
        }
        let bytes = response.bytes().await?.to_vec();
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            anyhow::bail!("响应不是有效的PDF文件");
        }
        Ok(bytes)
    }
}

fn parse_entries(xml: &str) -> Vec<(PaperItem, DateTime<Utc>)> {
    if !xml.contains("<entry>") {
        return Vec::new();
    }

    xml.split("<entry>")
        .skip(1)
        .filter_map(parse_entry)
        .collect()
}

/// 解析单个 <entry> 块，返回条目与其有效时间（updated，缺失时回退 published）。
fn parse_entry(entry_text: &str) -> Option<(PaperItem, DateTime<Utc>)> {
    let abs_url = extract_tag(entry_text, "id")?.trim().to_string();
    let title = clean_text(&unescape_xml(&extract_tag(entry_text, "title")?));
    let summary = clean_text(&unescape_xml(&extract_tag(entry_text, "summary")?));

    let published = extract_tag(entry_text, "published")?;
    let updated = extract_tag(entry_text, "updated");
    let effective_raw = updated.unwrap_or_else(|| published.clone());
    let effective = DateTime::parse_from_rfc3339(effective_raw.trim())
        .ok()?
        .with_timezone(&Utc);

    let mut authors = Vec::new();
    for author_block in entry_text.split("<author>").skip(1) {
        if let Some(name) = extract_tag(author_block, "name") {
            authors.push(unescape_xml(name.trim()));
        }
    }

    let arxiv_id = abs_url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let pdf_url = abs_url
        .replace("/abs/", "/pdf/")
        .replace("http://", "https://");

    Some((
        PaperItem {
            arxiv_id,
            title,
            summary,
            authors,
            pdf_url,
            abs_url,
        },
        effective,
    ))
}

fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = text.find(&start_tag)? + start_tag.len();
    let end = text[start..].find(&end_tag)? + start;

    Some(text[start..end].to_string())
}

/// Atom 文本字段里的实体还原，&amp; 必须最后替换。
fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// 去掉换行并把空白串压成单个空格。
fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 过滤回看窗口之外的条目，按 UTC 日期分组，只保留最新一天，组内保持输入顺序。
fn select_latest_day(
    entries: Vec<(PaperItem, DateTime<Utc>)>,
    cutoff: DateTime<Utc>,
) -> Vec<PaperItem> {
    let mut by_day: BTreeMap<NaiveDate, Vec<PaperItem>> = BTreeMap::new();
    for (item, effective) in entries {
        if effective < cutoff {
            continue;
        }
        by_day.entry(effective.date_naive()).or_default().push(item);
    }

    by_day
        .into_iter()
        .next_back()
        .map(|(day, papers)| {
            info!("最新日期: {}", day);
            papers
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_ENTRY: &str = r#"
    <id>http://arxiv.org/abs/2401.12345v1</id>
    <updated>2024-01-06T10:30:00Z</updated>
    <published>2024-01-05T18:00:00Z</published>
    <title>Attention &amp; Memory:
  A   Survey</title>
    <summary>We study attention.
Results are strong.</summary>
    <author><name>Alice Liu</name></author>
    <author><name>Bob O&#39;Neil</name></author>
  </entry>"#;

    fn item(id: &str) -> PaperItem {
        PaperItem {
            arxiv_id: id.to_string(),
            title: String::new(),
            summary: String::new(),
            authors: Vec::new(),
            pdf_url: String::new(),
            abs_url: String::new(),
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parse_entry_basic_fields() {
        let (paper, effective) = parse_entry(SAMPLE_ENTRY).unwrap();
        assert_eq!(paper.arxiv_id, "2401.12345v1");
        assert_eq!(paper.title, "Attention & Memory: A Survey");
        assert_eq!(paper.summary, "We study attention. Results are strong.");
        assert_eq!(paper.authors, vec!["Alice Liu", "Bob O'Neil"]);
        assert_eq!(paper.abs_url, "http://arxiv.org/abs/2401.12345v1");
        assert_eq!(paper.pdf_url, "https://arxiv.org/pdf/2401.12345v1");
        // updated 优先于 published
        assert_eq!(effective, ts("2024-01-06T10:30:00Z"));
    }

    #[test]
    fn parse_entry_falls_back_to_published() {
        let entry = SAMPLE_ENTRY.replace("<updated>2024-01-06T10:30:00Z</updated>", "");
        let (_, effective) = parse_entry(&entry).unwrap();
        assert_eq!(effective, ts("2024-01-05T18:00:00Z"));
    }

    #[test]
    fn parse_entries_empty_page() {
        assert!(parse_entries("<feed><title>no results</title></feed>").is_empty());
    }

    #[test]
    fn unescape_handles_amp_last() {
        assert_eq!(unescape_xml("A &amp; B &lt;C&gt;"), "A & B <C>");
        assert_eq!(unescape_xml("&amp;lt;"), "&lt;");
    }

    #[test]
    fn select_latest_day_keeps_only_max_day_in_order() {
        let entries = vec![
            (item("a"), ts("2024-01-06T10:00:00Z")),
            (item("b"), ts("2024-01-06T09:00:00Z")),
            (item("c"), ts("2024-01-05T23:00:00Z")),
        ];
        let cutoff = ts("2024-01-01T00:00:00Z");
        let papers = select_latest_day(entries, cutoff);
        let ids: Vec<_> = papers.iter().map(|p| p.arxiv_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn select_latest_day_applies_cutoff_before_grouping() {
        // 回看 168h：今天、昨天在窗口内，10 天前被过滤；分组后只剩今天
        let now = Utc.with_ymd_and_hms(2024, 1, 11, 12, 0, 0).unwrap();
        let cutoff = now - chrono::Duration::hours(168);
        let entries = vec![
            (item("today"), now),
            (item("yesterday"), now - chrono::Duration::days(1)),
            (item("stale"), now - chrono::Duration::days(10)),
        ];
        let papers = select_latest_day(entries, cutoff);
        let ids: Vec<_> = papers.iter().map(|p| p.arxiv_id.as_str()).collect();
        assert_eq!(ids, vec!["today"]);
    }

    #[test]
    fn select_latest_day_empty_when_all_stale() {
        let cutoff = ts("2024-01-10T00:00:00Z");
        let entries = vec![(item("old"), ts("2024-01-01T00:00:00Z"))];
        assert!(select_latest_day(entries, cutoff).is_empty());
    }
}
