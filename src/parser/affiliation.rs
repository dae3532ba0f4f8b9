use anyhow::Result;
use regex::Regex;
use tracing::debug;

/// 第一轮：带编号标记的行还需命中这些机构关键词
const MARKED_KEYWORDS: &[&str] = &[
    "university",
    "institute",
    "college",
    "lab",
    "centre",
    "center",
];
/// 第一轮落空后的宽松关键词
const FALLBACK_KEYWORDS: &[&str] = &["university", "institute", "college", "academy", "lab"];

pub struct AffiliationExtractor {
    marker: Regex,
    spaces: Regex,
}

impl AffiliationExtractor {
    pub fn new() -> Self {
        Self {
            // 行首编号标记，后面可跟 -/–/:/. 分隔符
            marker: Regex::new(r"^\d+\s*[-–:.]?\s*").expect("valid regex"),
            spaces: Regex::new(r"\s+").expect("valid regex"),
        }
    }

    /// 从 PDF 首页文本提取机构名，按首次出现顺序去重。
    pub fn extract(&self, pdf_bytes: &[u8]) -> Result<Vec<String>> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)?;
        let first_page = match pages.first() {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        let lines: Vec<&str> = first_page
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let affiliations = self.collect_affiliations(&lines);
        debug!("首页提取到 {} 条机构信息", affiliations.len());
        Ok(affiliations)
    }

    /// 两轮筛选：先收编号行 + 机构关键词；一条都没有时退回纯关键词匹配。
    fn collect_affiliations(&self, lines: &[&str]) -> Vec<String> {
        let mut picked: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|line| self.marker.is_match(line) && contains_keyword(line, MARKED_KEYWORDS))
            .collect();

        if picked.is_empty() {
            picked = lines
                .iter()
                .copied()
                .filter(|line| contains_keyword(line, FALLBACK_KEYWORDS))
                .collect();
        }

        let mut cleaned: Vec<String> = Vec::new();
        for line in picked {
            let aff = self.clean(line);
            if !aff.is_empty() && !cleaned.contains(&aff) {
                cleaned.push(aff);
            }
        }
        cleaned
    }

    /// 去掉行首编号标记，空白串压成单个空格。
    fn clean(&self, line: &str) -> String {
        let stripped = self.marker.replace(line, "");
        self.spaces.replace_all(stripped.trim(), " ").to_string()
    }
}

fn contains_keyword(line: &str, keywords: &[&str]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> AffiliationExtractor {
        AffiliationExtractor::new()
    }

    #[test]
    fn clean_strips_marker_and_collapses_spaces() {
        let e = extractor();
        assert_eq!(e.clean("1-  MIT   Lab"), "MIT Lab");
        assert_eq!(e.clean("2: Tsinghua University"), "Tsinghua University");
        assert_eq!(e.clean("3. Oxford  Internet  Institute"), "Oxford Internet Institute");
    }

    #[test]
    fn marked_lines_need_institution_keyword() {
        let e = extractor();
        let lines = vec![
            "1- MIT Media Lab",
            "2- 42 Wallaby Way",
            "Some running text about a university campus",
        ];
        assert_eq!(e.collect_affiliations(&lines), vec!["MIT Media Lab"]);
    }

    #[test]
    fn duplicates_collapse_to_first_seen() {
        let e = extractor();
        let lines = vec!["1- MIT  Lab", "2-  MIT Lab", "3- Stanford University"];
        assert_eq!(
            e.collect_affiliations(&lines),
            vec!["MIT Lab", "Stanford University"]
        );
    }

    #[test]
    fn fallback_pass_fires_only_without_marked_hits() {
        let e = extractor();
        // 没有编号行，退回宽松匹配，academy 也算
        let lines = vec!["Chinese Academy of Sciences", "Department of Things"];
        assert_eq!(
            e.collect_affiliations(&lines),
            vec!["Chinese Academy of Sciences"]
        );

        // 有编号行命中时，宽松匹配不参与
        let lines = vec!["1- MIT Lab", "Chinese Academy of Sciences"];
        assert_eq!(e.collect_affiliations(&lines), vec!["MIT Lab"]);
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let e = extractor();
        assert!(e.collect_affiliations(&[]).is_empty());
    }
}
