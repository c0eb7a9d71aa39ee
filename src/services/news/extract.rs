//! Article text extraction. Prefer the source's known paragraph classes;
//! fall back to whole-page tag stripping when that yields too little body.

use std::sync::LazyLock;

use regex::Regex;

use crate::constants::MIN_ARTICLE_WORDS;

static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap());
static RE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap());
static RE_NOSCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript[^>]*>.*?</noscript>").unwrap());
static RE_BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<br\s*/?>").unwrap());
static RE_P_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)</p\s*>").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\t\r ]+").unwrap());
static RE_NL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s+").unwrap());
static RE_NL_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s+property="og:title"\s+content="([^"]+)""#).unwrap()
});
static RE_TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title>(.*?)</title>").unwrap());
static RE_PUBLISHED_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s+property="article:published_time"\s+content="([^"]+)""#).unwrap()
});

/// Paragraph classes the article pages use for body text, in render order.
const PREFERRED_CLASSES: &[&str] = &["pTitle", "pHead", "pBody"];

fn unescape_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strip tags, keeping paragraph breaks readable.
pub fn strip_tags(html: &str) -> String {
    let text = RE_SCRIPT.replace_all(html, " ");
    let text = RE_STYLE.replace_all(&text, " ");
    let text = RE_NOSCRIPT.replace_all(&text, " ");
    let text = RE_BR.replace_all(&text, "\n");
    let text = RE_P_CLOSE.replace_all(&text, "\n");
    let text = RE_TAG.replace_all(&text, " ");
    let text = unescape_entities(&text);
    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_NL_WS.replace_all(&text, "\n");
    let text = RE_NL_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Extract the main body: known paragraph classes first, whole page second.
pub fn extract_main_text(html: &str) -> String {
    let mut paras: Vec<String> = Vec::new();
    for class in PREFERRED_CLASSES {
        let re = Regex::new(&format!(
            r#"(?is)<p[^>]*class="{}"[^>]*>(.*?)</p>"#,
            class
        ))
        .expect("class regex compiles");
        for cap in re.captures_iter(html) {
            let text = strip_tags(&cap[1]);
            if !text.is_empty() {
                paras.push(text);
            }
        }
    }

    // drop consecutive duplicates (pages repeat the lede)
    paras.dedup();

    let joined = paras.join("\n\n");
    if word_count(&joined) >= MIN_ARTICLE_WORDS {
        return joined;
    }
    strip_tags(html)
}

pub fn extract_title(html: &str) -> Option<String> {
    if let Some(cap) = RE_OG_TITLE.captures(html) {
        let title = unescape_entities(cap[1].trim());
        if !title.is_empty() {
            return Some(title);
        }
    }
    RE_TITLE_TAG
        .captures(html)
        .map(|cap| unescape_entities(strip_tags(&cap[1]).as_str()))
        .filter(|t| !t.is_empty())
}

/// Published time from the article's own meta, when the page carries one.
pub fn extract_published(html: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = RE_PUBLISHED_META.captures(html)?;
    crate::utils::parse_timestamp(raw[1].trim()).ok()
}

/// Crude language tag: Vietnamese diacritics anywhere in the body.
pub fn detect_lang(text: &str) -> Option<String> {
    const VI_MARKERS: &str = "ăâđêôơưáàảãạấầẩẫậắằẳẵặéèẻẽẹếềểễệíìỉĩịóòỏõọốồổỗộớờởỡợúùủũụứừửữựýỳỷỹỵ";
    let lower = text.to_lowercase();
    if lower.chars().any(|c| VI_MARKERS.contains(c)) {
        Some("vi".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_keeps_paragraphs() {
        let html = "<div><p>Một</p><script>var x=1;</script><p>Hai<br>Ba</p></div>";
        let text = strip_tags(html);
        assert!(text.contains("Một"));
        assert!(text.contains("Hai\nBa") || text.contains("Hai\n Ba"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn preferred_classes_win_when_long_enough() {
        let body: String = (0..90)
            .map(|i| format!("từ{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let html = format!(
            r#"<html><p class="pHead">Mở đầu</p><p class="pBody">{}</p><div>chrome nav junk</div></html>"#,
            body
        );
        let text = extract_main_text(&html);
        assert!(text.starts_with("Mở đầu"));
        assert!(!text.contains("chrome nav junk"));
    }

    #[test]
    fn short_preferred_body_falls_back_to_full_page() {
        let html = r#"<html><p class="pBody">ngắn</p><div>phần còn lại của trang</div></html>"#;
        let text = extract_main_text(html);
        assert!(text.contains("phần còn lại"));
    }

    #[test]
    fn title_extraction_prefers_og() {
        let html = r#"<head><meta property="og:title" content="Tiêu đề A"/>
            <title>Tiêu đề B | Site</title></head>"#;
        assert_eq!(extract_title(html).unwrap(), "Tiêu đề A");
        let html = "<head><title>Chỉ title</title></head>";
        assert_eq!(extract_title(html).unwrap(), "Chỉ title");
        assert_eq!(extract_title("<p>no title</p>"), None);
    }

    #[test]
    fn published_meta_extraction() {
        let html = r#"<meta property="article:published_time" content="2026-02-16T08:30:00Z"/>"#;
        let dt = extract_published(html).unwrap();
        assert_eq!(dt.timestamp(), 1771230600);
        assert_eq!(extract_published("<p>none</p>"), None);
    }

    #[test]
    fn lang_detection() {
        assert_eq!(detect_lang("Cổ phiếu tăng mạnh").as_deref(), Some("vi"));
        assert_eq!(detect_lang("plain ascii text"), None);
    }

    #[test]
    fn word_count_splits_whitespace() {
        assert_eq!(word_count("  a  b\nc\t d "), 4);
        assert_eq!(word_count(""), 0);
    }
}
