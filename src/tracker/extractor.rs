//! Finding image URLs in article content.
//!
//! Extraction is a union over registered [`UrlPattern`]s. Every match is
//! normalized the same way before it enters the result set, so two patterns
//! matching the same URL collapse into one entry.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

const EXTENSION_TO_MIME: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

// Characters that end a URL inside HTML attributes, markdown and prose.
const URL_BODY: &str = r#"[^\s"'<>()\[\]\\]+"#;

static ABSOLUTE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("https?://{}", URL_BODY)).expect("valid URL regex"));

pub trait UrlPattern: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, text: &str) -> BTreeSet<String>;
}

/// A regex whose `group` capture is the URL.
pub struct RegexPattern {
    name: String,
    regex: Regex,
    group: usize,
}

impl RegexPattern {
    pub fn new(name: impl Into<String>, pattern: &str, group: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
            group,
        })
    }

    /// `<img ... src="...">` with an absolute URL.
    pub fn html_img_src() -> Self {
        Self::new(
            "html-img-src",
            r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["'](https?://[^"']+)["']"#,
            1,
        )
        .expect("valid img regex")
    }

    /// `![alt](url)`
    pub fn markdown_image() -> Self {
        Self::new("markdown-image", r"!\[[^\]]*\]\((https?://[^\s)]+)\)", 1)
            .expect("valid markdown regex")
    }

    /// Any URL under the given prefix, e.g. a storage bucket's public path.
    pub fn url_prefix(name: impl Into<String>, prefix: &str) -> Self {
        let pattern = format!("{}/{}", regex::escape(prefix.trim_end_matches('/')), URL_BODY);
        Self::new(name, &pattern, 0).expect("escaped prefix is a valid regex")
    }

    /// Any URL served by `host`, over http or https.
    pub fn cdn_host(host: &str) -> Self {
        let host = host
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let pattern = format!(r"https?://{}/{}", regex::escape(host), URL_BODY);
        Self::new(format!("cdn:{}", host), &pattern, 0).expect("escaped host is a valid regex")
    }
}

impl UrlPattern for RegexPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, text: &str) -> BTreeSet<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|cap| cap.get(self.group))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Absolute URLs whose path ends in a known image extension.
pub struct ImageExtensionPattern;

impl UrlPattern for ImageExtensionPattern {
    fn name(&self) -> &str {
        "image-extension"
    }

    fn matches(&self, text: &str) -> BTreeSet<String> {
        ABSOLUTE_URL_RE
            .find_iter(text)
            .map(|m| normalize_match(m.as_str()))
            .filter(|url| has_image_extension(url))
            .map(str::to_string)
            .collect()
    }
}

pub struct ImageUrlExtractor {
    patterns: Vec<Box<dyn UrlPattern>>,
}

impl ImageUrlExtractor {
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// `<img>` sources, markdown images and image-extension URLs.
    pub fn with_default_patterns() -> Self {
        Self::empty()
            .with_pattern(RegexPattern::html_img_src())
            .with_pattern(RegexPattern::markdown_image())
            .with_pattern(ImageExtensionPattern)
    }

    pub fn with_pattern(mut self, pattern: impl UrlPattern + 'static) -> Self {
        self.register(Box::new(pattern));
        self
    }

    pub fn register(&mut self, pattern: Box<dyn UrlPattern>) {
        tracing::debug!("Registered image URL pattern {}", pattern.name());
        self.patterns.push(pattern);
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        if !text.contains("http") {
            return BTreeSet::new();
        }

        self.patterns
            .iter()
            .flat_map(|pattern| pattern.matches(text))
            .map(|url| normalize_match(&url).to_string())
            .filter(|url| !url.is_empty())
            .collect()
    }
}

impl Default for ImageUrlExtractor {
    fn default() -> Self {
        Self::with_default_patterns()
    }
}

fn normalize_match(url: &str) -> &str {
    url.trim()
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn has_image_extension(url: &str) -> bool {
    extension(strip_query(url))
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Last path segment of `url`, query and fragment removed, percent-decoded.
pub fn file_name_from_url(url: &str) -> String {
    let path = strip_query(url);
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => path,
    };
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if segment.is_empty() {
        return "image".to_string();
    }
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

pub fn mime_type_for(file_name: &str) -> Option<&'static str> {
    let ext = extension(strip_query(file_name))?;
    EXTENSION_TO_MIME
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}
