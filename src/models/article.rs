use serde::{Deserialize, Serialize};

/// The article fields the tracker reads: everything that can reference an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleImageRefs {
    pub id: i64,
    pub content: String,
    pub featured_image_url: Option<String>,
}

/// Articles are written by the CMS; this is only needed to seed test databases.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub featured_image_url: Option<String>,
}
