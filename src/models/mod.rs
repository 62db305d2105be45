mod article;
mod image;

pub use article::ArticleImageRefs;
#[cfg(test)]
pub use article::NewArticle;
pub use image::{ImageRecord, ImageState, ImageStats, NewImageRecord, UsageUpdate};
