use posts::NewPricePost;
use serde::Deserialize;

/// Accepted shapes of an import document: a bare array of posts, or the
/// same array under a `posts` key.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ImportFile {
    List(Vec<NewPricePost>),
    Wrapped { posts: Vec<NewPricePost> },
}

impl ImportFile {
    pub fn into_posts(self) -> Vec<NewPricePost> {
        match self {
            ImportFile::List(posts) | ImportFile::Wrapped { posts } => posts,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub read: usize,
    pub inserted: usize,
    pub rejected: usize,
}
