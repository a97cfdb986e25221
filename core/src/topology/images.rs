use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    pub repository: String,
    pub tag: String,
    pub id: String,
}

impl DockerImage {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// `docker images` invocation whose output [`parse_images`] understands.
pub fn list_images_command() -> Vec<String> {
    vec![
        "docker".to_string(),
        "images".to_string(),
        "--format".to_string(),
        "'{{.Repository}}\\t{{.Tag}}\\t{{.ID}}'".to_string(),
    ]
}

/// Parses tab separated `repository tag id` lines. Dangling images
/// (`<none>` tags) and malformed lines are skipped.
pub fn parse_images<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<DockerImage> {
    lines
        .into_iter()
        .filter_map(|line| {
            let mut cols = line.trim().split('\t').map(str::trim);
            let repository = cols.next().filter(|s| !s.is_empty())?;
            let tag = cols.next().filter(|s| !s.is_empty())?;
            let id = cols.next().filter(|s| !s.is_empty())?;
            if tag == "<none>" || repository == "<none>" {
                return None;
            }
            Some(DockerImage {
                repository: repository.to_string(),
                tag: tag.to_string(),
                id: id.to_string(),
            })
        })
        .collect()
}
