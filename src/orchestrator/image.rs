use tracing::{debug, info};

use super::Orchestrator;
use crate::error::Result;
use crate::logs::LogSink;
use crate::types::ContainerRegistry;

const LATEST: &str = "latest";

/// Split an image reference into repository and tag (or digest).
///
/// A `:` only separates a tag when it comes after the last `/`, so registry
/// ports survive: `registry:5000/app` has no tag and defaults to `latest`.
pub fn split_image_tag(image: &str) -> (&str, &str) {
    if let Some((repository, digest)) = image.split_once('@') {
        return (repository, digest);
    }
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(i) => {
            let colon = last_slash + i;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, LATEST),
    }
}

impl Orchestrator {
    /// Make `image` available locally, pulling when needed.
    ///
    /// Pinned tags are pulled only when no local repo-tag starts with
    /// `image`. Digest references are pulled only when no local repo-digest
    /// equals `image`. `latest` is always pulled.
    pub async fn ensure_image(
        &self,
        image: &str,
        registry: Option<&ContainerRegistry>,
        sink: &mut LogSink,
    ) -> Result<()> {
        let (repository, tag) = split_image_tag(image);

        let present = if image.contains('@') {
            let digests = self.engine.list_image_digests().await?;
            digests.iter().any(|d| d == image)
        } else if tag != LATEST {
            let tags = self.engine.list_image_tags().await?;
            tags.iter().any(|t| t.starts_with(image))
        } else {
            false
        };
        if present {
            debug!(image = %image, "image present");
            return Ok(());
        }

        sink.line(format!("Pulling image {}...", image))?;
        self.engine
            .pull_image(repository, tag, registry, sink)
            .await?;
        sink.line(format!("Image {} pulled successfully", image))?;
        info!(image = %image, registry = ?registry.map(|r| r.server.as_str()), "image ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_tag() {
        assert_eq!(split_image_tag("alpine:3.19"), ("alpine", "3.19"));
        assert_eq!(split_image_tag("alpine"), ("alpine", "latest"));
        assert_eq!(
            split_image_tag("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_tag("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app", "v2")
        );
        assert_eq!(
            split_image_tag("alpine@sha256:abcd"),
            ("alpine", "sha256:abcd")
        );
    }
}
