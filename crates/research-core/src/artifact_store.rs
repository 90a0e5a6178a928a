use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use research_types::{Artifact, Job, Money};
use serde_json::{json, Value};

/// Content-addressed report + metadata persistence (C3). Single-writer per
/// job (the Poller); readers only ever see a directory after its
/// `metadata.json` has been written, since that write happens last.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Deterministic directory name from (created_at, first 40 chars of a
    /// slugified prompt, last 8 chars of the id).
    pub fn directory_name(created_at: chrono::DateTime<Utc>, prompt: &str, id: &uuid::Uuid) -> String {
        let stamp = created_at.format("%Y-%m-%d_%H%M");
        let slug = slugify(prompt, 40);
        let short_id = &id.simple().to_string()[24..32];
        format!("{stamp}_{slug}_{short_id}")
    }

    pub async fn write(&self, job: &Job, artifact: &Artifact) -> Result<PathBuf> {
        let dir_name = Self::directory_name(job.created_at, &job.prompt, &job.id);
        let dir = self.reports_dir().join(&dir_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating report directory {}", dir.display()))?;

        let report_path = dir.join("report.md");
        tokio::fs::write(&report_path, &artifact.markdown_body)
            .await
            .with_context(|| format!("writing {}", report_path.display()))?;

        let metadata_path = dir.join("metadata.json");
        let size_bytes = artifact.markdown_body.len() as u64;
        let metadata = json!({
            "job_id": job.id,
            "created_at": artifact.created_at.to_rfc3339(),
            "filename": "report.md",
            "content_type": "text/markdown",
            "size_bytes": size_bytes,
            "prompt": job.prompt,
            "model": job.chosen_model,
            "provider": job.chosen_provider,
            "status": job.status,
            "provider_job_id": job.external_id,
            "cost": job.cost_actual.unwrap_or(Money::ZERO),
            "tokens_used": artifact.token_usage,
        });
        write_metadata_merged(&metadata_path, metadata).await?;

        Ok(dir)
    }

    /// Resolves a job's report directory, falling back to a legacy
    /// id-only directory name for backward compatibility.
    pub async fn resolve_dir(&self, job: &Job) -> Option<PathBuf> {
        let dir_name = Self::directory_name(job.created_at, &job.prompt, &job.id);
        let candidate = self.reports_dir().join(&dir_name);
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
        let legacy = self.reports_dir().join(job.id.to_string());
        if tokio::fs::metadata(&legacy).await.is_ok() {
            return Some(legacy);
        }
        None
    }

    pub async fn read_markdown(&self, job: &Job) -> Result<Option<String>> {
        match self.resolve_dir(job).await {
            Some(dir) => {
                let body = tokio::fs::read_to_string(dir.join("report.md")).await?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }
}

/// Merges new metadata onto whatever already exists on disk so unknown
/// fields placed there by a prior version of the engine round-trip intact.
async fn write_metadata_merged(path: &Path, new_fields: Value) -> Result<()> {
    let mut merged = match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({})),
        Err(_) => json!({}),
    };
    crate::config::deep_merge(&mut merged, &new_fields);
    let body = serde_json::to_string_pretty(&merged)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

/// Lowercase ascii-only slug, truncated to `max_len` characters.
fn slugify(input: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches('-');
    trimmed.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_types::{JobMode, ProviderChoice, TokenUsage};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-artifacts-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn write_then_resolve_round_trips_the_report() {
        let root = temp_root();
        let store = ArtifactStore::new(&root);
        let mut job = Job::new(
            "What is the capital of France?".to_string(),
            JobMode::Focus,
            ProviderChoice::Auto,
            1,
            vec![],
            None,
            None,
            HashMap::new(),
        );
        job.chosen_provider = Some("openai".to_string());
        job.chosen_model = Some("gpt-4o".to_string());

        let artifact = Artifact {
            job_id: job.id,
            markdown_body: "Paris.".to_string(),
            citations: vec![],
            token_usage: TokenUsage::default(),
            provider_raw: json!({}),
            created_at: Utc::now(),
        };

        store.write(&job, &artifact).await.unwrap();
        let read_back = store.read_markdown(&job).await.unwrap();
        assert_eq!(read_back, Some("Paris.".to_string()));

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[test]
    fn slugify_truncates_and_lowercases() {
        let slug = slugify("What Is The Capital Of France, Exactly??", 12);
        assert_eq!(slug, "what-is-the-");
    }
}
