//! Git provider: shells out to the `git` binary to clone the referenced
//! repository at its declared revision and read a file from it, the same
//! way the teacher's worktree manager shells out to `git` rather than
//! linking `git2`.

use async_trait::async_trait;
use tokio::process::Command;

use corral_db::models::RepositoryKind;

use crate::render::schema::ProviderConfig;
use crate::render::{ProviderResolver, RenderContext, RenderedFile};

pub struct GitResolver;

#[async_trait]
impl ProviderResolver for GitResolver {
    fn discriminator(&self) -> &'static str {
        "Git"
    }

    async fn resolve(
        &self,
        ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>> {
        let ProviderConfig::Git(c) = config else {
            anyhow::bail!("GitResolver invoked with a non-Git config");
        };

        let repo = ctx
            .repositories
            .get(&c.repository)
            .ok_or_else(|| anyhow::anyhow!("git provider {:?}: repository {:?} not resolved", c.name, c.repository))?;
        if repo.kind != RepositoryKind::Git {
            anyhow::bail!("repository {:?} is not a git repository (kind {})", c.repository, repo.kind);
        }

        let worktree = tempfile::tempdir()?;
        let clone = Command::new("git")
            .args(["clone", "--quiet", "--depth", "1", "--branch", &c.target_revision])
            .arg(&repo.url)
            .arg(worktree.path())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run git clone for {:?}: {e}", c.repository))?;

        if !clone.status.success() {
            anyhow::bail!(
                "git clone of {:?} at {:?} failed: {}",
                c.repository,
                c.target_revision,
                String::from_utf8_lossy(&clone.stderr)
            );
        }

        let file_path = worktree.path().join(&c.repo_path);
        let content = tokio::fs::read(&file_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {:?} from cloned repo {:?}: {e}", c.repo_path, c.repository))?;

        Ok(vec![RenderedFile { path: c.path.clone(), content }])
    }
}
