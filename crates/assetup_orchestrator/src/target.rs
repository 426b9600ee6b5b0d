use std::sync::Arc;

use assetup_bridge::{FolderRepository, ProjectRepository};
use assetup_contract::{BatchTarget, PipelineError, ResolvedTarget};
use tracing::{info, warn};

/// Validates a destination before any transfer starts.
#[derive(Clone)]
pub struct TargetResolver {
    projects: Arc<dyn ProjectRepository>,
    folders: Arc<dyn FolderRepository>,
}

impl TargetResolver {
    pub fn new(projects: Arc<dyn ProjectRepository>, folders: Arc<dyn FolderRepository>) -> Self {
        Self { projects, folders }
    }

    /// The folder must belong to the project; a folder that exists under another
    /// project is reported as not found.
    pub async fn resolve(&self, target: &BatchTarget) -> Result<ResolvedTarget, PipelineError> {
        let project = self
            .projects
            .get_project(&target.project_id)
            .await
            .map_err(|err| PipelineError::Collaborator(err.to_string()))?
            .ok_or_else(|| {
                PipelineError::TargetNotFound(format!("project {}", target.project_id))
            })?;

        if target.is_root() {
            return Ok(ResolvedTarget {
                project_id: project.id,
                project_name: project.name,
                folder_id: target.folder_id.clone(),
                folder_name: None,
            });
        }

        let folder = self
            .folders
            .get_folder(&target.project_id, &target.folder_id)
            .await
            .map_err(|err| PipelineError::Collaborator(err.to_string()))?
            .ok_or_else(|| PipelineError::TargetNotFound(format!("folder {}", target.folder_id)))?;

        if folder.project_id != project.id {
            warn!(
                project_id = %project.id,
                folder_id = %folder.id,
                owner_project_id = %folder.project_id,
                "folder belongs to a different project"
            );
            return Err(PipelineError::TargetNotFound(format!(
                "folder {} in project {}",
                target.folder_id, target.project_id
            )));
        }

        info!(project_id = %project.id, folder_id = %folder.id, "upload target resolved");
        Ok(ResolvedTarget {
            project_id: project.id,
            project_name: project.name,
            folder_id: folder.id,
            folder_name: Some(folder.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TargetResolver;
    use assetup_bridge::InMemoryCatalog;
    use assetup_contract::{BatchTarget, PipelineError};

    fn resolver() -> TargetResolver {
        let catalog = Arc::new(
            InMemoryCatalog::new()
                .with_project("p1", "Launch Campaign")
                .with_project("p2", "Archive")
                .with_folder("f1", "p1", "Hero Shots")
                .with_folder("f2", "p2", "Old Renders"),
        );
        TargetResolver::new(catalog.clone(), catalog)
    }

    #[tokio::test]
    async fn root_is_accepted_for_existing_project() {
        let resolved = resolver()
            .resolve(&BatchTarget::root("p1"))
            .await
            .expect("resolve");
        assert_eq!(resolved.project_name, "Launch Campaign");
        assert_eq!(resolved.folder_id, "root");
        assert_eq!(resolved.folder_name, None);
    }

    #[tokio::test]
    async fn folder_of_same_project_resolves_with_names() {
        let resolved = resolver()
            .resolve(&BatchTarget::new("p1", "f1"))
            .await
            .expect("resolve");
        assert_eq!(resolved.display_name(), "Launch Campaign / Hero Shots");
    }

    #[tokio::test]
    async fn folder_from_another_project_is_not_found() {
        let err = resolver()
            .resolve(&BatchTarget::new("p1", "f2"))
            .await
            .expect_err("cross-project folder");
        assert!(matches!(err, PipelineError::TargetNotFound(_)));
    }

    #[tokio::test]
    async fn missing_project_or_folder_is_not_found() {
        let resolver = resolver();
        let missing_project = resolver
            .resolve(&BatchTarget::root("nope"))
            .await
            .expect_err("missing project");
        assert!(matches!(missing_project, PipelineError::TargetNotFound(_)));

        let missing_folder = resolver
            .resolve(&BatchTarget::new("p1", "ghost"))
            .await
            .expect_err("missing folder");
        assert!(matches!(missing_folder, PipelineError::TargetNotFound(_)));
    }
}
