//! Git repositories, described by the branch (or commit) their HEAD points at

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use wk_change_source::{resolve_git_dir, GitRepositorySource, SourceError};
use wk_reconcile::{
	EnrichError, Enricher, Entity, EntityKind, ReconciledCollection, Reconciler, ReconcilerConfig,
	SortOrder,
};
use wk_utils::{error::FileIOError, path_key};

pub type RepositoriesReconciler = Reconciler<GitRepositorySource, GitEnricher>;

const SHORT_HASH_LEN: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
	Branch(String),
	/// Abbreviated commit hash
	Detached(String),
}

impl Head {
	fn parse(contents: &str) -> Self {
		let contents = contents.trim();

		contents.strip_prefix("ref:").map_or_else(
			|| Self::Detached(contents.chars().take(SHORT_HASH_LEN).collect()),
			|reference| {
				let reference = reference.trim();
				Self::Branch(
					reference
						.strip_prefix("refs/heads/")
						.unwrap_or(reference)
						.to_string(),
				)
			},
		)
	}

	pub fn name(&self) -> &str {
		match self {
			Self::Branch(name) | Self::Detached(name) => name,
		}
	}

	pub const fn is_detached(&self) -> bool {
		matches!(self, Self::Detached(_))
	}
}

pub async fn read_head(git_dir: impl AsRef<Path>) -> Result<Head, FileIOError> {
	let path = git_dir.as_ref().join("HEAD");

	fs::read_to_string(&path)
		.await
		.map(|contents| Head::parse(&contents))
		.map_err(|e| FileIOError::from((&path, e, "reading HEAD")))
}

/// Reads the HEAD of a repository. Folders that stopped being repositories yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitEnricher;

#[async_trait]
impl Enricher<PathBuf> for GitEnricher {
	async fn enrich(&self, key: &str, repository: PathBuf) -> Result<Option<Entity>, EnrichError> {
		let git_dir = match resolve_git_dir(&repository).await {
			Ok(git_dir) => git_dir,
			Err(SourceError::InvalidRepository(_)) => return Ok(None),
			Err(SourceError::FileIO(e)) if e.is_not_found() => return Ok(None),
			Err(SourceError::FileIO(e)) => return Err(e.into()),
			Err(e) => return Err(EnrichError::Other(e.to_string())),
		};

		let head = match read_head(&git_dir).await {
			Ok(head) => head,
			Err(e) if e.is_not_found() => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		Ok(Some(
			Entity::new(key, EntityKind::Repository, repository).with_metadata(json!({
				"branch": head.name(),
				"detached": head.is_detached(),
				"git_dir": path_key(&git_dir),
			})),
		))
	}
}

pub fn head(entity: &Entity) -> Option<Head> {
	let name = entity.metadata_field("branch")?.as_str()?.to_string();

	Some(
		if entity
			.metadata_field("detached")
			.and_then(serde_json::Value::as_bool)
			.unwrap_or_default()
		{
			Head::Detached(name)
		} else {
			Head::Branch(name)
		},
	)
}

pub fn order() -> SortOrder {
	SortOrder::DisplayName
}

pub fn reconciler(
	collection: Arc<ReconciledCollection>,
	repositories: impl IntoIterator<Item = impl Into<PathBuf>>,
	config: ReconcilerConfig,
) -> RepositoriesReconciler {
	Reconciler::new(
		Arc::new(GitRepositorySource::new("repositories", repositories)),
		GitEnricher,
		collection,
		config.with_scope(EntityKind::Repository),
	)
}
