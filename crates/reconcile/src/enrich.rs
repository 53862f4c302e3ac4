use std::{future::Future, marker::PhantomData};

use async_trait::async_trait;
use thiserror::Error;
use wk_utils::error::FileIOError;

use crate::Entity;

#[derive(Debug, Error)]
pub enum EnrichError {
	/// The resource exists but we're not allowed to look at it
	#[error("access denied <key='{key}'>")]
	Inaccessible { key: String },
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("{0}")]
	Other(String),
}

impl EnrichError {
	pub fn inaccessible(key: impl Into<String>) -> Self {
		Self::Inaccessible { key: key.into() }
	}

	/// Whether the failure should mark the enumeration cycle as partial
	pub fn is_inaccessible(&self) -> bool {
		match self {
			Self::Inaccessible { .. } => true,
			Self::FileIO(e) => e.is_permission_denied(),
			Self::Other(_) => false,
		}
	}
}

/// Turns a raw `(key, payload)` pair into a canonical [`Entity`].
///
/// `Ok(None)` means the resource is no longer there to describe.
#[async_trait]
pub trait Enricher<P>: Send + Sync + 'static {
	async fn enrich(&self, key: &str, payload: P) -> Result<Option<Entity>, EnrichError>;
}

/// Closure-backed [`Enricher`], see [`enrich_with`]
pub struct FnEnricher<F, P> {
	enrich: F,
	_payload: PhantomData<fn(P)>,
}

pub fn enrich_with<P, F, Fut>(enrich: F) -> FnEnricher<F, P>
where
	F: Fn(String, P) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Option<Entity>, EnrichError>> + Send + 'static,
{
	FnEnricher {
		enrich,
		_payload: PhantomData,
	}
}

#[async_trait]
impl<P, F, Fut> Enricher<P> for FnEnricher<F, P>
where
	P: Send + 'static,
	F: Fn(String, P) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Option<Entity>, EnrichError>> + Send + 'static,
{
	async fn enrich(&self, key: &str, payload: P) -> Result<Option<Entity>, EnrichError> {
		(self.enrich)(key.to_owned(), payload).await
	}
}
