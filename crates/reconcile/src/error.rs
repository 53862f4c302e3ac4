use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reconciler is not watching <source='{0}'>")]
	NotWatching(String),
	#[error("reconciler stopped before the refresh completed <source='{0}'>")]
	Stopped(String),
}
