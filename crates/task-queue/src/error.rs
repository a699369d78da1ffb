use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("queued task panicked <position='{0}'>")]
	TaskPanicked(u64),
	#[error("queued task was cancelled by a runtime shutdown <position='{0}'>")]
	TaskCancelled(u64),
}
