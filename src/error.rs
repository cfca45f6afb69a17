use crate::profile::FieldLabel;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Handle already taken: {0}")]
    HandleTaken(String),

    #[error("Username change limit reached")]
    QuotaExceeded,

    #[error("Unable to assign a free handle, all candidates taken")]
    AllocationExhausted,

    #[error("Profile incomplete, missing: {}", join_labels(.0))]
    ProfileIncomplete(Vec<FieldLabel>),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

fn join_labels(labels: &[FieldLabel]) -> String {
    labels
        .iter()
        .map(|label| label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
