//! Approval-gated deletion of indexed files.
//!
//! Nothing is deleted until a human approves the request through the
//! [`Notifier`]. Denial, timeout and a broken approval channel all count as
//! a decline: one notice is sent and the index is left untouched. After
//! approval every file id is deleted in turn; a failing id is logged and
//! the loop moves on.

use std::sync::Arc;
use std::time::Duration;

use crate::store::VectorIndex;
use crate::traits::Notifier;

pub const DECLINED_MESSAGE: &str = "Qdrant vector store deletion declined";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub file_id: String,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Declined,
    Completed(Vec<DeleteOutcome>),
}

impl DeletionOutcome {
    pub fn approved(&self) -> bool {
        matches!(self, DeletionOutcome::Completed(_))
    }
}

pub struct DeletionWorkflow {
    index: Arc<VectorIndex>,
    notifier: Arc<dyn Notifier>,
    approval_timeout: Duration,
}

impl DeletionWorkflow {
    pub fn new(index: Arc<VectorIndex>, notifier: Arc<dyn Notifier>, approval_timeout: Duration) -> Self {
        Self {
            index,
            notifier,
            approval_timeout,
        }
    }

    /// Ask for approval, then delete every id. Returns `true` iff approved.
    pub async fn delete(&self, file_ids: &[String]) -> bool {
        self.run(file_ids).await.approved()
    }

    pub async fn run(&self, file_ids: &[String]) -> DeletionOutcome {
        let records = self.record_count(file_ids).await;
        let prompt = approval_prompt(records, self.index.collection_name());

        let approved = match self
            .notifier
            .request_approval(&prompt, self.approval_timeout)
            .await
        {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!(error = %e, "approval request failed, treating as declined");
                false
            }
        };

        if !approved {
            tracing::info!(files = file_ids.len(), "deletion declined");
            if let Err(e) = self.notifier.notify(DECLINED_MESSAGE).await {
                tracing::warn!(error = %e, "failed to send decline notice");
            }
            return DeletionOutcome::Declined;
        }

        let mut outcomes = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            let result = match self.index.try_delete_by_file_id(file_id).await {
                Ok(()) => {
                    tracing::info!(file_id = %file_id, "deleted records");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(file_id = %file_id, error = %e, "delete failed");
                    Err(e.to_string())
                }
            };
            outcomes.push(DeleteOutcome {
                file_id: file_id.clone(),
                result,
            });
        }
        DeletionOutcome::Completed(outcomes)
    }

    /// Records that would be removed. Falls back to the number of ids when
    /// the index cannot count.
    async fn record_count(&self, file_ids: &[String]) -> usize {
        let mut total = 0;
        for file_id in file_ids {
            match self.index.count_for_file(file_id, None).await {
                Ok(n) => total += n,
                Err(e) => {
                    tracing::debug!(error = %e, "record count unavailable");
                    return file_ids.len();
                }
            }
        }
        total
    }
}

pub fn approval_prompt(records: usize, collection: &str) -> String {
    format!(
        "WARNING - {} Records in the Qdrant vector store collection \"{}\" will be deleted. \
         Are you sure you want to continue? This action cannot be undone!",
        records, collection
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_count_and_collection() {
        assert_eq!(
            approval_prompt(3, "profiles"),
            "WARNING - 3 Records in the Qdrant vector store collection \"profiles\" will be deleted. \
             Are you sure you want to continue? This action cannot be undone!"
        );
    }

    #[test]
    fn only_completed_counts_as_approved() {
        assert!(!DeletionOutcome::Declined.approved());
        assert!(DeletionOutcome::Completed(Vec::new()).approved());
    }
}
