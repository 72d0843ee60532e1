//! Operator decision sources.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::error::{GateError, GateResult};

/// What the operator is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRequest {
    pub pipeline: String,
    pub ordinal: u64,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approved { by: String },
    Rejected { reason: String },
}

#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// Block until the operator decides. May wait indefinitely.
    async fn decide(&self, request: &ApprovalRequest) -> GateResult<Decision>;
}

/// Approves everything immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalSource for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> GateResult<Decision> {
        Ok(Decision::Approved {
            by: "auto-approve".to_string(),
        })
    }
}

/// Asks on the controlling terminal: `y`/`yes` approves, anything else
/// rejects, end of input rejects.
#[derive(Debug, Clone, Default)]
pub struct TerminalApproval {
    operator: Option<String>,
}

impl TerminalApproval {
    pub fn new(operator: Option<String>) -> Self {
        Self { operator }
    }
}

#[async_trait]
impl ApprovalSource for TerminalApproval {
    async fn decide(&self, request: &ApprovalRequest) -> GateResult<Decision> {
        let mut stderr = tokio::io::stderr();
        let prompt = format!(
            "\n{}\n  pipeline {} run #{} (branch {})\nDeploy to production? [y/N] ",
            request.message, request.pipeline, request.ordinal, request.branch
        );
        stderr.write_all(prompt.as_bytes()).await?;
        stderr.flush().await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let answer = lines.next_line().await?;
        Ok(parse_answer(answer.as_deref(), self.operator.as_deref()))
    }
}

fn parse_answer(answer: Option<&str>, operator: Option<&str>) -> Decision {
    match answer.map(|a| a.trim().to_ascii_lowercase()) {
        Some(a) if a == "y" || a == "yes" => Decision::Approved {
            by: operator.unwrap_or("terminal").to_string(),
        },
        Some(a) => Decision::Rejected {
            reason: if a.is_empty() {
                "declined".to_string()
            } else {
                format!("declined ({a})")
            },
        },
        None => Decision::Rejected {
            reason: "no operator input".to_string(),
        },
    }
}

/// A request waiting for an answer through [`Approver`].
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    reply: oneshot::Sender<Decision>,
}

impl PendingApproval {
    /// Returns false if the asking run is already gone.
    pub fn approve(self, by: &str) -> bool {
        self.reply
            .send(Decision::Approved { by: by.to_string() })
            .is_ok()
    }

    pub fn reject(self, reason: &str) -> bool {
        self.reply
            .send(Decision::Rejected {
                reason: reason.to_string(),
            })
            .is_ok()
    }
}

/// Approval driven from another task, for embedding and tests.
pub struct ChannelApproval {
    requests: mpsc::UnboundedSender<PendingApproval>,
}

/// The answering side of a [`ChannelApproval`].
pub struct Approver {
    requests: mpsc::UnboundedReceiver<PendingApproval>,
}

impl ChannelApproval {
    pub fn pair() -> (Self, Approver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { requests: tx }, Approver { requests: rx })
    }
}

impl Approver {
    /// Next request a run is blocked on; `None` once every asker is gone.
    pub async fn next(&mut self) -> Option<PendingApproval> {
        self.requests.recv().await
    }
}

#[async_trait]
impl ApprovalSource for ChannelApproval {
    async fn decide(&self, request: &ApprovalRequest) -> GateResult<Decision> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(PendingApproval {
                request: request.clone(),
                reply,
            })
            .map_err(|_| GateError::ApproverGone)?;
        answer.await.map_err(|_| GateError::ApproverGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            pipeline: "webapp-master".to_string(),
            ordinal: 7,
            branch: "master".to_string(),
            message: "Promote webapp-master?".to_string(),
        }
    }

    #[test]
    fn answers_parse() {
        assert_eq!(
            parse_answer(Some(" YES "), Some("alice")),
            Decision::Approved { by: "alice".to_string() }
        );
        assert!(matches!(parse_answer(Some("n"), None), Decision::Rejected { .. }));
        assert!(matches!(parse_answer(Some(""), None), Decision::Rejected { .. }));
        assert_eq!(
            parse_answer(None, None),
            Decision::Rejected { reason: "no operator input".to_string() }
        );
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let (source, mut approver) = ChannelApproval::pair();
        let answer = tokio::spawn(async move {
            let pending = approver.next().await.unwrap();
            assert_eq!(pending.request.ordinal, 7);
            pending.approve("bob")
        });

        let decision = source.decide(&request()).await.unwrap();
        assert_eq!(decision, Decision::Approved { by: "bob".to_string() });
        assert!(answer.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_approver_is_an_error() {
        let (source, approver) = ChannelApproval::pair();
        drop(approver);
        assert!(matches!(
            source.decide(&request()).await,
            Err(GateError::ApproverGone)
        ));
    }

    #[tokio::test]
    async fn auto_approve_approves() {
        assert!(matches!(
            AutoApprove.decide(&request()).await.unwrap(),
            Decision::Approved { .. }
        ));
    }
}
