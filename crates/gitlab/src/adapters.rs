use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};

use orchestration::{
    Alert, BranchName, CommentId, ErrorClass, ExternalError, ExternalProjectId, FailureReason,
    LaunchRequest, MergeRequestIid, NoteTarget, Notifier, PipelineId, RunnerLauncher,
    SourceControl, TaskLocation,
};

use crate::client::GitLabClient;

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    source_branch: String,
}

#[derive(Debug, Deserialize)]
struct Changes {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    new_path: Option<String>,
    #[serde(default)]
    old_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: u64,
}

#[async_trait]
impl SourceControl for GitLabClient {
    async fn find_open_merge_request(
        &self,
        project: ExternalProjectId,
        branch: &BranchName,
    ) -> Result<Option<MergeRequestIid>, ExternalError> {
        let request = self
            .get(&format!("projects/{project}/merge_requests"))
            .query(&[
                ("source_branch", branch.as_str()),
                ("state", "opened"),
                ("per_page", "1"),
            ]);
        let open: Vec<MergeRequest> = self.send_json(request, "find_open_merge_request").await?;
        Ok(open.first().map(|mr| MergeRequestIid::new(mr.iid)))
    }

    async fn cancel_pipeline(
        &self,
        project: ExternalProjectId,
        pipeline: PipelineId,
    ) -> Result<(), ExternalError> {
        self.send(
            self.post(&format!("projects/{project}/pipelines/{pipeline}/cancel")),
            "cancel_pipeline",
        )
        .await?;
        info!(%project, pipeline_id = %pipeline, "Pipeline cancelled");
        Ok(())
    }

    async fn changed_paths(
        &self,
        project: ExternalProjectId,
        mr: MergeRequestIid,
    ) -> Result<Vec<String>, ExternalError> {
        let changes: Changes = self
            .send_json(
                self.get(&format!("projects/{project}/merge_requests/{mr}/changes")),
                "changed_paths",
            )
            .await?;
        Ok(changes
            .changes
            .into_iter()
            .filter_map(|c| c.new_path.filter(|p| !p.is_empty()).or(c.old_path))
            .filter(|p| !p.is_empty())
            .collect())
    }

    async fn merge_request_source_branch(
        &self,
        project: ExternalProjectId,
        mr: MergeRequestIid,
    ) -> Result<BranchName, ExternalError> {
        let details: MergeRequest = self
            .send_json(
                self.get(&format!("projects/{project}/merge_requests/{mr}")),
                "merge_request_source_branch",
            )
            .await?;
        BranchName::new(details.source_branch).ok_or_else(|| {
            ExternalError::new(
                ErrorClass::Unknown,
                "merge_request_source_branch",
                "merge request has an empty source branch",
            )
        })
    }

    async fn post_note(&self, target: NoteTarget, body: &str) -> Result<CommentId, ExternalError> {
        let path = match target {
            NoteTarget::MergeRequest { project, iid } => {
                format!("projects/{project}/merge_requests/{iid}/notes")
            }
            NoteTarget::Issue { project, iid } => format!("projects/{project}/issues/{iid}/notes"),
        };
        let note: Created = self
            .send_json(
                self.post(&path).json(&serde_json::json!({ "body": body })),
                "post_note",
            )
            .await?;
        Ok(CommentId::new(note.id))
    }
}

#[async_trait]
impl RunnerLauncher for GitLabClient {
    async fn launch(&self, request: &LaunchRequest) -> Result<PipelineId, ExternalError> {
        let mut form = vec![
            ("token".to_string(), self.trigger_token.clone()),
            ("ref".to_string(), request.git_ref.as_str().to_string()),
        ];
        form.extend(
            request
                .variables()
                .into_iter()
                .map(|(key, value)| (format!("variables[{key}]"), value)),
        );

        let pipeline: Created = self
            .send_json(
                self.post(&format!("projects/{}/trigger/pipeline", request.project))
                    .form(&form),
                "trigger_pipeline",
            )
            .await?;
        info!(
            task_id = %request.task_id,
            pipeline_id = pipeline.id,
            git_ref = %request.git_ref,
            strategy = %request.strategy,
            "Pipeline triggered"
        );
        Ok(PipelineId::new(pipeline.id))
    }
}

#[async_trait]
impl Notifier for GitLabClient {
    async fn notify_failure(
        &self,
        location: &TaskLocation,
        reason: FailureReason,
        details: &str,
    ) -> Result<(), ExternalError> {
        let Some(target) = NoteTarget::for_location(location) else {
            debug!(%reason, "Task has no merge request or issue; no failure notice");
            return Ok(());
        };
        debug!(%reason, details, "Posting failure notice");
        self.post_note(target, &failure_notice(reason)).await?;
        Ok(())
    }

    async fn alert(&self, alert: &Alert) -> Result<(), ExternalError> {
        error!(
            severity = ?alert.severity,
            kind = alert.kind,
            message = %alert.message,
            "Operational alert"
        );
        Ok(())
    }
}

fn failure_notice(reason: FailureReason) -> String {
    format!("🤖 AI review failed: {}", reason.notice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notice_is_one_line() {
        let notice = failure_notice(FailureReason::Expired);
        assert!(!notice.contains('\n'));
        assert!(notice.ends_with(FailureReason::Expired.notice()));
    }
}
