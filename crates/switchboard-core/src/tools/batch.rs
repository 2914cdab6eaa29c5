//! Bulk operation tools.

use serde_json::{Value, json};

use switchboard_types::batch::{BatchJob, BatchJobId, BatchOptions, BatchParams, BatchStatus};
use switchboard_types::error::ToolError;
use switchboard_types::tool::{ParamKind, ParamSpec};

use super::{ToolServices, add, decode, limit, opt_bool, opt_int, opt_text, parsed, text};
use crate::batch::BatchRequest;
use crate::tool::ToolRegistry;

fn job_id(params: &Value) -> Result<BatchJobId, ToolError> {
    text(params, "job_id")?
        .parse()
        .map_err(|_| ToolError::invalid_param("job_id", "is not a valid id"))
}

fn job_json(job: &BatchJob) -> Value {
    let mut value = serde_json::to_value(job).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("succeeded".into(), json!(job.succeeded()));
        map.insert("failed".into(), json!(job.failed()));
        map.insert("progress".into(), json!(job.progress()));
    }
    value
}

pub(super) fn register(registry: &ToolRegistry, services: &ToolServices) -> Result<(), ToolError> {
    add(
        registry,
        services,
        "batch_operation",
        "Apply one operation to many targets with bounded concurrency",
        ParamSpec::new()
            .required(
                "operation",
                ParamKind::String,
                "delete_messages, forward_messages, pin_messages, unpin_messages, add_reaction or send_message",
            )
            .required(
                "targets",
                ParamKind::Array,
                "Message ids within chat_id, or chat ids for send_message",
            )
            .optional("chat_id", ParamKind::Integer, "Chat holding the target messages")
            .optional("to_chat_id", ParamKind::Integer, "Destination for forward_messages")
            .optional("text", ParamKind::String, "Text for send_message")
            .optional("emoji", ParamKind::String, "Emoji for add_reaction")
            .optional("concurrency_limit", ParamKind::Integer, "Operations in flight at once")
            .optional("inter_batch_delay_ms", ParamKind::Integer, "Pause between windows")
            .optional("wait", ParamKind::Boolean, "Return only once the job has finished"),
        |s, ctx, params| async move {
            let targets: Vec<i64> = decode(&params, "targets")?.unwrap_or_default();
            let options = match (
                opt_int(&params, "concurrency_limit"),
                opt_int(&params, "inter_batch_delay_ms"),
            ) {
                (None, None) => None,
                (concurrency, delay) => {
                    let defaults = BatchOptions::default();
                    Some(BatchOptions {
                        concurrency_limit: concurrency
                            .map(|c| c.max(1) as usize)
                            .unwrap_or(defaults.concurrency_limit),
                        inter_batch_delay_ms: delay
                            .map(|d| d.max(0) as u64)
                            .unwrap_or(defaults.inter_batch_delay_ms),
                    })
                }
            };
            let request = BatchRequest {
                operation: text(&params, "operation")?.to_string(),
                params: BatchParams {
                    chat_id: opt_int(&params, "chat_id"),
                    to_chat_id: opt_int(&params, "to_chat_id"),
                    text: opt_text(&params, "text").map(str::to_string),
                    emoji: opt_text(&params, "emoji").map(str::to_string),
                },
                targets,
                options,
                submitted_by: Some(ctx.caller),
            };

            let job = s.batch.submit(request).await?;
            let job = if opt_bool(&params, "wait").unwrap_or(false) {
                s.batch.wait(&job.id).await?
            } else {
                job
            };
            Ok(job_json(&job))
        },
    )?;

    add(
        registry,
        services,
        "get_batch_status",
        "Status of one batch job, or recent jobs and totals when no id is given",
        ParamSpec::new()
            .optional("job_id", ParamKind::String, "Batch job id")
            .optional("status", ParamKind::String, "Filter recent jobs by status")
            .optional("limit", ParamKind::Integer, "Maximum recent jobs to return"),
        |s, _ctx, params| async move {
            if params.get("job_id").is_some_and(|v| !v.is_null()) {
                let job = s.batch.get(&job_id(&params)?).await?;
                return Ok(job_json(&job));
            }
            let status: Option<BatchStatus> = parsed(&params, "status")?;
            let jobs = s.batch.list_jobs(status, limit(&params, 20, 200)).await?;
            Ok(json!({
                "statistics": s.batch.statistics(),
                "jobs": jobs.iter().map(job_json).collect::<Vec<_>>(),
            }))
        },
    )?;

    add(
        registry,
        services,
        "cancel_batch",
        "Stop a running batch job before its next window",
        ParamSpec::new().required("job_id", ParamKind::String, "Batch job id"),
        |s, _ctx, params| async move {
            let job = s.batch.cancel(&job_id(&params)?).await?;
            Ok(job_json(&job))
        },
    )?;

    add(
        registry,
        services,
        "pause_batch",
        "Hold a running batch job before its next window",
        ParamSpec::new().required("job_id", ParamKind::String, "Batch job id"),
        |s, _ctx, params| async move {
            let job = s.batch.pause(&job_id(&params)?).await?;
            Ok(job_json(&job))
        },
    )?;

    add(
        registry,
        services,
        "resume_batch",
        "Continue a paused batch job",
        ParamSpec::new().required("job_id", ParamKind::String, "Batch job id"),
        |s, _ctx, params| async move {
            let job = s.batch.resume(&job_id(&params)?).await?;
            Ok(job_json(&job))
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::tools::harness::harness;

    #[tokio::test]
    async fn delete_batch_reports_partial_failure() {
        let h = harness().await;
        let key = h.key("developer").await;
        h.fake.fail_for(2);

        let job = h
            .call(
                &key,
                "batch_operation",
                json!({
                    "operation": "delete_messages",
                    "chat_id": 100,
                    "targets": [1, 2, 3],
                    "wait": true,
                }),
            )
            .await
            .unwrap();
        assert_eq!(job["status"], "partially_failed");
        assert_eq!(job["succeeded"], 2);
        assert_eq!(job["failed"], 1);

        let id = job["id"].as_str().unwrap();
        let fetched = h
            .call(&key, "get_batch_status", json!({"job_id": id}))
            .await
            .unwrap();
        assert_eq!(fetched["results"].as_array().unwrap().len(), 3);

        let err = h
            .call(&key, "cancel_batch", json!({"job_id": id}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_TERMINAL");
    }

    #[tokio::test]
    async fn unknown_operation_produces_failed_job() {
        let h = harness().await;
        let key = h.key("admin").await;
        let job = h
            .call(
                &key,
                "batch_operation",
                json!({"operation": "explode", "targets": [1]}),
            )
            .await
            .unwrap();
        assert_eq!(job["status"], "failed");
        assert!(job["error"].is_string());

        let summary = h.call(&key, "get_batch_status", json!({})).await.unwrap();
        assert_eq!(summary["statistics"]["failed"], 1);
    }

    #[tokio::test]
    async fn pause_and_resume_by_tool() {
        let h = harness().await;
        let key = h.key("developer").await;
        h.fake.set_latency(std::time::Duration::from_millis(50));

        let job = h
            .call(
                &key,
                "batch_operation",
                json!({"operation": "pin_messages", "chat_id": 4, "targets": [1, 2, 3], "concurrency_limit": 1}),
            )
            .await
            .unwrap();
        let id = job["id"].as_str().unwrap().to_string();

        let paused = h
            .call(&key, "pause_batch", json!({"job_id": id}))
            .await
            .unwrap();
        assert_eq!(paused["status"], "paused");
        let err = h
            .call(&key, "resume_batch", json!({"job_id": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");

        let resumed = h
            .call(&key, "resume_batch", json!({"job_id": id}))
            .await
            .unwrap();
        assert_eq!(resumed["status"], "running");
        let err = h
            .call(&key, "resume_batch", json!({"job_id": id}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let reader = h.key("read_only").await;
        let err = h
            .call(&reader, "pause_batch", json!({"job_id": id}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn targets_must_be_integers() {
        let h = harness().await;
        let key = h.key("admin").await;
        let err = h
            .call(
                &key,
                "batch_operation",
                json!({"operation": "pin_messages", "chat_id": 1, "targets": ["a"]}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }
}
