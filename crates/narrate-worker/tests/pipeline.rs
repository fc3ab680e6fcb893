//! End-to-end pipeline tests with fake speech and rendering.

mod common;

use std::collections::HashSet;

use common::Harness;
use narrate_models::{
    AudioStatus, ClipStatus, EntryStatus, JobKind, JobStatus, PipelineEventKind, ProjectStatus,
};
use narrate_queue::QueueError;
use narrate_store::StoreError;
use narrate_worker::{grouping, WorkerError};

const PARAGRAPHS: [&str; 3] = ["First paragraph.", "Second paragraph.", "Third paragraph."];

fn job_of(jobs: &[narrate_models::Job], kind: JobKind) -> Vec<&narrate_models::Job> {
    jobs.iter().filter(|j| j.kind == kind).collect()
}

#[tokio::test]
async fn test_full_pipeline_produces_grouped_videos() {
    let h = Harness::new();
    let project = h.project("Long Story", &PARAGRAPHS).await;
    assert_eq!(h.service.project_chunks(project.id).unwrap().len(), 3);

    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let project = h.service.get_project(project.id).unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);

    // 5s chunks against a 10s target: [[0, 1], [2]]
    let entries = h.service.queue_entries(project.id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].clip_ids.len(), 2);
    assert_eq!(entries[1].clip_ids.len(), 1);
    assert!(entries.iter().all(|e| e.status == EntryStatus::Completed));
    assert_eq!(entries[0].total_duration, 10.0);

    let outputs = h.service.output_videos(project.id).unwrap();
    assert_eq!(outputs.len(), 2);
    for output in &outputs {
        assert!(output.path.exists());
    }
    assert!(outputs[0].path.ends_with("Long Story_1.mp4"));

    // Intermediate clips are merged, deleted and gone from disk
    let clips = h.ctx.clips.list(project.id).unwrap();
    assert_eq!(clips.len(), 3);
    for clip in &clips {
        assert_eq!(clip.status, ClipStatus::Deleted);
        assert!(!clip.clip_path.exists());
    }

    let jobs = h.service.project_jobs(project.id).unwrap();
    for kind in [JobKind::TextImport, JobKind::AudioSynthesis, JobKind::VideoGeneration] {
        let of_kind = job_of(&jobs, kind);
        assert_eq!(of_kind.len(), 1, "{}", kind);
        assert_eq!(of_kind[0].status, JobStatus::Completed);
        assert_eq!(of_kind[0].progress, 100.0);
    }

    let progress = h.service.project_progress(project.id).unwrap();
    assert_eq!(progress.audio_progress, 100.0);
    assert_eq!(progress.video_progress, 100.0);
    assert!(h.service.running_projects().is_empty());
}

#[tokio::test]
async fn test_zero_chunk_audio_job_completes() {
    let h = Harness::new();
    let project = h.project("Empty", &["   "]).await;
    assert!(h.service.project_chunks(project.id).unwrap().is_empty());

    let job = h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let job = h.ctx.jobs.require(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);

    let project = h.service.get_project(project.id).unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Pending);
    let jobs = h.service.project_jobs(project.id).unwrap();
    assert!(job_of(&jobs, JobKind::VideoGeneration).is_empty());
    assert_eq!(h.speech.calls(), 0);
}

#[tokio::test]
async fn test_failed_chunk_fails_job_and_retrigger_resumes() {
    let h = Harness::new();
    let project = h.project("Flaky", &PARAGRAPHS).await;
    h.speech.fail_on(Some("Second"));

    let job = h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let job = h.ctx.jobs.require(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("1 of 3 chunks failed"));
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Failed
    );
    // Two good chunks once each, the bad one for every attempt
    assert_eq!(h.speech.calls(), 2 + 3);

    let chunks = h.service.project_chunks(project.id).unwrap();
    let statuses: Vec<AudioStatus> = chunks.iter().map(|c| c.audio_status).collect();
    assert_eq!(
        statuses,
        vec![AudioStatus::Completed, AudioStatus::Failed, AudioStatus::Completed]
    );

    // Re-trigger: only the failed chunk is synthesized again
    h.speech.fail_on(None);
    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    assert_eq!(h.speech.calls(), 2 + 3 + 1);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
}

#[tokio::test]
async fn test_video_job_requires_complete_audio() {
    let h = Harness::new();
    let project = h.project("Not Ready", &PARAGRAPHS).await;

    let job = h.service.submit_video_job(project.id).await.unwrap();
    h.run_jobs().await;

    let job = h.ctx.jobs.require(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .contains("audio synthesis progress 0.0% < 100%"));
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Failed
    );
    assert!(h.renderer.renders().is_empty());
}

#[tokio::test]
async fn test_video_rerun_regenerates_only_missing_clip() {
    let h = Harness::new();
    let project = h.project("Resume", &PARAGRAPHS).await;

    // Audio already synthesized and planned, clips rendered by an earlier run
    let audio_dir = h.ctx.config.audio_dir(project.id);
    tokio::fs::create_dir_all(&audio_dir).await.unwrap();
    for chunk in h.service.project_chunks(project.id).unwrap() {
        let audio = audio_dir.join(format!("segment_{}.mp3", chunk.id));
        tokio::fs::write(&audio, b"audio").await.unwrap();
        h.ctx.chunks.mark_completed(chunk.id, &audio, Some(5.0)).unwrap();
    }
    grouping::materialize(&h.ctx, &project).await.unwrap();

    let clips = h.ctx.clips.list(project.id).unwrap();
    let missing = clips[1].clip_path.clone();
    for clip in &clips {
        if clip.clip_path != missing {
            tokio::fs::create_dir_all(clip.clip_path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&clip.clip_path, b"clip").await.unwrap();
            h.ctx.clips.mark_synthesized(clip.id).unwrap();
        }
    }

    h.service.submit_video_job(project.id).await.unwrap();
    h.run_jobs().await;

    assert_eq!(h.renderer.renders(), vec![missing]);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
    assert_eq!(h.service.output_videos(project.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_planning_is_idempotent_and_exhaustive() {
    let h = Harness::new();
    let project = h.project("Plan", &PARAGRAPHS).await;
    for chunk in h.service.project_chunks(project.id).unwrap() {
        let audio = h.dir.path().join(format!("a{}.mp3", chunk.id));
        // Duration unknown: planning probes and caches it
        h.ctx.chunks.mark_completed(chunk.id, &audio, None).unwrap();
    }

    let first = grouping::materialize(&h.ctx, &project).await.unwrap();
    let second = grouping::materialize(&h.ctx, &project).await.unwrap();

    let ids = |entries: &[narrate_models::SynthesisQueueEntry]| {
        entries.iter().map(|e| (e.id, e.clip_ids.clone())).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(h.ctx.entries.count(project.id).unwrap(), 2);

    let planned: Vec<_> = first.iter().flat_map(|e| e.clip_ids.iter().copied()).collect();
    let unique: HashSet<_> = planned.iter().copied().collect();
    let all: HashSet<_> = h.ctx.clips.list(project.id).unwrap().iter().map(|c| c.id).collect();
    assert_eq!(planned.len(), unique.len());
    assert_eq!(unique, all);

    for chunk in h.service.project_chunks(project.id).unwrap() {
        assert_eq!(chunk.audio_duration, Some(5.0));
    }
}

#[tokio::test]
async fn test_busy_project_defers_second_stage() {
    let h = Harness::new();
    let project = h.project("Queued Video", &PARAGRAPHS).await;

    // Video job queued behind audio for the same project
    h.service.submit_audio_job(project.id).await.unwrap();
    let video = h.service.submit_video_job(project.id).await.unwrap();
    h.run_jobs().await;

    let jobs = h.service.project_jobs(project.id).unwrap();
    let videos = job_of(&jobs, JobKind::VideoGeneration);
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].id, video.id);
    assert_eq!(videos[0].status, JobStatus::Completed);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
}

#[tokio::test]
async fn test_duplicate_submission_rejected() {
    let h = Harness::new();
    let project = h.project("Twice", &PARAGRAPHS).await;

    h.service.submit_audio_job(project.id).await.unwrap();
    let err = h.service.submit_audio_job(project.id).await.unwrap_err();
    assert!(err.is_duplicate());

    let jobs = h.service.project_jobs(project.id).unwrap();
    assert_eq!(job_of(&jobs, JobKind::AudioSynthesis).len(), 1);
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let h = Harness::new();
    let project = h.project("Cancelled", &PARAGRAPHS).await;

    let job = h.service.submit_audio_job(project.id).await.unwrap();
    assert!(h.service.cancel_job(job.id).await.unwrap());
    assert!(!h.service.cancel_job(job.id).await.unwrap());
    h.run_jobs().await;

    assert_eq!(h.ctx.jobs.require(job.id).unwrap().status, JobStatus::Cancelled);
    assert_eq!(h.speech.calls(), 0);
}

#[tokio::test]
async fn test_delete_project_cascades() {
    let h = Harness::new();
    let project = h.project("Doomed", &PARAGRAPHS).await;
    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;
    assert!(project.output_dir.exists());
    assert!(h.ctx.config.audio_dir(project.id).exists());

    h.service.delete_project(project.id).await.unwrap();

    assert!(h.service.get_project(project.id).unwrap().is_none());
    assert!(h.service.project_jobs(project.id).unwrap().is_empty());
    assert!(h.service.project_chunks(project.id).unwrap().is_empty());
    assert!(h.ctx.clips.list(project.id).unwrap().is_empty());
    assert!(h.service.queue_entries(project.id).unwrap().is_empty());
    assert!(h.service.output_videos(project.id).unwrap().is_empty());
    assert!(!project.output_dir.exists());
    assert!(!h.ctx.config.audio_dir(project.id).exists());
    assert!(!h.ctx.config.image_dir(project.id).exists());
}

#[tokio::test]
async fn test_resegment_resets_project() {
    let h = Harness::new();
    let project = h.project("Again", &PARAGRAPHS).await;
    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let count = h.service.resegment(project.id, None).await.unwrap();
    assert_eq!(count, 3);

    let chunks = h.service.project_chunks(project.id).unwrap();
    assert!(chunks.iter().all(|c| c.audio_status == AudioStatus::Pending));
    assert_eq!(chunks[1].content, "Second paragraph.");
    assert!(h.service.queue_entries(project.id).unwrap().is_empty());
    assert!(h.service.output_videos(project.id).unwrap().is_empty());
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Pending
    );
}

#[tokio::test]
async fn test_resegment_with_new_limit() {
    let h = Harness::new();
    let project = h.project("Wider", &PARAGRAPHS).await;

    assert!(h.service.resegment(project.id, Some(2)).await.is_err());
    assert_eq!(h.service.project_chunks(project.id).unwrap().len(), 3);

    let count = h.service.resegment(project.id, Some(48)).await.unwrap();
    assert_eq!(count, 2);
    let chunks = h.service.project_chunks(project.id).unwrap();
    assert_eq!(chunks[0].content, "First paragraph.\n\nSecond paragraph.");
    assert_eq!(chunks[1].content, "Third paragraph.");
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().config.max_chunk_bytes,
        48
    );
}

#[tokio::test]
async fn test_create_project_validation() {
    let h = Harness::with_config(|c| c.max_project_text_size = 10);
    h.service
        .create_project("Taken", None, "short", Harness::small_chunks())
        .await
        .unwrap();

    let duplicate = h
        .service
        .create_project("Taken", None, "short", Harness::small_chunks())
        .await
        .unwrap_err();
    assert!(matches!(duplicate, WorkerError::Store(StoreError::AlreadyExists(_))));

    let too_long = h
        .service
        .create_project("Big", None, "far too long a text", Harness::small_chunks())
        .await
        .unwrap_err();
    assert!(matches!(too_long, WorkerError::InvalidInput(_)));

    let unnamed = h
        .service
        .create_project("  ", None, "short", Harness::small_chunks())
        .await
        .unwrap_err();
    assert!(matches!(unnamed, WorkerError::InvalidInput(_)));
}

#[tokio::test]
async fn test_progress_events_are_published() {
    let h = Harness::new();
    let project = h.project("Watched", &PARAGRAPHS).await;
    let mut events = h.service.subscribe();

    let job = h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let mut saw_progress = false;
    let mut saw_done = false;
    while let Ok(event) = events.try_recv() {
        if event.job_id != job.id {
            continue;
        }
        match event.kind {
            PipelineEventKind::Progress { .. } => saw_progress = true,
            PipelineEventKind::Done => saw_done = true,
            _ => {}
        }
    }
    assert!(saw_progress);
    assert!(saw_done);
}

#[tokio::test]
async fn test_failed_merge_leaves_entry_open() {
    let h = Harness::new();
    let project = h.project("Bad Merge", &PARAGRAPHS).await;
    h.renderer.fail_next_concats(1);

    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    // The first merge fails; the second entry still renders
    let entries = h.service.queue_entries(project.id).unwrap();
    let statuses: Vec<EntryStatus> = entries.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![EntryStatus::Pending, EntryStatus::Completed]);
    assert!(!entries[0].output_path.exists());
    assert!(entries[1].output_path.exists());

    let jobs = h.service.project_jobs(project.id).unwrap();
    let video = job_of(&jobs, JobKind::VideoGeneration)[0].clone();
    assert_eq!(video.status, JobStatus::Failed);
    assert_eq!(video.progress, 50.0);
    assert!(video.error_message.unwrap().contains("1 of 2 entries failed"));
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Failed
    );

    // Rendered clips of the open entry are kept for the next attempt
    for clip_id in &entries[0].clip_ids {
        let clip = h.ctx.clips.require(*clip_id).unwrap();
        assert_eq!(clip.status, ClipStatus::Synthesized);
        assert!(clip.clip_path.exists());
    }
    assert_eq!(h.renderer.renders().len(), 3);

    h.service.submit_video_job(project.id).await.unwrap();
    h.run_jobs().await;

    assert_eq!(h.renderer.renders().len(), 3);
    assert_eq!(h.renderer.concats.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
    assert_eq!(h.service.output_videos(project.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_audio_aborts_video_job() {
    let h = Harness::new();
    let project = h.project("Lost Audio", &PARAGRAPHS).await;

    let audio_dir = h.ctx.config.audio_dir(project.id);
    tokio::fs::create_dir_all(&audio_dir).await.unwrap();
    let chunks = h.service.project_chunks(project.id).unwrap();
    for (i, chunk) in chunks.iter().enumerate() {
        let audio = audio_dir.join(format!("segment_{}.mp3", chunk.id));
        if i > 0 {
            tokio::fs::write(&audio, b"audio").await.unwrap();
        }
        h.ctx.chunks.mark_completed(chunk.id, &audio, Some(5.0)).unwrap();
    }

    let job = h.service.submit_video_job(project.id).await.unwrap();
    h.run_jobs().await;

    let job = h.ctx.jobs.require(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 0.0);
    assert!(job.error_message.unwrap().contains("File not found"));

    // Nothing after the missing input is attempted
    let statuses: Vec<EntryStatus> = h
        .service
        .queue_entries(project.id)
        .unwrap()
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(statuses, vec![EntryStatus::Pending, EntryStatus::Pending]);
    assert!(h.renderer.renders().is_empty());
    assert_eq!(h.renderer.concats.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Failed
    );
}

#[tokio::test]
async fn test_panicking_job_is_recorded_and_lease_freed() {
    let h = Harness::new();
    let project = h.project("Crashy", &PARAGRAPHS).await;
    h.speech.panic_on(Some("Second"));

    let job = h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let job = h.ctx.jobs.require(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("worker panicked"));
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Failed
    );
    assert!(h.service.running_projects().is_empty());
    assert_eq!(h.ctx.queue.unfinished(), 0);

    // The project is schedulable again and resumes where it stopped
    h.speech.panic_on(None);
    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    assert_eq!(h.speech.calls(), 2 + 2);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
}

#[tokio::test]
async fn test_queue_cap_rejects_without_job_row() {
    let h = Harness::with_config(|c| c.queue_max_pending = Some(1));
    let first = h.project("First", &PARAGRAPHS).await;
    let second = h.project("Second", &PARAGRAPHS).await;

    h.service.submit_audio_job(first.id).await.unwrap();
    let err = h.service.submit_audio_job(second.id).await.unwrap_err();
    assert!(matches!(err, WorkerError::Queue(QueueError::Full(1))));

    let jobs = h.service.project_jobs(second.id).unwrap();
    assert!(job_of(&jobs, JobKind::AudioSynthesis).is_empty());

    h.run_jobs().await;
    h.service.submit_audio_job(second.id).await.unwrap();
    h.run_jobs().await;
    for id in [first.id, second.id] {
        assert_eq!(
            h.service.get_project(id).unwrap().unwrap().status,
            ProjectStatus::Completed
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_duplicate_submissions_leave_one_row() {
    let h = Harness::new();
    let project = h.project("Racing", &PARAGRAPHS).await;

    let (a, b) = tokio::join!(
        h.service.submit_audio_job(project.id),
        h.service.submit_audio_job(project.id)
    );
    let rejected = match (a, b) {
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
        other => panic!("expected exactly one accepted submission, got {:?}", other),
    };
    assert!(rejected.is_duplicate());

    let jobs = h.service.project_jobs(project.id).unwrap();
    let audio = job_of(&jobs, JobKind::AudioSynthesis);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_requested_job_is_adopted_once() {
    let h = Harness::new();
    let project = h.project("Handed Off", &PARAGRAPHS).await;

    let job = h.service.request_job(project.id, JobKind::AudioSynthesis).unwrap();
    assert!(h.ctx.queue.is_empty().await);
    assert!(h
        .service
        .request_job(project.id, JobKind::AudioSynthesis)
        .unwrap_err()
        .is_duplicate());
    assert!(matches!(
        h.service.request_job(project.id, JobKind::TextImport),
        Err(WorkerError::InvalidInput(_))
    ));

    let adopted = h.service.adopt_pending_jobs().await.unwrap();
    assert_eq!(adopted.requeued, 1);
    assert_eq!(adopted.cancelled, 0);
    assert_eq!(h.service.adopt_pending_jobs().await.unwrap().requeued, 0);

    h.run_jobs().await;
    assert_eq!(h.ctx.jobs.require(job.id).unwrap().status, JobStatus::Completed);
    assert_eq!(
        h.service.get_project(project.id).unwrap().unwrap().status,
        ProjectStatus::Completed
    );
}

#[tokio::test]
async fn test_resegment_removes_finished_videos() {
    let h = Harness::new();
    let project = h.project("Redo", &PARAGRAPHS).await;
    h.service.submit_audio_job(project.id).await.unwrap();
    h.run_jobs().await;

    let outputs = h.service.output_videos(project.id).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|o| o.path.exists()));

    h.service.resegment(project.id, None).await.unwrap();
    for output in &outputs {
        assert!(!output.path.exists(), "{} survived", output.path.display());
    }
    assert!(project.output_dir.exists());
}
