use crate::jobs::descriptor::{BacklinkScan, JobDescriptor, JobKind, RootJob};
use crate::model::{ChangeEvent, DependencyTable, EditMode, EventKind, RevisionId, Subject};

/// Build the initial jobs for a wiki change.
///
/// Apart from revision visibility changes, subjects in the file namespace
/// only ever get an imagelinks fan-out.
pub fn jobs_for_event(event: &ChangeEvent) -> Vec<JobDescriptor> {
    let subject = &event.subject;
    match &event.kind {
        EventKind::Move {
            to,
            old_revision,
            new_revision,
        } => {
            let mut jobs = page_jobs(event, subject, EditMode::Delete, Some(*old_revision), false);
            jobs.extend(page_jobs(event, to, EditMode::Edit, Some(*new_revision), false));
            jobs
        }
        EventKind::RevisionVisibility { revisions } => vec![JobDescriptor::new(
            subject.title.clone(),
            JobKind::RevisionVisibility {
                revisions: revisions.clone(),
            },
        )],
        _ if subject.title.is_file() => vec![dependency_job(event, subject, DependencyTable::Imagelinks)],
        EventKind::Edit | EventKind::Undelete => page_jobs(event, subject, EditMode::Edit, None, true),
        EventKind::Delete => page_jobs(event, subject, EditMode::Delete, subject.latest_revision, false),
        EventKind::Upload => page_jobs(event, subject, EditMode::File, None, false),
    }
}

fn page_jobs(
    event: &ChangeEvent,
    subject: &Subject,
    mode: EditMode,
    revision: Option<RevisionId>,
    with_transclusions: bool,
) -> Vec<JobDescriptor> {
    if subject.title.is_file() {
        return vec![dependency_job(event, subject, DependencyTable::Imagelinks)];
    }
    let mut jobs = vec![JobDescriptor::page_update(subject.title.clone(), mode, revision)];
    if with_transclusions {
        jobs.push(dependency_job(event, subject, DependencyTable::Templatelinks));
    }
    jobs
}

fn dependency_job(event: &ChangeEvent, subject: &Subject, table: DependencyTable) -> JobDescriptor {
    let root = RootJob::for_dependency(
        table,
        &subject.title,
        subject.latest_revision,
        event.occurred_at,
    );
    JobDescriptor::new(
        subject.title.clone(),
        JobKind::Backlinks(BacklinkScan {
            table,
            cursor: None,
        }),
    )
    .with_root(Some(root))
}
