use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lesson_recurrence::{
    decode, last_occurrence, occurrences, Action, CoordinatorState, EditRequest, EndCondition,
    EngineConfig, InMemoryLessonStore, Lesson, LessonChanges, MutationGuard, NewLesson,
    RecurrenceError, RecurrenceState, Scope, SeriesMutationCoordinator, SplitPlan, Step,
};

const WEEKLY_FIVE: &str = "DTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;INTERVAL=1;COUNT=5";

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
}

/// Store holding the five lessons of `WEEKLY_FIVE` (Jan 1, 8, 15, 22, 29).
async fn seeded() -> (InMemoryLessonStore, Vec<Lesson>) {
    let store = InMemoryLessonStore::new();
    let mut lessons = Vec::new();
    for start in occurrences(WEEKLY_FIVE, 10).unwrap() {
        lessons.push(
            store
                .insert(NewLesson {
                    start,
                    duration_minutes: 60,
                    recurrence_rule: Some(WEEKLY_FIVE.to_string()),
                    note: None,
                })
                .await,
        );
    }
    (store, lessons)
}

fn coordinator(store: &InMemoryLessonStore) -> SeriesMutationCoordinator<InMemoryLessonStore> {
    SeriesMutationCoordinator::new(store.clone(), EngineConfig::default(), MutationGuard::new())
}

fn starts(lessons: &[Lesson]) -> Vec<DateTime<Utc>> {
    lessons.iter().map(|l| l.start).collect()
}

fn edit(changes: LessonChanges, state: &RecurrenceState) -> Action {
    Action::Edit(EditRequest::new(changes, state))
}

// ── Single scope ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_delete_keeps_rest_of_series() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);

    let step = coordinator
        .request(Action::Delete, lessons[2].clone())
        .await
        .unwrap();
    assert_eq!(step, Step::ScopeRequired);

    let step = coordinator.resolve(Scope::Single).await.unwrap();
    assert!(matches!(step, Step::Completed(ref report) if report.refresh));
    assert_eq!(coordinator.state(), &CoordinatorState::Idle);

    let remaining = store.all().await;
    assert_eq!(
        starts(&remaining),
        vec![at(2024, 1, 1), at(2024, 1, 8), at(2024, 1, 22), at(2024, 1, 29)]
    );
    assert!(remaining
        .iter()
        .all(|l| l.recurrence_rule.as_deref() == Some(WEEKLY_FIVE)));
}

#[tokio::test]
async fn test_single_edit_detaches_target() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    let state = RecurrenceState::for_lesson(&lessons[2]);
    let changes = LessonChanges {
        duration_minutes: Some(90),
        ..LessonChanges::default()
    };

    coordinator
        .request(edit(changes, &state), lessons[2].clone())
        .await
        .unwrap();
    coordinator.resolve(Scope::Single).await.unwrap();

    let edited = store.get(lessons[2].id).await.unwrap();
    assert_eq!(edited.recurrence_rule, None);
    assert_eq!(edited.duration_minutes, 90);
    assert_eq!(edited.start, at(2024, 1, 15));

    let untouched = store.get(lessons[3].id).await.unwrap();
    assert_eq!(untouched.recurrence_rule.as_deref(), Some(WEEKLY_FIVE));
}

// ── Future scope ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_future_edit_with_new_interval_requires_confirmation() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    let mut state = RecurrenceState::for_lesson(&lessons[2]);
    state.set_interval(2).unwrap();

    coordinator
        .request(edit(LessonChanges::default(), &state), lessons[2].clone())
        .await
        .unwrap();
    let step = coordinator.resolve(Scope::Future).await.unwrap();
    assert_eq!(step, Step::RecurrenceChangeConfirmationRequired);
    assert!(matches!(
        coordinator.state(),
        CoordinatorState::RecurrenceChangePending { .. }
    ));

    let step = coordinator.confirm_recurrence_change().await.unwrap();
    let Step::Completed(report) = step else {
        panic!("expected completion");
    };
    assert!(matches!(report.plan, SplitPlan::Split { .. }));

    let all = store.all().await;
    assert_eq!(
        starts(&all),
        vec![at(2024, 1, 1), at(2024, 1, 8), at(2024, 1, 15), at(2024, 1, 29)]
    );

    let truncated = all[0].recurrence_rule.clone().unwrap();
    assert_eq!(all[1].recurrence_rule.as_deref(), Some(truncated.as_str()));
    let (_, options) = decode(&truncated).unwrap();
    assert_eq!(
        options.end,
        EndCondition::Until(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap())
    );

    let replacement = all[2].recurrence_rule.clone().unwrap();
    assert_eq!(all[3].recurrence_rule.as_deref(), Some(replacement.as_str()));
    let (anchor, options) = decode(&replacement).unwrap();
    assert_eq!(anchor, at(2024, 1, 15));
    assert_eq!(options.interval, 2);
}

#[tokio::test]
async fn test_future_edit_unchanged_shape_skips_confirmation() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    let state = RecurrenceState::for_lesson(&lessons[2]);
    let changes = LessonChanges {
        note: Some("room 4".to_string()),
        ..LessonChanges::default()
    };

    coordinator
        .request(edit(changes, &state), lessons[2].clone())
        .await
        .unwrap();
    let step = coordinator.resolve(Scope::Future).await.unwrap();
    assert!(matches!(step, Step::Completed(_)));

    let all = store.all().await;
    assert_eq!(starts(&all), starts(&lessons));
    assert!(all[..2].iter().all(|l| l.note.is_none()));
    assert!(all[2..].iter().all(|l| l.note.as_deref() == Some("room 4")));
}

#[tokio::test]
async fn test_future_delete_truncates_series() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);

    coordinator
        .request(Action::Delete, lessons[3].clone())
        .await
        .unwrap();
    let step = coordinator.resolve(Scope::Future).await.unwrap();
    assert!(matches!(step, Step::Completed(_)));

    let remaining = store.all().await;
    assert_eq!(
        starts(&remaining),
        vec![at(2024, 1, 1), at(2024, 1, 8), at(2024, 1, 15)]
    );
    let rule = remaining[0].recurrence_rule.clone().unwrap();
    assert_eq!(last_occurrence(&rule).unwrap(), Some(at(2024, 1, 15)));
}

#[tokio::test]
async fn test_future_delete_at_anchor_removes_everything() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);

    coordinator
        .request(Action::Delete, lessons[0].clone())
        .await
        .unwrap();
    coordinator.resolve(Scope::Future).await.unwrap();

    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_open_replacement_respects_materialize_limit() {
    let (store, lessons) = seeded().await;
    let config = EngineConfig {
        materialize_limit: 3,
    };
    let mut coordinator = SeriesMutationCoordinator::new(store.clone(), config, MutationGuard::new());
    let mut state = RecurrenceState::for_lesson(&lessons[2]);
    state.set_never();

    coordinator
        .request(edit(LessonChanges::default(), &state), lessons[2].clone())
        .await
        .unwrap();
    coordinator.resolve(Scope::Future).await.unwrap();
    coordinator.confirm_recurrence_change().await.unwrap();

    assert_eq!(
        starts(&store.all().await),
        vec![at(2024, 1, 1), at(2024, 1, 8), at(2024, 1, 15), at(2024, 1, 22), at(2024, 1, 29)]
    );
}

#[tokio::test]
async fn test_future_edit_switching_recurrence_off_requires_confirmation() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    let mut state = RecurrenceState::for_lesson(&lessons[1]);
    state.set_recurring(false);

    coordinator
        .request(edit(LessonChanges::default(), &state), lessons[1].clone())
        .await
        .unwrap();
    let step = coordinator.resolve(Scope::Future).await.unwrap();
    assert_eq!(step, Step::RecurrenceChangeConfirmationRequired);
    assert_eq!(store.all().await, lessons);

    let step = coordinator.confirm_recurrence_change().await.unwrap();
    assert!(matches!(
        step,
        Step::Completed(ref report)
            if matches!(report.plan, SplitPlan::Split { replacement: None, .. })
    ));

    let all = store.all().await;
    assert_eq!(starts(&all), vec![at(2024, 1, 1), at(2024, 1, 8)]);
    assert!(all[0].recurrence_rule.is_some());
    assert_eq!(all[1].recurrence_rule, None);
}

// ── Implicit single scope ───────────────────────────────────────────────────

#[tokio::test]
async fn test_non_recurring_lesson_skips_scope_prompt() {
    let store = InMemoryLessonStore::new();
    let lesson = store
        .insert(NewLesson {
            start: at(2024, 3, 1),
            duration_minutes: 30,
            recurrence_rule: None,
            note: None,
        })
        .await;
    let mut coordinator = coordinator(&store);

    let step = coordinator.request(Action::Delete, lesson).await.unwrap();
    assert!(matches!(step, Step::Completed(_)));
    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_invalid_rule_treated_as_non_recurring() {
    let store = InMemoryLessonStore::new();
    let lesson = store
        .insert(NewLesson {
            start: at(2024, 3, 1),
            duration_minutes: 30,
            recurrence_rule: Some(String::new()),
            note: None,
        })
        .await;
    let state = RecurrenceState::for_lesson(&lesson);
    assert!(!state.is_recurring());
    let mut coordinator = coordinator(&store);

    let step = coordinator
        .request(edit(LessonChanges::default(), &state), lesson.clone())
        .await
        .unwrap();
    assert!(matches!(
        step,
        Step::Completed(ref report) if matches!(report.plan, SplitPlan::Detach { .. })
    ));
    assert_eq!(store.get(lesson.id).await.unwrap().recurrence_rule, None);
}

// ── Cancellation and failure ────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_from_scope_pending_has_no_effect() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);

    coordinator
        .request(Action::Delete, lessons[1].clone())
        .await
        .unwrap();
    assert!(coordinator.cancel());
    assert_eq!(coordinator.state(), &CoordinatorState::Idle);
    assert!(!coordinator.cancel());
    assert_eq!(store.all().await, lessons);
}

#[tokio::test]
async fn test_cancel_from_recurrence_change_pending() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    let mut state = RecurrenceState::for_lesson(&lessons[1]);
    state.set_interval(3).unwrap();

    coordinator
        .request(edit(LessonChanges::default(), &state), lessons[1].clone())
        .await
        .unwrap();
    coordinator.resolve(Scope::Future).await.unwrap();
    assert!(coordinator.cancel());

    let err = coordinator.confirm_recurrence_change().await.unwrap_err();
    assert!(matches!(err, RecurrenceError::InvalidTransition(_)));
    assert_eq!(store.all().await, lessons);
}

#[tokio::test]
async fn test_store_failure_commits_nothing() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);
    store.fail_next_write().await;

    coordinator
        .request(Action::Delete, lessons[2].clone())
        .await
        .unwrap();
    let err = coordinator.resolve(Scope::Future).await.unwrap_err();

    assert!(matches!(err, RecurrenceError::SeriesMutation(_)));
    assert_eq!(coordinator.state(), &CoordinatorState::Idle);
    assert_eq!(store.all().await, lessons);

    // A retry goes through.
    coordinator
        .request(Action::Delete, lessons[2].clone())
        .await
        .unwrap();
    coordinator.resolve(Scope::Future).await.unwrap();
    assert_eq!(store.all().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_mutation_for_same_lesson_rejected() {
    let (store, lessons) = seeded().await;
    let guard = MutationGuard::new();
    let mut coordinator =
        SeriesMutationCoordinator::new(store.clone(), EngineConfig::default(), guard.clone());
    let _in_flight = guard.try_acquire(lessons[2].id).unwrap();

    coordinator
        .request(Action::Delete, lessons[2].clone())
        .await
        .unwrap();
    let err = coordinator.resolve(Scope::Single).await.unwrap_err();

    assert!(matches!(err, RecurrenceError::MutationInProgress(id) if id == lessons[2].id));
    assert_eq!(coordinator.state(), &CoordinatorState::Idle);
    assert_eq!(store.all().await, lessons);
}

#[tokio::test]
async fn test_coordinators_sharing_a_guard_release_it_after_commit() {
    let (store, lessons) = seeded().await;
    let guard = MutationGuard::new();
    let mut first =
        SeriesMutationCoordinator::new(store.clone(), EngineConfig::default(), guard.clone());
    let mut second =
        SeriesMutationCoordinator::new(store.clone(), EngineConfig::default(), guard.clone());

    first
        .request(Action::Delete, lessons[3].clone())
        .await
        .unwrap();
    first.resolve(Scope::Single).await.unwrap();
    assert!(!guard.is_active(lessons[3].id));

    let held = guard.try_acquire(lessons[1].id).unwrap();
    second
        .request(Action::Delete, lessons[1].clone())
        .await
        .unwrap();
    let err = second.resolve(Scope::Single).await.unwrap_err();
    assert!(matches!(err, RecurrenceError::MutationInProgress(id) if id == lessons[1].id));
    drop(held);

    second
        .request(Action::Delete, lessons[1].clone())
        .await
        .unwrap();
    second.resolve(Scope::Single).await.unwrap();
    assert_eq!(store.all().await.len(), 3);
}

#[tokio::test]
async fn test_wrong_state_transitions_rejected() {
    let (store, lessons) = seeded().await;
    let mut coordinator = coordinator(&store);

    let err = coordinator.resolve(Scope::Single).await.unwrap_err();
    assert!(matches!(err, RecurrenceError::InvalidTransition(_)));

    coordinator
        .request(Action::Delete, lessons[0].clone())
        .await
        .unwrap();
    let err = coordinator
        .request(Action::Delete, lessons[1].clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RecurrenceError::InvalidTransition(_)));
    assert!(matches!(
        coordinator.state(),
        CoordinatorState::ScopePending { lesson, .. } if lesson.id == lessons[0].id
    ));
}
