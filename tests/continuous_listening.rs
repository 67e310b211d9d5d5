//! Utterance handling across restarts: finals, promotion, timeouts, errors.

use earshot::models::InMemoryModelProvider;
use earshot::session::{CollectorListener, Session, SessionConfig, SessionEvent, SessionState};
use earshot::stt::{ScriptEvent, ScriptStep, ScriptedEngine, UtteranceScript};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn listening_session(
    engine: &ScriptedEngine,
    config: SessionConfig,
) -> (Session, Arc<CollectorListener>) {
    let collector = Arc::new(CollectorListener::new());
    let session = Session::new(
        config,
        &InMemoryModelProvider::new(),
        Arc::new(engine.clone()),
        collector.clone(),
    )
    .unwrap();
    assert!(wait_until(|| session.is_ready()), "model never became ready");
    session.start_listening();
    assert!(session.is_listening());
    (session, collector)
}

fn partial(after_ms: u64, text: &str) -> ScriptStep {
    ScriptStep::new(
        after_ms,
        ScriptEvent::Partial {
            text: text.to_string(),
        },
    )
}

fn final_result(after_ms: u64, text: &str) -> ScriptStep {
    ScriptStep::new(
        after_ms,
        ScriptEvent::Final {
            text: text.to_string(),
        },
    )
}

fn has_final(events: &[SessionEvent]) -> bool {
    events.iter().any(|e| matches!(e, SessionEvent::Final(_)))
}

fn final_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Final(_)))
        .count()
}

#[test]
fn test_final_is_delivered_and_listening_resumes() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        partial(5, "turn on"),
        final_result(5, "turn on the lights"),
    ])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, has_final));
    assert!(wait_until(|| engine.stats().created == 2));

    assert!(session.is_listening());
    assert_eq!(session.state(), SessionState::Listening);
    assert_eq!(
        collector.events(),
        vec![
            SessionEvent::Ready,
            SessionEvent::Partial("turn on".to_string()),
            SessionEvent::Final("turn on the lights".to_string()),
        ]
    );
}

#[test]
fn test_second_final_in_same_utterance_is_dropped() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        final_result(5, "turn on the lights"),
        final_result(5, "turn on the lights please"),
    ])]);
    let (_session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(wait_until(|| engine.stats().created == 2));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(collector.finals(), vec!["turn on the lights"]);
}

#[test]
fn test_empty_final_is_not_delivered_but_restarts() {
    let engine = ScriptedEngine::new(vec![
        UtteranceScript::new(vec![final_result(5, "")]),
        UtteranceScript::new(vec![final_result(5, "hello")]),
    ]);
    let (_session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, has_final));
    assert_eq!(collector.finals(), vec!["hello"]);
}

#[test]
fn test_stalled_partial_is_promoted_after_silence() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![partial(0, "turn on the")])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, |events| events.len() >= 2));
    let heard_at = Instant::now();

    thread::sleep(Duration::from_millis(700).saturating_sub(heard_at.elapsed()));
    assert!(collector.finals().is_empty(), "promoted too early");

    let promoted = collector.wait_for(
        Duration::from_millis(1500).saturating_sub(heard_at.elapsed()),
        has_final,
    );
    assert!(promoted, "partial not promoted within 1.5s");
    assert_eq!(collector.finals(), vec!["turn on the"]);
    assert!(wait_until(|| engine.stats().created == 2));
    assert!(session.is_listening());
}

#[test]
fn test_promoted_partial_is_not_finalized_twice() {
    // The engine's own final arrives after the watchdog already promoted
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        partial(0, "open settings"),
        final_result(1_500, "open settings now"),
    ])]);
    let config = SessionConfig {
        restart_delay: Duration::from_millis(1_000),
        ..SessionConfig::default()
    };
    let (_session, collector) = listening_session(&engine, config);

    assert!(collector.wait_for(WAIT, has_final));
    thread::sleep(Duration::from_millis(800));

    assert_eq!(collector.finals(), vec!["open settings"]);
}

#[test]
fn test_timeout_promotes_pending_partial() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        partial(0, "take a picture"),
        ScriptStep::new(20, ScriptEvent::Timeout),
    ])]);
    let (_session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(Duration::from_millis(600), has_final));
    assert_eq!(collector.finals(), vec!["take a picture"]);
    assert!(wait_until(|| engine.stats().created == 2));
}

#[test]
fn test_timeout_without_partial_just_restarts() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![ScriptStep::new(
        5,
        ScriptEvent::Timeout,
    )])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(wait_until(|| engine.stats().created == 2));
    assert!(collector.finals().is_empty());
    assert!(collector.errors().is_empty());
    assert!(session.is_listening());
}

#[test]
fn test_whitespace_partial_is_forwarded_but_never_promoted() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![partial(0, "   ")])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, |events| events.len() >= 2));
    thread::sleep(Duration::from_millis(1_300));

    assert_eq!(collector.partials(), vec!["   "]);
    assert!(collector.finals().is_empty());
    assert_eq!(engine.stats().created, 1);
    assert!(session.is_listening());
}

#[test]
fn test_partial_from_previous_utterance_is_never_promoted() {
    // First utterance ends with an empty final; its partial must not leak
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        partial(0, "stale words"),
        final_result(5, ""),
    ])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(wait_until(|| engine.stats().created == 2));
    thread::sleep(Duration::from_millis(1_300));

    assert_eq!(collector.partials(), vec!["stale words"]);
    assert!(collector.finals().is_empty());
    assert!(session.is_listening());
}

#[test]
fn test_timeout_after_empty_final_promotes_nothing() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        partial(0, "uh"),
        final_result(5, ""),
        ScriptStep::new(5, ScriptEvent::Timeout),
    ])]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(wait_until(|| engine.stats().created == 2));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(collector.partials(), vec!["uh"]);
    assert!(collector.finals().is_empty());
    assert!(session.is_listening());
}

#[test]
fn test_engine_error_is_reported_and_listening_resumes() {
    let engine = ScriptedEngine::new(vec![
        UtteranceScript::new(vec![ScriptStep::new(
            5,
            ScriptEvent::Error {
                message: "decoder stalled".to_string(),
            },
        )]),
        UtteranceScript::new(vec![final_result(5, "back again")]),
    ]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, has_final));

    assert_eq!(
        collector.events(),
        vec![
            SessionEvent::Ready,
            SessionEvent::Error("Recognition engine error: decoder stalled".to_string()),
            SessionEvent::Final("back again".to_string()),
        ]
    );
    assert!(session.is_listening());
}

#[test]
fn test_malformed_payloads_are_ignored() {
    let engine = ScriptedEngine::new(vec![
        UtteranceScript::new(vec![
            ScriptStep::new(
                5,
                ScriptEvent::RawPartial {
                    payload: "{not json".to_string(),
                },
            ),
            ScriptStep::new(
                5,
                ScriptEvent::RawFinal {
                    payload: r#"{"result": []}"#.to_string(),
                },
            ),
        ]),
        UtteranceScript::new(vec![final_result(5, "fine")]),
    ]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, has_final));

    assert!(collector.partials().is_empty());
    assert!(collector.errors().is_empty());
    assert_eq!(collector.finals(), vec!["fine"]);
    assert!(session.is_listening());
}

#[test]
fn test_intermediate_results_do_not_end_the_utterance() {
    let engine = ScriptedEngine::new(vec![UtteranceScript::new(vec![
        ScriptStep::new(
            5,
            ScriptEvent::Result {
                text: "turn".to_string(),
            },
        ),
        final_result(5, "turn off"),
    ])]);
    let (_session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, has_final));
    assert!(wait_until(|| engine.stats().created == 2));

    assert_eq!(collector.finals(), vec!["turn off"]);
}

#[test]
fn test_hundred_utterances_stay_live() {
    let expected: Vec<String> = (0..100).map(|i| format!("utterance {}", i)).collect();
    let scripts = expected
        .iter()
        .map(|text| UtteranceScript::new(vec![partial(1, text), final_result(1, text)]))
        .collect();
    let engine = ScriptedEngine::new(scripts);
    let config = SessionConfig {
        restart_delay: Duration::from_millis(5),
        ..SessionConfig::default()
    };
    let (session, collector) = listening_session(&engine, config);

    assert!(
        collector.wait_for(Duration::from_secs(30), |events| final_count(events) == 100),
        "only {} finals delivered",
        collector.finals().len()
    );
    assert!(wait_until(|| engine.stats().created == 101));

    assert_eq!(collector.ready_count(), 1);
    assert_eq!(collector.finals(), expected);
    assert!(collector.errors().is_empty());
    assert_eq!(collector.overlaps(), 0);
    assert!(session.is_listening());
    assert_eq!(session.generation(), 101);
}

#[test]
fn test_utterances_stay_live_with_default_restart_delay() {
    let expected: Vec<String> = (0..10).map(|i| format!("command {}", i)).collect();
    let scripts = expected
        .iter()
        .map(|text| UtteranceScript::new(vec![partial(5, text), final_result(5, text)]))
        .collect();
    let engine = ScriptedEngine::new(scripts);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(Duration::from_secs(10), |events| final_count(events) == 10));
    assert!(wait_until(|| engine.stats().created == 11));

    assert_eq!(collector.ready_count(), 1);
    assert_eq!(collector.finals(), expected);
    assert!(collector.errors().is_empty());
    assert_eq!(collector.overlaps(), 0);
    assert!(session.is_listening());
    assert_eq!(session.generation(), 11);
}

#[test]
fn test_restart_uses_fresh_recognizer_each_time() {
    let engine = ScriptedEngine::new(vec![
        UtteranceScript::new(vec![final_result(5, "one")]),
        UtteranceScript::new(vec![final_result(5, "two")]),
        UtteranceScript::new(vec![final_result(5, "three")]),
    ]);
    let (session, collector) = listening_session(&engine, SessionConfig::default());

    assert!(collector.wait_for(WAIT, |events| final_count(events) == 3));
    assert!(wait_until(|| engine.stats().created == 4));
    session.close();

    let stats = engine.stats();
    assert_eq!(stats.started, 4);
    assert_eq!(stats.released, 4);
    assert_eq!(collector.finals(), vec!["one", "two", "three"]);
}
