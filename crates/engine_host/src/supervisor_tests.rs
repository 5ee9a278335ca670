use super::*;
use crate::testing::EngineScript;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const FEN: &str = "R-0,0,0,0-1,1,1,1-1,1,1,1-0,0,0,0-0-x,x,x,8,x,x,x";
const NEXT_FEN: &str = "B-0,0,0,0-1,1,1,1-1,1,1,1-0,0,0,0-1-x,x,x,8,x,x,x";

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|l| l.to_string()).collect()
}

/// Engine with 20 legal moves that answers every `go` with `search`.
fn engine(search: &'static [&'static str]) -> EngineScript {
    EngineScript::new(move |cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 20"]),
        c if c.starts_with("go") => lines(search),
        _ => Vec::new(),
    })
}

fn supervisor(script: &EngineScript, config: EngineConfig) -> EngineSupervisor {
    EngineSupervisor::new(script.factory(), config).expect("scripted engine starts")
}

fn noop_hook() -> GameOverHook {
    Box::new(|| {})
}

#[test]
fn test_best_move_from_bestmove_line() {
    let script = engine(&[
        "info depth 3 time 5 nodes 800 pv e2-e4 e7-e5 score 12",
        "bestmove e2-e4",
    ]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_position(FEN, &[]).unwrap();
    let result = engine.best_move(1000, None, None).unwrap();

    assert_eq!(result.best_move, "e2-e4");
    assert_eq!(result.principal_variation, vec!["e2-e4", "e7-e5"]);
    assert_eq!(result.score, Some(12));
    assert_eq!(result.depth, Some(3));
    assert!(!result.game_over);
    assert!(!result.ponder_hit);

    assert_eq!(
        script.commands(),
        vec![
            "setoption name Threads value 11".to_string(),
            format!("position fen {FEN}"),
            "get_num_legal_moves".to_string(),
            "go movetime 950".to_string(),
        ]
    );
}

#[test]
fn test_game_completed_before_bestmove() {
    let script = engine(&["info string Game completed"]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_position(FEN, &[]).unwrap();
    let result = engine.best_move(1000, None, None).unwrap();

    assert!(result.game_over);
    assert_eq!(result.best_move, "");
}

#[test]
fn test_forced_move_caps_depth() {
    let script = EngineScript::new(|cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 1"]),
        c if c.starts_with("go") => lines(&["bestmove h2-h3"]),
        _ => Vec::new(),
    });
    let config = EngineConfig {
        max_depth: Some(20),
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.set_position(FEN, &[]).unwrap();
    engine.best_move(2000, None, None).unwrap();

    let commands = script.commands();
    assert_eq!(commands.last().unwrap(), "go movetime 1950 depth 1");
}

#[test]
fn test_configured_max_depth() {
    let script = engine(&["bestmove h2-h3"]);
    let config = EngineConfig {
        max_depth: Some(20),
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.set_position(FEN, &[]).unwrap();
    engine.best_move(2000, None, None).unwrap();

    assert_eq!(script.commands().last().unwrap(), "go movetime 1950 depth 20");
}

#[test]
fn test_movetime_never_below_minimum() {
    let script = engine(&["bestmove h2-h3"]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_position(FEN, &[]).unwrap();
    engine.best_move(30, None, None).unwrap();

    assert_eq!(script.commands().last().unwrap(), "go movetime 10");
}

#[test]
fn test_legal_move_query_timeout() {
    let script = EngineScript::new(|_| Vec::new());
    let config = EngineConfig {
        query_timeout_ms: 50,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    assert_eq!(engine.num_legal_moves().unwrap(), None);
}

#[test]
fn test_legal_move_query_unexpected_reply() {
    let script = EngineScript::new(|cmd| match cmd {
        "get_num_legal_moves" => lines(&["readyok"]),
        _ => Vec::new(),
    });
    let mut engine = supervisor(&script, EngineConfig::default());

    assert_eq!(engine.num_legal_moves().unwrap(), None);
}

#[test]
fn test_pv_callback_only_for_deep_lines() {
    let script = engine(&[
        "info depth 5 time 20 pv a1-a2 score 1",
        "info depth 10 time 600 pv b1-b2 b3-b4 score 2",
        "info depth 16 time 700 pv c1-c2 score 3",
        "bestmove c1-c2",
    ]);
    let mut engine = supervisor(&script, EngineConfig::default());
    let mut seen: Vec<Vec<String>> = Vec::new();
    let mut on_pv = |pv: &[String]| seen.push(pv.to_vec());

    engine.set_position(FEN, &[]).unwrap();
    let result = engine.best_move(1000, Some(&mut on_pv), None).unwrap();

    assert_eq!(result.best_move, "c1-c2");
    assert_eq!(seen, vec![vec!["b1-b2", "b3-b4"], vec!["c1-c2"]]);
}

#[test]
fn test_deadline_returns_partial_result() {
    let script = engine(&["info depth 7 time 40 pv d2-d4 score -15"]);
    let config = EngineConfig {
        wait_slack_ms: 0,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.set_position(FEN, &[]).unwrap();
    let result = engine.best_move(100, None, None).unwrap();

    assert_eq!(result.best_move, "d2-d4");
    assert_eq!(result.score, Some(-15));
}

#[test]
fn test_no_best_move_is_error() {
    let script = engine(&["info string thinking"]);
    let config = EngineConfig {
        wait_slack_ms: 0,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.set_position(FEN, &[]).unwrap();
    let err = engine.best_move(100, None, None).unwrap_err();

    assert!(matches!(err, EngineError::NoBestMove));
}

#[test]
fn test_malformed_lines_are_skipped() {
    let script = engine(&["info depth x time 1 pv a1-a2 score 0", "bestmove a1-a2"]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_position(FEN, &[]).unwrap();
    let result = engine.best_move(500, None, None).unwrap();

    assert_eq!(result.best_move, "a1-a2");
    assert_eq!(result.depth, None);
}

/// Ponder engine: the background search predicts `d2-d3` with `pv`,
/// foreground searches answer `z9-z8`.
fn ponder_engine(pv: &'static str) -> EngineScript {
    EngineScript::new(move |cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 20"]),
        "go movetime 600000" => vec![format!("info depth 20 time 100 pv {pv} score 30")],
        "stop" => lines(&["bestmove d2-d3"]),
        c if c.starts_with("go") => lines(&["bestmove z9-z8"]),
        _ => Vec::new(),
    })
}

struct PonderCase {
    enabled: bool,
    pv: &'static str,
    budget_ms: u64,
    last_move: Option<&'static str>,
}

impl Default for PonderCase {
    fn default() -> Self {
        Self {
            enabled: true,
            pv: "d2-d3 e5-e4 f1-f2",
            budget_ms: 100,
            last_move: Some("d2-d3"),
        }
    }
}

fn run_ponder_case(case: PonderCase) -> (SearchResult, Vec<String>) {
    let script = ponder_engine(case.pv);
    let config = EngineConfig {
        ponder: case.enabled,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.ponder(FEN, Some("a1-a2"), noop_hook()).unwrap();
    assert!(engine.is_pondering());
    thread::sleep(Duration::from_millis(250));

    engine.set_position(NEXT_FEN, &[]).unwrap();
    let result = engine.best_move(case.budget_ms, None, case.last_move).unwrap();
    (result, script.commands())
}

#[test]
fn test_ponder_hit_reuses_shifted_pv() {
    let (result, commands) = run_ponder_case(PonderCase::default());

    assert!(result.ponder_hit);
    assert_eq!(result.best_move, "e5-e4");
    assert_eq!(result.principal_variation, vec!["e5-e4", "f1-f2"]);
    assert_eq!(result.score, Some(30));
    assert_eq!(result.depth, Some(20));

    assert_eq!(
        commands,
        vec![
            "setoption name Threads value 11".to_string(),
            format!("position fen {FEN} moves a1-a2"),
            "go movetime 600000".to_string(),
            "stop".to_string(),
            format!("position fen {NEXT_FEN}"),
        ]
    );
}

fn assert_fresh_search(result: SearchResult, commands: Vec<String>) {
    assert!(!result.ponder_hit);
    assert_eq!(result.best_move, "z9-z8");
    assert_eq!(commands.last().unwrap(), "go movetime 50");
}

#[test]
fn test_ponder_miss_when_disabled() {
    let (result, commands) = run_ponder_case(PonderCase {
        enabled: false,
        ..Default::default()
    });
    assert_fresh_search(result, commands);
}

#[test]
fn test_ponder_miss_on_wrong_prediction() {
    let (result, commands) = run_ponder_case(PonderCase {
        last_move: Some("m7-l7"),
        ..Default::default()
    });
    assert_fresh_search(result, commands);

    let (result, commands) = run_ponder_case(PonderCase {
        last_move: None,
        ..Default::default()
    });
    assert_fresh_search(result, commands);
}

#[test]
fn test_ponder_miss_when_too_short() {
    let (result, commands) = run_ponder_case(PonderCase {
        budget_ms: 1000,
        ..Default::default()
    });
    assert!(!result.ponder_hit);
    assert_eq!(commands.last().unwrap(), "go movetime 950");
}

#[test]
fn test_ponder_miss_with_single_move_pv() {
    let (result, commands) = run_ponder_case(PonderCase {
        pv: "d2-d3",
        ..Default::default()
    });
    assert_fresh_search(result, commands);
}

#[test]
fn test_ponder_same_root_is_noop() {
    let script = ponder_engine("d2-d3 e5-e4");
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.ponder(FEN, Some("a1-a2"), noop_hook()).unwrap();
    engine.ponder(FEN, Some("a1-a2"), noop_hook()).unwrap();
    let go_count = script
        .commands()
        .iter()
        .filter(|c| *c == "go movetime 600000")
        .count();
    assert_eq!(go_count, 1);

    engine.ponder(NEXT_FEN, None, noop_hook()).unwrap();
    let commands = script.commands();
    assert_eq!(
        commands[commands.len() - 3..],
        [
            "stop".to_string(),
            format!("position fen {NEXT_FEN}"),
            "go movetime 600000".to_string(),
        ]
    );
    assert!(engine.is_pondering());
}

#[test]
fn test_stop_ponder_keeps_outcome() {
    let script = ponder_engine("d2-d3 e5-e4");
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.ponder(FEN, None, noop_hook()).unwrap();
    engine.stop_ponder();

    assert!(!engine.is_pondering());
    let outcome = engine.stopped_ponder().expect("outcome kept");
    assert_eq!(outcome.predicted_move(), Some("d2-d3"));
    assert_eq!(outcome.root, PonderRoot::new(FEN, None));
}

#[test]
fn test_stop_ponder_gives_up_after_timeout() {
    let script = EngineScript::new(|cmd| match cmd {
        "go movetime 600000" => lines(&["info depth 9 time 80 pv g1-g2 h1-h2 score 4"]),
        _ => Vec::new(),
    });
    let config = EngineConfig {
        ponder_stop_timeout_ms: 50,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.ponder(FEN, None, noop_hook()).unwrap();
    let started = Instant::now();
    engine.stop_ponder();

    assert!(started.elapsed() < Duration::from_secs(1));
    let outcome = engine.stopped_ponder().expect("partial outcome kept");
    assert_eq!(outcome.predicted_move(), Some("g1-g2"));
}

#[test]
fn test_late_ponder_output_never_answers_next_search() {
    let script = EngineScript::new(|cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 20"]),
        "go movetime 600000" => lines(&["info depth 9 time 80 pv g1-g2 h1-h2 score 4"]),
        c if c.starts_with("go") => lines(&["bestmove z9-z8"]),
        _ => Vec::new(),
    });
    let config = EngineConfig {
        ponder_stop_timeout_ms: 50,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);
    engine.ponder(FEN, None, noop_hook()).unwrap();

    // The stop is answered only after the ponder wait has given up
    let late = script.clone();
    let emitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        late.emit("info depth 10 time 300 pv g1-g2 h1-h2 score 6");
        late.emit("bestmove g1-g2");
    });

    engine.set_position(NEXT_FEN, &[]).unwrap();
    let result = engine.best_move(100, None, None).unwrap();
    emitter.join().unwrap();

    assert_eq!(result.best_move, "z9-z8");
    assert_eq!(result.depth, None);
}

#[test]
fn test_overrun_search_output_is_not_reused() {
    let script = EngineScript::new(|cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 20"]),
        "go movetime 10" => lines(&["info depth 4 time 5 pv a1-a2 score 3"]),
        c if c.starts_with("go") => lines(&["bestmove z9-z8"]),
        _ => Vec::new(),
    });
    let config = EngineConfig {
        wait_slack_ms: 0,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);

    engine.set_position(FEN, &[]).unwrap();
    let first = engine.best_move(50, None, None).unwrap();
    assert_eq!(first.best_move, "a1-a2");
    assert_eq!(script.commands().last().unwrap(), "stop");

    let late = script.clone();
    let emitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        late.emit("info depth 12 time 160 pv a1-a2 b1-b2 score 9");
        late.emit("bestmove a1-a2");
    });

    engine.set_position(NEXT_FEN, &[]).unwrap();
    let second = engine.best_move(100, None, None).unwrap();
    emitter.join().unwrap();

    assert_eq!(second.best_move, "z9-z8");
    assert_eq!(second.depth, None);
}

#[test]
fn test_unclaimed_output_is_discarded_before_search() {
    let script = engine(&["bestmove z9-z8"]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_position(FEN, &[]).unwrap();
    script.emit("info string n_legal 1");
    script.emit("info depth 30 time 900 pv a1-a2 score 500");
    script.emit("bestmove a1-a2");
    let result = engine.best_move(500, None, None).unwrap();

    assert_eq!(result.best_move, "z9-z8");
    assert_eq!(result.depth, None);
    assert_eq!(script.commands().last().unwrap(), "go movetime 450");
}

#[test]
fn test_settle_gives_up_on_silent_engine() {
    let script = EngineScript::new(|cmd| match cmd {
        "get_num_legal_moves" => lines(&["info string n_legal 20"]),
        "go movetime 600000" => lines(&["info depth 9 time 80 pv g1-g2 h1-h2 score 4"]),
        c if c.starts_with("go") => lines(&["bestmove z9-z8"]),
        _ => Vec::new(),
    });
    let config = EngineConfig {
        ponder_stop_timeout_ms: 50,
        settle_timeout_ms: 50,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);
    engine.ponder(FEN, None, noop_hook()).unwrap();

    let started = Instant::now();
    engine.set_position(NEXT_FEN, &[]).unwrap();
    let result = engine.best_move(100, None, None).unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.best_move, "z9-z8");
}

#[test]
fn test_discard_ponder_forgets_outcome() {
    let (script, config) = (
        ponder_engine("d2-d3 e5-e4 f1-f2"),
        EngineConfig {
            ponder: true,
            ..Default::default()
        },
    );
    let mut engine = supervisor(&script, config);

    engine.ponder(FEN, Some("a1-a2"), noop_hook()).unwrap();
    thread::sleep(Duration::from_millis(250));
    engine.discard_ponder();
    assert!(engine.stopped_ponder().is_none());

    engine.set_position(NEXT_FEN, &[]).unwrap();
    let result = engine.best_move(100, None, Some("d2-d3")).unwrap();

    assert!(!result.ponder_hit);
    assert_eq!(result.best_move, "z9-z8");
}

#[test]
fn test_ponder_game_over_hook() {
    let script = EngineScript::new(|cmd| match cmd {
        "go movetime 600000" => lines(&["info string Game completed"]),
        _ => Vec::new(),
    });
    let mut engine = supervisor(&script, EngineConfig::default());
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    engine
        .ponder(FEN, None, Box::new(move || flag.store(true, Ordering::SeqCst)))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !fired.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(fired.load(Ordering::SeqCst));
    while engine.is_pondering() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!engine.is_pondering());
}

#[test]
fn test_crashed_engine_is_recreated_with_options() {
    let script = engine(&["bestmove a1-a2"]);
    let config = EngineConfig {
        threads: 4,
        ..Default::default()
    };
    let mut engine = supervisor(&script, config);
    engine.set_team(Team::BlueGreen).unwrap();
    assert_eq!(script.spawned(), 1);

    script.kill();
    engine.set_position(FEN, &[]).unwrap();

    assert_eq!(script.spawned(), 2);
    let commands = script.commands();
    assert_eq!(
        commands[commands.len() - 3..],
        [
            "setoption name Threads value 4".to_string(),
            "setoption name Team value blue_green".to_string(),
            format!("position fen {FEN}"),
        ]
    );
}

#[test]
fn test_set_team_only_sends_changes() {
    let script = engine(&[]);
    let mut engine = supervisor(&script, EngineConfig::default());

    engine.set_team(Team::RedYellow).unwrap();
    engine.set_team(Team::RedYellow).unwrap();
    engine.set_team(Team::None).unwrap();

    let team_commands: Vec<String> = script
        .commands()
        .into_iter()
        .filter(|c| c.contains("name Team"))
        .collect();
    assert_eq!(
        team_commands,
        vec![
            "setoption name Team value red_yellow",
            "setoption name Team value no_team",
        ]
    );
}

#[test]
fn test_engine_config_from_partial_toml() {
    let config: EngineConfig = toml::from_str(
        r#"
        path = "/opt/engine/cli"
        threads = 2
        ponder = true
        "#,
    )
    .unwrap();

    assert_eq!(config.path, PathBuf::from("/opt/engine/cli"));
    assert_eq!(config.threads, 2);
    assert!(config.ponder);
    assert_eq!(config.ponder_hit_ratio, 1.5);
    assert_eq!(config.max_depth, None);
}
