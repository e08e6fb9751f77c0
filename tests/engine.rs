// Engine behaviour through the public API: stepping, verdicts, pauses and
// batch scoring over a small grid world.

use blockstep::{
    BatchEvaluator, BlockError, CustomBlock, EngineConfig, ExecutionContext, Interpreter, StateHandle, SteppingDriver,
    Value, Verdict,
};

#[derive(Debug, Clone, PartialEq, Default)]
struct Robot {
    x: i64,
    y: i64,
    moves: u32,
}

fn blocks() -> Vec<CustomBlock<Robot>> {
    vec![
        CustomBlock::new("moveRight", |_, robot: &mut Robot, _| {
            robot.x += 1;
            robot.moves += 1;
            Ok(Value::Undefined)
        }),
        CustomBlock::new("moveUp", |ctx: &ExecutionContext, robot: &mut Robot, _| {
            if robot.y >= 3 {
                return Err(ctx.exit(false, "hit the wall"));
            }
            robot.y += 1;
            robot.moves += 1;
            Ok(Value::Undefined)
        }),
        CustomBlock::new("atGoal", |_, robot: &mut Robot, _| Ok(Value::Bool(robot.x == 2 && robot.y == 2))),
        CustomBlock::new_async("animate", |ctx: ExecutionContext, robot: StateHandle<Robot>, args: Vec<Value>| {
            async move {
                let frames = args.first().map(Value::to_number).unwrap_or(1.0) as u32;
                for _ in 0..frames {
                    robot.update(|r| r.moves += 1);
                    ctx.pause().await;
                }
                Ok::<_, BlockError>(Value::Undefined)
            }
        }),
    ]
}

const SOLUTION: &str = "
highlightBlock('b1');
moveRight();
highlightBlock('b2');
moveRight();
highlightBlock('b3');
moveUp();
highlightBlock('b4');
moveUp();
highlightBlock('b5');
exit(atGoal(), atGoal() ? 'reached the goal' : 'missed the goal');
";

async fn trace(code: &str, initial: &Robot) -> (Vec<(Option<String>, Robot)>, Option<Verdict>) {
    let mut i = Interpreter::new(code, &blocks(), initial).unwrap();
    let mut seen = Vec::new();
    loop {
        let more = i.step().await;
        seen.push((i.highlighted_block().map(str::to_string), i.state().clone()));
        if !more {
            break;
        }
    }
    (seen, i.verdict().cloned())
}

#[tokio::test]
async fn each_step_stops_at_the_next_highlight() {
    let (seen, verdict) = trace(SOLUTION, &Robot::default()).await;
    let highlights: Vec<_> = seen.iter().map(|(h, _)| h.as_deref().unwrap_or("")).collect();
    assert_eq!(highlights, ["b1", "b2", "b3", "b4", "b5", "b5"]);
    assert_eq!(seen[1].1, Robot { x: 1, y: 0, moves: 1 });
    assert_eq!(verdict, Some(Verdict::success("reached the goal")));
}

#[tokio::test]
async fn runs_are_deterministic() {
    let code = "var n = 0; for (var i = 0; i < 4; i++) { highlightBlock('r'); n = n + Math.random(); } exit(n > 0, '' + n);";
    let first = trace(code, &Robot::default()).await;
    let second = trace(code, &Robot::default()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn initial_state_is_never_touched() {
    let initial = Robot::default();
    let mut i = Interpreter::new(SOLUTION, &blocks(), &initial).unwrap();
    while i.step().await {}
    assert_eq!(initial, Robot::default());
    assert_eq!(*i.state(), Robot { x: 2, y: 2, moves: 4 });
}

#[tokio::test]
async fn finished_interpreters_stay_finished() {
    let mut i = Interpreter::new("moveRight(); error('stop here'); moveRight();", &blocks(), &Robot::default()).unwrap();
    assert!(!i.step().await);
    let after = i.state().clone();
    for _ in 0..3 {
        assert!(!i.step().await);
    }
    assert_eq!(*i.state(), after);
    assert_eq!(after.x, 1);
    assert_eq!(i.verdict(), Some(&Verdict::failure("stop here")));
    assert_eq!(i.steps(), 1);
}

#[tokio::test]
async fn block_exit_wins_over_later_code() {
    let (_, verdict) = trace("moveUp(); moveUp(); moveUp(); moveUp(); exit(true, 'unreachable');", &Robot::default()).await;
    assert_eq!(verdict, Some(Verdict::failure("hit the wall")));
}

#[tokio::test]
async fn every_pause_is_one_step() {
    let mut i = Interpreter::new("animate(3); exit(true, 'done');", &blocks(), &Robot::default()).unwrap();
    let mut steps = 0;
    while i.step().await {
        steps += 1;
    }
    assert_eq!(steps, 3);
    assert_eq!(i.state().moves, 3);
    assert_eq!(i.verdict(), Some(&Verdict::success("done")));
}

#[tokio::test]
async fn runaway_loops_end_with_a_verdict() {
    let code = "while (!atGoal()) { if (--loopTrap <= 0) throw 'Infinite loop.'; }";
    let (_, verdict) = trace(code, &Robot::default()).await;
    assert_eq!(verdict, Some(Verdict::failure("program terminated without finishing: infinite loop")));
}

#[tokio::test]
async fn thrown_strings_become_failures() {
    let (_, verdict) = trace("highlightBlock('a'); throw 'custom problem';", &Robot::default()).await;
    assert_eq!(verdict.map(|v| v.success), Some(false));
}

#[tokio::test(start_paused = true)]
async fn batch_agrees_with_single_runs() {
    let testcases = [Robot::default(), Robot { x: 1, y: 1, moves: 0 }, Robot { x: 0, y: 3, moves: 0 }];
    let evaluator = BatchEvaluator::new(SOLUTION, &blocks(), EngineConfig::default());
    let results = evaluator.evaluate(&testcases).await.unwrap();
    assert_eq!(results.len(), 3);
    for (initial, result) in testcases.iter().zip(&results) {
        let (seen, verdict) = trace(SOLUTION, initial).await;
        assert_eq!(Some(result.verdict.clone()), verdict);
        assert_eq!(Some(&result.state), seen.last().map(|(_, s)| s));
    }
    assert_eq!(results[1].verdict, Verdict::failure("missed the goal"));
    assert_eq!(results[2].verdict, Verdict::failure("hit the wall"));
}

#[tokio::test]
async fn driver_replays_after_reset() {
    let mut driver = SteppingDriver::new(SOLUTION, blocks(), Robot::default(), EngineConfig::default()).unwrap();
    while driver.step().await {}
    let end = driver.snapshot();
    driver.reset().unwrap();
    assert_eq!(driver.snapshot().state, Robot::default());
    while driver.step().await {}
    assert_eq!(driver.snapshot(), end);
}
