use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::interpreter::{CustomBlock, Interpreter, SetupError, TERMINATED, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestcaseResult<S> {
    pub verdict: Verdict,
    /// `step()` calls it took to reach the verdict.
    pub steps: u64,
    pub state: S,
}

/// Runs one program against many initial states without starving the
/// scheduler.
pub struct BatchEvaluator<S> {
    code: String,
    blocks: Vec<CustomBlock<S>>,
    config: EngineConfig,
}

impl<S: Clone + 'static> BatchEvaluator<S> {
    pub fn new(code: impl Into<String>, blocks: &[CustomBlock<S>], config: EngineConfig) -> Self {
        BatchEvaluator { code: code.into(), blocks: blocks.to_vec(), config }
    }

    /// One result per testcase, in input order. Setup fails before any
    /// testcase runs.
    pub async fn evaluate(&self, testcases: &[S]) -> Result<Vec<TestcaseResult<S>>, SetupError> {
        let interpreters = testcases
            .iter()
            .map(|state| Interpreter::with_config(&self.code, &self.blocks, state, self.config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("evaluating {} testcases", interpreters.len());

        if self.config.batch.concurrent {
            return Ok(join_all(interpreters.into_iter().map(|i| self.run_to_verdict(i))).await);
        }
        let mut results = Vec::with_capacity(interpreters.len());
        for interpreter in interpreters {
            results.push(self.run_to_verdict(interpreter).await);
        }
        Ok(results)
    }

    async fn run_to_verdict(&self, mut interpreter: Interpreter<S>) -> TestcaseResult<S> {
        let batch = &self.config.batch;
        let mut iterations: u32 = 0;
        while interpreter.step().await {
            iterations = iterations.wrapping_add(1);
            if batch.yield_every > 0 && iterations % batch.yield_every == 0 {
                if batch.yield_for_ms == 0 {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(Duration::from_millis(batch.yield_for_ms)).await;
                }
            }
        }
        let verdict = interpreter.verdict().cloned().unwrap_or_else(|| Verdict::failure(TERMINATED));
        let state = interpreter.state().clone();
        TestcaseResult { verdict, steps: interpreter.steps(), state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Value;

    fn blocks() -> Vec<CustomBlock<i64>> {
        vec![
            CustomBlock::new("value", |_, n, _| Ok(Value::from(*n))),
            CustomBlock::new("double", |_, n, _| {
                *n *= 2;
                Ok(Value::Undefined)
            }),
        ]
    }

    const PROGRAM: &str = "
        highlightBlock('start');
        double();
        highlightBlock('check');
        if (value() > 10) { exit(true, 'big'); } else { error('small: ' + value()); }
    ";

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order() {
        let eval = BatchEvaluator::new(PROGRAM, &blocks(), EngineConfig::default());
        let results = eval.evaluate(&[1, 6, 3, 50]).await.unwrap();
        let verdicts: Vec<_> = results.iter().map(|r| r.verdict.clone()).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::failure("small: 2"),
                Verdict::success("big"),
                Verdict::failure("small: 6"),
                Verdict::success("big"),
            ]
        );
        assert_eq!(results[3].state, 100);
        assert!(results.iter().all(|r| r.steps == 3));
    }

    #[tokio::test(start_paused = true)]
    async fn matches_standalone_runs() {
        let eval = BatchEvaluator::new(PROGRAM, &blocks(), EngineConfig::default());
        let batch = eval.evaluate(&[4, 8]).await.unwrap();
        for (initial, result) in [4, 8].iter().zip(&batch) {
            let mut alone = Interpreter::new(PROGRAM, &blocks(), initial).unwrap();
            while alone.step().await {}
            assert_eq!(alone.verdict(), Some(&result.verdict));
            assert_eq!(*alone.state(), result.state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_mode_keeps_order() {
        let mut config = EngineConfig::default();
        config.batch.concurrent = true;
        config.batch.yield_every = 1;
        let eval = BatchEvaluator::new(PROGRAM, &blocks(), config);
        let results = eval.evaluate(&[20, 1]).await.unwrap();
        assert_eq!(results[0].verdict, Verdict::success("big"));
        assert_eq!(results[1].verdict, Verdict::failure("small: 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_runs_yield_to_the_scheduler() {
        let mut config = EngineConfig::default();
        config.batch.yield_every = 2;
        config.batch.yield_for_ms = 5;
        let code = "for (var i = 0; i < 10; i++) { highlightBlock('loop'); } exit(true, 'done');";
        let eval = BatchEvaluator::new(code, &blocks(), config);
        let started = tokio::time::Instant::now();
        let results = eval.evaluate(&[0]).await.unwrap();
        assert_eq!(results[0].steps, 11);
        // Ten `true` steps, a sleep after every second one.
        assert_eq!(started.elapsed(), Duration::from_millis(25));
    }

    #[tokio::test]
    async fn setup_errors_are_reported_once() {
        let eval = BatchEvaluator::new("exit(true, ", &blocks(), EngineConfig::default());
        assert!(matches!(eval.evaluate(&[1, 2]).await, Err(SetupError::Codegen(_))));
    }

    #[tokio::test]
    async fn empty_batch() {
        let eval = BatchEvaluator::new(PROGRAM, &blocks(), EngineConfig::default());
        assert!(eval.evaluate(&[]).await.unwrap().is_empty());
    }
}
