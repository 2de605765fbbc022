#[cfg(test)]
mod tests {
    use lemming::{
        errors::{CancelReason, Error, TaskError},
        pool::{Executor, ThreadPoolBuilder},
        ConfigError,
        Lemming,
        Priority,
    };
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        thread,
        time::{Duration, Instant},
    };
    use tokio_util::sync::CancellationToken;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or_default().to_owned()
    }

    /// Sleeps until the task is cancelled, so stragglers do not outlive the test.
    fn sleep_until_cancelled(limit: Duration) {
        let started = Instant::now();
        while !lemming::is_cancelled() && started.elapsed() < limit {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_scalar_and_sequence_results() {
        init_tracing();
        let results = Lemming::new()
            .add(|| Ok("A".to_owned()))
            .add_many(|| Ok(vec!["B".to_owned(), "C".to_owned()]))
            .collect()
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results, ["A", "B", "C"]);
    }

    #[test]
    fn test_n_scalar_tasks_regardless_of_completion_order() {
        init_tracing();
        let mut lemming = Lemming::new();
        for i in 0..16u64 {
            lemming = lemming.add(move || {
                // Поздние задачи завершаются раньше
                thread::sleep(Duration::from_millis(32 - 2 * i));
                Ok(i)
            });
        }

        let results = lemming.collect().unwrap();
        assert_eq!(results, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequence_preserves_its_own_order() {
        let results = Lemming::new()
            .add_many(|| Ok(0..5))
            .add_many(|| Ok(Vec::<i32>::new()))
            .add_many(|| Ok([10, 9, 8]))
            .collect()
            .unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4, 10, 9, 8]);
    }

    #[test]
    fn test_zero_tasks_returns_empty() {
        let results = Lemming::<u32>::new().collect().unwrap();
        assert!(results.is_empty());

        let results = Lemming::<u32>::new().timeout_ms(10).fail_on_any_timeout().collect().unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_all_failures_quietly_handled() {
        init_tracing();
        let (results, metrics) = Lemming::<u32>::new()
            .add(|| Err(anyhow::anyhow!("first")))
            .add(|| Err(anyhow::anyhow!("second")))
            .add(|| panic!("third"))
            .collect_with_metrics()
            .unwrap();

        assert!(results.is_empty());
        assert_eq!(metrics.failed, 3);
        assert_eq!(metrics.succeeded, 0);
    }

    #[test]
    fn test_fail_fast_raises_task_error() {
        init_tracing();
        let error = Lemming::new()
            .add(|| Ok(1))
            .add(|| Err(anyhow::anyhow!("broken task")))
            .fail_on_any_exception()
            .collect()
            .unwrap_err();

        match error {
            Error::Task(TaskError::Failed { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(source.to_string(), "broken task");
            }
            other => panic!("expected a task failure, got {other:?}"),
        }
    }

    #[test]
    fn test_fail_fast_reports_panics() {
        let error = Lemming::<u32>::new()
            .add(|| panic!("task blew up"))
            .fail_on_any_exception()
            .collect()
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Task(TaskError::Panicked { index: 0, ref message }) if message == "task blew up"
        ));
    }

    #[test]
    fn test_timeout_fail_fast_raises_cancellation() {
        init_tracing();
        let started = Instant::now();
        let error = Lemming::new()
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(1)
            })
            .timeout_ms(50)
            .fail_on_any_timeout()
            .collect()
            .unwrap_err();

        assert!(error.is_cancellation());
        assert_eq!(
            error.task_error().and_then(TaskError::cancel_reason),
            Some(CancelReason::TimedOut)
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_timeout_quiet_excludes_slow_task() {
        let (results, metrics) = Lemming::new()
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok("slow")
            })
            .add(|| Ok("fast"))
            .timeout(Duration::from_millis(50))
            .collect_with_metrics()
            .unwrap();

        assert_eq!(results, ["fast"]);
        assert_eq!(metrics.cancelled, 1);

        let results = Lemming::new()
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(1)
            })
            .timeout_ms(20)
            .collect()
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_timeout_times_out_unfinished_tasks() {
        init_tracing();
        let timed_out = Arc::new(Mutex::new(Vec::new()));
        let seen = timed_out.clone();

        let (results, metrics) = Lemming::new()
            .add(|| Ok("instant"))
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok("slow")
            })
            .timeout_ms(0)
            .timeout_strategy(move |error: TaskError| -> Result<(), Error> {
                seen.lock().unwrap().push((error.index(), error.cancel_reason()));
                Ok(())
            })
            .collect_with_metrics()
            .unwrap();

        let timed_out = timed_out.lock().unwrap().clone();
        assert!(timed_out.contains(&(1, Some(CancelReason::TimedOut))));
        assert!(!results.contains(&"slow"));
        // Может успеть до первой проверки, а может и нет.
        assert_eq!(results.len() + timed_out.len(), 2);
        assert_eq!(metrics.cancelled, timed_out.len());
        assert_eq!(results.is_empty(), timed_out.contains(&(0, Some(CancelReason::TimedOut))));
    }

    #[test]
    fn test_timeout_is_per_task() {
        // A timeout on one task does not turn a failure of another into a timeout.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let failures = seen.clone();
        let timeouts = seen.clone();

        let results = Lemming::new()
            .add(|| Ok(0))
            .add(|| Err(anyhow::anyhow!("failed")))
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(2)
            })
            .timeout_ms(50)
            .exception_strategy(move |error: TaskError| -> Result<(), Error> {
                failures.lock().unwrap().push(format!("exception:{}", error.index()));
                Ok(())
            })
            .timeout_strategy(move |error: TaskError| -> Result<(), Error> {
                timeouts.lock().unwrap().push(format!("timeout:{}", error.index()));
                Ok(())
            })
            .collect()
            .unwrap();

        assert_eq!(results, vec![0]);
        assert_eq!(*seen.lock().unwrap(), vec!["exception:1", "timeout:2"]);
    }

    #[test]
    fn test_custom_strategy_raises_different_error() {
        let error = Lemming::<u8>::new()
            .add(|| Err(anyhow::anyhow!("io failure")))
            .exception_strategy(|error: TaskError| -> Result<(), Error> {
                Err(Error::strategy(anyhow::anyhow!("giving up after task {}", error.index())))
            })
            .collect()
            .unwrap_err();

        assert!(matches!(error, Error::Strategy(_)));
        assert_eq!(error.to_string(), "strategy aborted the collection: giving up after task 0");
    }

    #[test]
    fn test_strategy_error_stops_processing() {
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();

        let result = Lemming::<u8>::new()
            .add(|| Err(anyhow::anyhow!("0")))
            .add(|| Err(anyhow::anyhow!("1")))
            .add(|| Err(anyhow::anyhow!("2")))
            .exception_strategy(move |error: TaskError| -> Result<(), Error> {
                counter.fetch_add(1, Ordering::SeqCst);
                if error.index() == 1 {
                    return Err(error.into());
                }
                Ok(())
            })
            .collect();

        assert!(result.is_err());
        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_single_thread_runs_tasks_on_same_worker() {
        let results = Lemming::new()
            .thread_count(1)
            .add(|| Ok(current_thread_name()))
            .add(|| Ok(current_thread_name()))
            .collect()
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], results[1]);
        assert!(results[0].starts_with("lemming-pool-"));
    }

    #[test]
    fn test_default_one_thread_per_task() {
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let mut lemming = Lemming::new();
        for _ in 0..3 {
            let barrier = barrier.clone();
            lemming = lemming.add(move || {
                // Дедлок, если все три задачи не работают одновременно
                barrier.wait();
                Ok(current_thread_name())
            });
        }

        let names: HashSet<_> = lemming.timeout_ms(5_000).fail_on_any_timeout().collect().unwrap().into_iter().collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_thread_name_format_counts_from_zero() {
        let results = Lemming::new()
            .thread_name_format("collector-{}")
            .unwrap()
            .thread_count(1)
            .add(|| Ok(current_thread_name()))
            .add(|| Ok(current_thread_name()))
            .collect()
            .unwrap();

        assert_eq!(results, ["collector-0", "collector-0"]);
    }

    #[test]
    fn test_invalid_thread_name_format() {
        let error = Lemming::<u8>::new().thread_name_format("collector-{").err().unwrap();
        assert!(matches!(error, ConfigError::InvalidThreadNameFormat { .. }));
    }

    #[test]
    fn test_priority_validation() {
        assert!(Lemming::<u8>::new().priority(Priority::MIN.get()).is_ok());
        assert!(Lemming::<u8>::new().priority(Priority::MAX.get()).is_ok());

        let ran = Arc::new(AtomicUsize::new(0));
        let below = {
            let ran = ran.clone();
            Lemming::new()
                .add(move || Ok(ran.fetch_add(1, Ordering::SeqCst)))
                .priority(Priority::MIN.get() - 1)
        };
        assert_eq!(
            below.err(),
            Some(ConfigError::PriorityOutOfRange { priority: 0, min: 1, max: 10 })
        );
        assert!(Lemming::<u8>::new().priority(Priority::MAX.get() + 1).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_external_pool_not_shut_down_by_default() {
        init_tracing();
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();

        let results = Lemming::new()
            .executor(pool.clone())
            // Игнорируется для внешнего executor'а
            .thread_count(7)
            .add(|| Ok(current_thread_name()))
            .collect()
            .unwrap();
        assert!(results[0].starts_with("lemming-pool-"));
        assert!(!pool.is_shutdown());

        // Пул все еще рабочий
        let results = Lemming::new()
            .executor(pool.clone())
            .shutdown_executor(true)
            .add(|| Ok(1))
            .collect()
            .unwrap();
        assert_eq!(results, [1]);
        assert!(pool.is_shutdown());
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_owned_pool_kept_when_asked() {
        // An owned pool that is not shut down lets late tasks keep their worker.
        let (results, metrics) = Lemming::new()
            .shutdown_executor(false)
            .add(|| Ok(1))
            .collect_with_metrics()
            .unwrap();
        assert_eq!(results, [1]);
        assert_eq!(metrics.succeeded, 1);
    }

    #[test]
    fn test_shut_down_external_pool_rejected() {
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        Executor::shutdown(pool.as_ref());

        let error = Lemming::new()
            .executor(pool.clone())
            .add(|| Ok(1))
            .collect()
            .unwrap_err();
        assert!(matches!(error, Error::Pool(lemming::PoolError::Shutdown)));
    }

    #[test]
    fn test_timed_out_tasks_are_cancelled() {
        let token = Arc::new(Mutex::new(None));
        let seen = token.clone();

        let results = Lemming::new()
            .add(move || {
                *seen.lock().unwrap() = lemming::cancellation_token();
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(())
            })
            .timeout_ms(50)
            .collect()
            .unwrap();

        assert!(results.is_empty());
        let token: Option<CancellationToken> = token.lock().unwrap().take();
        assert!(token.expect("task ran").is_cancelled());
    }

    #[test]
    fn test_interrupted_wait_goes_to_timeout_strategy() {
        init_tracing();
        let interrupt = CancellationToken::new();
        let trigger = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let error = Lemming::new()
            .add(|| Ok(0))
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(1)
            })
            .interrupt_on(interrupt)
            .fail_on_any_timeout()
            .collect()
            .unwrap_err();

        assert_eq!(
            error.task_error().and_then(TaskError::cancel_reason),
            Some(CancelReason::Interrupted)
        );
    }

    #[tokio::test]
    async fn test_collect_async() {
        let results = Lemming::new()
            .add(|| Ok(1))
            .add_many(|| Ok(vec![2, 3]))
            .timeout_ms(1_000)
            .collect_async()
            .await
            .unwrap();
        assert_eq!(results, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_collect_async_timeout() {
        let (results, metrics) = Lemming::new()
            .add(|| {
                sleep_until_cancelled(Duration::from_secs(5));
                Ok(1)
            })
            .timeout_ms(20)
            .collect_with_metrics_async()
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(metrics.cancelled, 1);
    }
}
