//! Simulation command.
//!
//! Runs a batch of reads through the executor against the simulated radio,
//! prints what happened to each one, and verifies that every admission
//! permit came back.

use clap::Args;
use opgate::executor::{ExecutorConfig, ExecutorError, ExecutorStats, OperationExecutor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::radio::{describe_status, SimulatedRadio};
use crate::runner::CliRunner;

/// Wait timeout when neither the command line nor the config sets one.
const DEFAULT_SIMULATION_TIMEOUT: Duration = Duration::from_secs(2);

/// First characteristic handle read by the simulation.
const FIRST_HANDLE: u16 = 0x2a00;

/// Operations per run; each one reads a distinct handle up to `u16::MAX`.
const MAX_OPERATIONS: usize = (u16::MAX - FIRST_HANDLE) as usize + 1;

/// Arguments for `opgate simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of operations to run
    #[arg(long, default_value = "8")]
    pub operations: usize,

    /// Maximum operations running at once (defaults to the config file)
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Radio response latency in milliseconds
    #[arg(long, default_value = "100")]
    pub latency_ms: u64,

    /// Per-operation wait timeout in milliseconds (defaults to the config file, then 2000)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Every K-th request fails with a GATT error (0 = never)
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// Every H-th request is never answered (0 = never)
    #[arg(long, default_value = "0")]
    pub hang_every: usize,

    /// Interrupt all waits after this many milliseconds
    #[arg(long)]
    pub interrupt_after_ms: Option<u64>,

    /// Enable debug logging (also mirrored to stdout)
    #[arg(long)]
    pub debug: bool,
}

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Value(Vec<u8>),
    Empty,
    Failed(String),
    TimedOut,
    Interrupted,
}

impl From<Result<Option<Vec<u8>>, ExecutorError>> for Outcome {
    fn from(result: Result<Option<Vec<u8>>, ExecutorError>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Value(value),
            Ok(None) => Outcome::Empty,
            Err(e) if e.is_timeout() => Outcome::TimedOut,
            Err(ExecutorError::Interrupted(_)) => Outcome::Interrupted,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => {
                write!(f, "ok 0x")?;
                value.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
            Outcome::Empty => write!(f, "ok (no value)"),
            Outcome::Failed(msg) => write!(f, "failed: {}", msg),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Results of one simulation run.
#[derive(Debug)]
pub struct SimulationReport {
    /// Operation label and outcome, in submission order.
    pub outcomes: Vec<(String, Outcome)>,
    /// Executor occupancy after every operation resolved.
    pub stats: ExecutorStats,
}

impl SimulationReport {
    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Value(_) | Outcome::Empty))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, Outcome::TimedOut))
    }

    pub fn interrupted(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Interrupted))
    }

    /// Returns true if every permit is free and no operation is registered.
    pub fn permits_returned(&self) -> bool {
        self.stats.available_permits == self.stats.capacity && self.stats.pending_operations == 0
    }
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs) -> Result<(), CliError> {
    validate(&args)?;

    let runner = CliRunner::with_debug(args.debug)?;
    runner.log_startup("simulate");

    let mut config = ExecutorConfig::from(&runner.config().executor);
    if let Some(max) = args.max_concurrent {
        config.max_concurrent_operations = max;
    }
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .or(config.default_timeout)
        .unwrap_or(DEFAULT_SIMULATION_TIMEOUT);

    let radio = Arc::new(
        SimulatedRadio::new(Duration::from_millis(args.latency_ms))
            .failing_every(args.fail_every)
            .hanging_every(args.hang_every),
    );
    let executor = OperationExecutor::with_describer(config, describe_status);

    let interrupt = CancellationToken::new();
    if let Some(ms) = args.interrupt_after_ms {
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            info!("Interrupting outstanding waits");
            trigger.cancel();
        });
    }

    println!(
        "Running {} operations (max {} concurrent, {}ms latency, {:?} timeout)",
        args.operations,
        executor.config().max_concurrent_operations,
        args.latency_ms,
        timeout
    );
    println!();

    let report = run_simulation(&executor, &radio, args.operations, timeout, &interrupt).await?;
    print_report(&report, &radio);

    if !report.permits_returned() {
        return Err(CliError::PermitLeak {
            available: report.stats.available_permits,
            capacity: report.stats.capacity,
        });
    }
    Ok(())
}

fn validate(args: &SimulateArgs) -> Result<(), CliError> {
    if args.operations == 0 {
        return Err(CliError::InvalidArgument(
            "--operations must be at least 1".to_string(),
        ));
    }
    if args.operations > MAX_OPERATIONS {
        return Err(CliError::InvalidArgument(format!(
            "--operations must be at most {}",
            MAX_OPERATIONS
        )));
    }
    if args.max_concurrent == Some(0) {
        return Err(CliError::InvalidArgument(
            "--max-concurrent must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Characteristic handle read by the `index`-th operation.
fn characteristic_handle(index: usize) -> Option<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|i| FIRST_HANDLE.checked_add(i))
}

/// Schedules `operations` reads at once and waits for each of them.
pub async fn run_simulation(
    executor: &OperationExecutor,
    radio: &Arc<SimulatedRadio>,
    operations: usize,
    timeout: Duration,
    interrupt: &CancellationToken,
) -> Result<SimulationReport, CliError> {
    let handles = (0..operations)
        .map(characteristic_handle)
        .collect::<Option<Vec<u16>>>()
        .ok_or_else(|| {
            CliError::InvalidArgument(format!(
                "cannot read {} distinct handles (at most {})",
                operations, MAX_OPERATIONS
            ))
        })?;

    let tasks: Vec<_> = handles
        .into_iter()
        .map(|characteristic| {
            let operation = radio.read(characteristic);
            let label = operation.key().to_string();
            let executor = executor.clone();
            let interrupt = interrupt.clone();
            let task = tokio::spawn(async move {
                let handle = executor.schedule(operation);
                let result =
                    OperationExecutor::get_result_interruptible(&handle, Some(timeout), &interrupt)
                        .await;
                Outcome::from(result)
            });
            (label, task)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(operations);
    for (label, task) in tasks {
        let outcome = task
            .await
            .map_err(|e| CliError::Simulation(format!("{}: {}", label, e)))?;
        if outcome == Outcome::TimedOut {
            warn!(operation = %label, "Operation timed out; device state unknown");
        }
        outcomes.push((label, outcome));
    }

    Ok(SimulationReport {
        outcomes,
        stats: executor.stats(),
    })
}

fn print_report(report: &SimulationReport, radio: &SimulatedRadio) {
    for (i, (label, outcome)) in report.outcomes.iter().enumerate() {
        println!("  #{:<3} {:<16} {}", i + 1, label, outcome);
    }

    println!();
    println!("Summary");
    println!("=======");
    println!("  Succeeded:        {}", report.succeeded());
    println!("  Failed:           {}", report.failed());
    println!("  Timed out:        {}", report.timed_out());
    println!("  Interrupted:      {}", report.interrupted());
    println!("  Radio requests:   {}", radio.requests());
    println!("  Cancelled:        {}", radio.cancelled());
    println!();
    println!("Executor");
    println!("========");
    println!("  Capacity:         {}", report.stats.capacity);
    println!("  Available:        {}", report.stats.available_permits);
    println!("  Peak in flight:   {}", report.stats.peak_in_flight);
    println!("  Pending:          {}", report.stats.pending_operations);

    if report.permits_returned() {
        println!();
        println!("All admission permits returned.");
    }
    if report.timed_out() > 0 {
        println!();
        println!("Some operations timed out; a real device would now be in an unknown state.");
        println!("Disconnect and reconnect before issuing further operations.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(max: usize) -> OperationExecutor {
        OperationExecutor::with_describer(ExecutorConfig::new(max), describe_status)
    }

    fn radio(latency_ms: u64) -> SimulatedRadio {
        SimulatedRadio::new(Duration::from_millis(latency_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_operations_succeed_one_at_a_time() {
        let executor = executor(1);
        let radio = Arc::new(radio(100));

        let report = run_simulation(
            &executor,
            &radio,
            4,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.stats.peak_in_flight, 1);
        assert!(report.permits_returned());
        assert_eq!(
            report.outcomes[0],
            (
                "[read, 10752]".to_string(),
                Outcome::Value(vec![0x00, 0x2a, 1])
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_hangs_are_reported() {
        let executor = executor(2);
        let radio = Arc::new(radio(50).failing_every(2).hanging_every(3));

        let report = run_simulation(
            &executor,
            &radio,
            6,
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // Requests 3 and 6 hang; 2 and 4 fail.
        assert_eq!(report.timed_out(), 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(radio.cancelled(), 2);
        assert!(report.permits_returned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_outstanding_waits() {
        let executor = executor(1);
        let radio = Arc::new(radio(100));
        let interrupt = CancellationToken::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let report = run_simulation(&executor, &radio, 4, Duration::from_secs(5), &interrupt)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.interrupted(), 3);
        assert_eq!(radio.cancelled(), 3);
        assert!(report.permits_returned());
    }

    fn args(operations: usize) -> SimulateArgs {
        SimulateArgs {
            operations,
            max_concurrent: None,
            latency_ms: 100,
            timeout_ms: None,
            fail_every: 0,
            hang_every: 0,
            interrupt_after_ms: None,
            debug: false,
        }
    }

    #[test]
    fn test_operation_count_limited_to_distinct_handles() {
        assert!(validate(&args(MAX_OPERATIONS)).is_ok());
        assert!(matches!(
            validate(&args(MAX_OPERATIONS + 1)),
            Err(CliError::InvalidArgument(_))
        ));
        assert!(validate(&args(0)).is_err());

        assert_eq!(characteristic_handle(0), Some(FIRST_HANDLE));
        assert_eq!(characteristic_handle(MAX_OPERATIONS - 1), Some(u16::MAX));
        assert_eq!(characteristic_handle(MAX_OPERATIONS), None);
        assert_eq!(characteristic_handle(usize::from(u16::MAX) + 1), None);
    }

    #[tokio::test]
    async fn test_too_many_operations_schedule_nothing() {
        let executor = executor(1);
        let radio = Arc::new(radio(10));

        let err = run_simulation(
            &executor,
            &radio,
            MAX_OPERATIONS + 1,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
        assert_eq!(radio.requests(), 0);
        assert_eq!(executor.pending_operations(), 0);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Value(vec![0x19, 0x2a]).to_string(), "ok 0x192a");
        assert_eq!(Outcome::TimedOut.to_string(), "timed out");
    }
}
