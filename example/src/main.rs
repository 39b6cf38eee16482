use anyhow::Result;
use asyncspark::{
    compare_modes, init_tracing, AsyncMockService, CancellationComposer, CancellationSignal,
    CommonLogger, MemoryCacheManager, SafeFireAndForget, SparkConfig, TracingLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

async fn cancellation_with_timeout(service: &AsyncMockService, timeout: Duration) -> Result<()> {
    println!("=== Cancellation with timeout ({timeout:?}) ===");
    let linked = CancellationComposer::with_timeout(None, timeout)?;
    match service
        .long_running_cancellable_operation(500, linked.signal())
        .await
    {
        Ok(result) => println!("Result {result}"),
        Err(err) => println!("Task was cancelled: {err} (cause: {:?})", linked.cause()),
    }
    Ok(())
}

async fn fire_and_forget(config: &SparkConfig) -> Result<()> {
    println!("=== Fire and forget ===");
    let logger: Arc<dyn CommonLogger> = Arc::new(TracingLogger);
    let launcher = SafeFireAndForget::new(logger.clone(), config.fire_and_forget.clone());
    let signal = CancellationSignal::new();

    let tasks = [
        ("A.", 500, 1, false),
        ("B.", 400, 1, false),
        ("C.", 300, 1, false),
        ("D.", 200, 1, false),
        ("E.", 100, 1, false),
        ("F.", 100, 1, true),
        ("G.", 50, 1, false),
        ("H.", 50, 2, false),
        ("I.", 50, 4, false),
        ("J.", 50, 8, false),
        ("K.", 100, 20, false),
    ];
    for (name, delay_ms, iterations, fail) in tasks {
        launcher.launch(
            AsyncMockService::long_running_task(
                name.to_string(),
                Duration::from_millis(delay_ms),
                iterations,
                fail,
                logger.clone(),
                Some(signal.clone()),
            ),
            Some(signal.clone()),
        )?;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    signal.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = launcher.stats();
    println!(
        "launched {} / succeeded {} / faulted {} / cancelled {}",
        stats.launched, stats.succeeded, stats.faulted, stats.cancelled
    );
    Ok(())
}

async fn execution_modes(service: &AsyncMockService, config: &SparkConfig) -> Result<()> {
    println!("=== Sequential vs parallel vs throttled ===");
    let comparison = compare_modes(10, config.executor.max_concurrency, |_| {
        let service = service.clone();
        async move { Ok::<u64, anyhow::Error>(service.long_running_operation(10).await) }
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&comparison)?);
    println!(
        "parallel speed-up {:.1}x, throttled speed-up {:.1}x",
        comparison.parallel_speedup(),
        comparison.throttled_speedup()
    );
    Ok(())
}

fn cache_scenario(config: &SparkConfig) -> Result<()> {
    println!("=== Cache ===");
    let cache = MemoryCacheManager::new(config.cache.clone())?;
    let ttl = Some(Duration::from_secs(30));

    cache.set("loc", "Dallas".to_string(), Duration::from_secs(30));
    println!("loc = {}", cache.get("loc", || "fallback".to_string(), ttl));

    cache.clear();
    println!("after clear, is_set(loc) = {}", cache.is_set("loc"));
    println!("loc = {}", cache.get("loc", || "fallback".to_string(), ttl));
    println!("is_set(loc) = {}", cache.is_set("loc"));

    let ran = cache.perform_action_with_lock("report", Duration::from_secs(5), || {
        info!("Generating report under lock");
    });
    println!("locked action ran: {ran}");
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let config = SparkConfig::from_env()?;
    let service = AsyncMockService::new();

    cancellation_with_timeout(&service, Duration::from_secs(2)).await?;
    fire_and_forget(&config).await?;
    execution_modes(&service, &config).await?;
    cache_scenario(&config)?;

    println!("=== Deadline-bounded results ===");
    let results = service
        .mock_results(50, Duration::from_millis(200), None)
        .await?;
    println!("{}", serde_json::to_string_pretty(&results)?);

    println!("Program End.");
    Ok(())
}
