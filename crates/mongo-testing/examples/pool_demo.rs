//! Connection pool with metrics example.
//!
//! Runs the pool against the mock connection factory and prints its status
//! and metrics through a checkout burst, a clear, and shutdown.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=debug cargo run -p mongo-testing --example pool_demo
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use mongo_driver_pool::{
    ConnectionPool, ConnectionPoolSettings, PoolError, PoolEvent, RequestMessage,
};
use mongo_testing::{MockConnectionFactory, server_id};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Connection Pool with Metrics Example ===\n");

    let settings = ConnectionPoolSettings::new()
        .with_min_connections(2)
        .with_max_connections(5)
        .with_wait_queue_size(25)
        .with_maintenance_interval(Duration::from_millis(100))
        .with_max_idle_time(Duration::from_secs(300));

    println!("Pool configuration:");
    println!("  Min connections: {}", settings.min_connections());
    println!("  Max connections: {}", settings.max_connections());
    println!("  Wait queue size: {}", settings.wait_queue_size());
    println!("  Idle timeout: {:?}", settings.max_idle_time());
    println!();

    let factory = MockConnectionFactory::builder()
        .with_open_delay(Duration::from_millis(20))
        .with_receive_delay(Duration::from_millis(5))
        .build();

    let pool = ConnectionPool::builder(server_id(), factory.clone())
        .settings(settings)
        .listener(std::sync::Arc::new(|event: &PoolEvent| {
            if let PoolEvent::Cleared { generation, .. } = event {
                println!("  [event] pool cleared, generation {generation}");
            }
        }))
        .build()?;
    pool.initialize()?;

    println!("Pool created, waiting for minimum connections...\n");
    tokio::time::sleep(Duration::from_millis(300)).await;
    print_pool_status(&pool);

    // Example 1: Basic pool usage
    println!("\n1. Basic pool usage:");
    {
        let handle = pool.acquire().await?;
        let cancel = mongo_driver_pool::CancellationToken::new();
        handle
            .send_messages(vec![RequestMessage::new(1, "ping")], &cancel)
            .await?;
        let reply = handle.receive_message(1, &cancel).await?;
        println!(
            "  {} replied with {} bytes",
            handle.connection_id(),
            reply.payload.len()
        );
        // Handle is automatically returned to the pool when dropped
    }

    // Example 2: Concurrent usage
    println!("\n2. Concurrent pool usage (20 parallel checkouts):");
    let start = Instant::now();
    let mut tasks = vec![];

    for i in 0..20 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let handle = pool.acquire().await?;
            let cancel = mongo_driver_pool::CancellationToken::new();
            handle
                .send_messages(vec![RequestMessage::new(i, "work")], &cancel)
                .await?;
            handle.receive_message(i, &cancel).await?;
            Ok::<_, PoolError>(i)
        }));
    }

    let mut completed = 0;
    for task in tasks {
        if task.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} checkouts in {:?}", completed, start.elapsed());
    print_pool_metrics(&pool);

    // Example 3: Forking a handle
    println!("\n3. Forked handles share one connection:");
    {
        let handle = pool.acquire().await?;
        let fork = handle.fork()?;
        println!(
            "  original {} / fork {}",
            handle.connection_id(),
            fork.connection_id()
        );
        drop(handle);
        println!("  after dropping the original, in use: {}", pool.used_count());
    }
    println!("  after dropping the fork, in use: {}", pool.used_count());

    // Example 4: Invalidate everything
    println!("\n4. Clearing the pool:");
    pool.clear()?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(pool.acquire().await?);
    print_pool_status(&pool);

    // Example 5: Pool health
    println!("\n5. Pool health monitoring:");
    let utilization = pool.status().utilization();
    let health_status = if utilization < 70.0 {
        "HEALTHY"
    } else if utilization < 90.0 {
        "WARNING"
    } else {
        "CRITICAL"
    };
    println!("  Pool health: {}", health_status);
    println!("  Utilization: {:.1}%", utilization);

    // Graceful shutdown
    println!("\n6. Graceful shutdown:");
    pool.dispose();
    println!(
        "  Pool closed; {} of {} connections disposed.",
        factory.disposed_count(),
        factory.created_count()
    );

    Ok(())
}

fn print_pool_status(pool: &ConnectionPool) {
    let status = pool.status();
    println!(
        "  Status: {} in use, {} idle, {}/{} created ({:.1}% utilization, generation {})",
        status.in_use,
        status.idle,
        status.created,
        status.max,
        status.utilization(),
        status.generation
    );
}

fn print_pool_metrics(pool: &ConnectionPool) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections closed: {}", metrics.connections_closed);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!(
        "    Rejections: {} wait queue, {} timeouts",
        metrics.wait_queue_rejections, metrics.acquire_timeouts
    );
}
