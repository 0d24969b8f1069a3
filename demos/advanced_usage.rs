// demos/advanced_usage.rs
// Run with: cargo run --example advanced_usage

use std::time::Duration;

use rusty_ftp_pool::{
    FtpClient, FtpClientConfig, MemoryFtpServer, MemoryFtpSession, PoolConfig, logging,
};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("rusty_ftp_pool=debug");

    // Example 1: Many uploads sharing a small pool
    example_batch_upload().await?;

    // Example 2: Reading a file into memory on a held session
    example_read_as_stream().await?;

    // Example 3: Idle eviction and a server that drops connections
    example_eviction().await?;

    // Example 4: Error handling and retry logic
    example_with_retry().await?;

    Ok(())
}

fn client(server: &MemoryFtpServer, pool: PoolConfig) -> anyhow::Result<FtpClient<MemoryFtpSession>> {
    let config = FtpClientConfig {
        username: "deploy".to_string(),
        password: "secret".to_string(),
        pool,
        ..FtpClientConfig::new("ftp.example.com")
    };
    let connector = server.clone();
    Ok(FtpClient::connect(config, move || connector.session())?)
}

/// Example 1: Upload multiple files in parallel
async fn example_batch_upload() -> anyhow::Result<()> {
    println!("\n=== Example 1: Batch Upload ===");

    let server = MemoryFtpServer::new().with_user("deploy", "secret");
    let client = client(
        &server,
        PoolConfig::default()
            .with_max_total(3)
            .with_max_wait(Duration::from_secs(5)),
    )?;

    let mut handles = vec![];
    for i in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let body = format!("record {i}\n");
            let mut reader = body.as_bytes();
            client.upload_stream(&mut reader, &format!("batch-{i}.txt")).await
        }));
    }

    let mut uploaded = 0;
    for handle in handles {
        if handle.await? {
            uploaded += 1;
        }
    }
    let stats = client.pool().stats();
    println!(
        "✅ Uploaded {} files using {} sessions",
        uploaded, stats.created
    );

    client.close().await;
    Ok(())
}

/// Example 2: Several manual operations on one session
async fn example_read_as_stream() -> anyhow::Result<()> {
    println!("\n=== Example 2: Read As Stream ===");

    let server = MemoryFtpServer::new().with_user("deploy", "secret");
    server.put_file("/config/app.json", r#"{"retries":3}"#);
    let client = client(&server, PoolConfig::default())?;

    let mut session = client.acquire_session().await?;
    let mut buffer = Vec::new();
    match client
        .read_as_stream(&mut buffer, &mut session, "/config/app.json")
        .await
    {
        Some(mut reader) => {
            let mut text = String::new();
            reader.read_to_string(&mut text).await?;
            println!("✅ Read {} bytes: {}", buffer.len(), text);
        }
        None => println!("❌ Read failed"),
    }
    client.release_session(Some(session)).await;

    client.close().await;
    Ok(())
}

/// Example 3: Background eviction keeps a warm, healthy idle set
async fn example_eviction() -> anyhow::Result<()> {
    println!("\n=== Example 3: Idle Eviction ===");

    let server = MemoryFtpServer::new().with_user("deploy", "secret");
    let client = client(
        &server,
        PoolConfig::default()
            .with_max_total(4)
            .with_min_idle(2)
            .with_eviction_interval(Duration::from_millis(100)),
    )?;

    let warmed = client.pool().prepare().await?;
    println!("✅ Pre-created {} sessions", warmed);

    server.drop_connections();
    println!("⚠️  Server dropped every connection");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = client.pool().stats();
    println!(
        "📊 idle={} created={} destroyed={}",
        stats.idle, stats.created, stats.destroyed
    );

    client.close().await;
    Ok(())
}

/// Example 4: Retrying while the server refuses connections
async fn example_with_retry() -> anyhow::Result<()> {
    println!("\n=== Example 4: Retry Logic ===");

    let server = MemoryFtpServer::new().with_user("deploy", "secret");
    server.set_refuse_connections(true);
    let client = client(&server, PoolConfig::default())?;

    let max_retries = 3;
    for attempt in 1..=max_retries {
        match client.acquire_session().await {
            Ok(session) => {
                println!("✅ Session acquired on attempt {}", attempt);
                client.release_session(Some(session)).await;
                break;
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                println!("⚠️  Attempt {} failed ({}), retrying...", attempt, e);
                if attempt == 2 {
                    server.set_refuse_connections(false);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                println!("❌ Giving up: {}", e);
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}
