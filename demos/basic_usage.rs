// demos/basic_usage.rs
// Run with: cargo run --example basic_usage

use rusty_ftp_pool::{FtpClient, FtpClientConfig, MemoryFtpServer, PoolConfig, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("rusty_ftp_pool=info");

    // 1. Start an in-process server with one account
    let server = MemoryFtpServer::new().with_user("deploy", "secret");
    server.make_dir("/outbox");
    println!("✅ In-memory FTP server ready");

    // 2. Create a pooled client
    let config = FtpClientConfig {
        username: "deploy".to_string(),
        password: "secret".to_string(),
        pool: PoolConfig::default().with_max_total(4),
        ..FtpClientConfig::new("ftp.example.com")
    };
    let connector = server.clone();
    let client = FtpClient::connect(config, move || connector.session())?;
    println!("✅ FTP client created");

    // 3. Upload from memory
    println!("\n⬆️  Uploading file...");
    let mut report: &[u8] = b"id,total\n1,42\n2,17\n";
    if client.upload_stream(&mut report, "/outbox/report.csv").await {
        println!("✅ Upload completed");
    } else {
        println!("❌ Upload failed");
    }

    // 4. Download it again
    println!("\n⬇️  Downloading file...");
    let dest = std::env::temp_dir().join("rusty_ftp_pool").join("report.csv");
    if client.download_file("/outbox/report.csv", &dest).await {
        println!("✅ Download completed: {:?}", dest);
    } else {
        println!("❌ Download failed");
    }

    // 5. List the directory on a session we hold ourselves
    println!("\n📂 Listing files in /outbox...");
    let mut session = client.acquire_session().await?;
    let names = client.list_names(&mut session, "/outbox").await;
    client.release_session(Some(session)).await;
    for name in names.unwrap_or_default() {
        println!("  - {}", name);
    }

    // 6. Delete and shut down
    let deleted = client.delete_file("/outbox", "report.csv").await;
    println!("\n🗑️  Delete command sent: {}", deleted);

    println!("📊 Pool stats: {:?}", client.pool().stats());
    client.close().await;
    println!("✅ Pool closed");

    Ok(())
}
