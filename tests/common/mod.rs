#![allow(dead_code)]

use rand::RngCore;
use rusty_ftp_pool::{FtpClient, FtpClientConfig, MemoryFtpServer, MemoryFtpSession, PoolConfig};

pub const USER: &str = "deploy";
pub const PASSWORD: &str = "secret";

pub fn server() -> MemoryFtpServer {
    MemoryFtpServer::new().with_user(USER, PASSWORD)
}

pub fn config(pool: PoolConfig) -> FtpClientConfig {
    FtpClientConfig {
        username: USER.to_string(),
        password: PASSWORD.to_string(),
        pool,
        ..FtpClientConfig::new("ftp.example.test")
    }
}

pub fn client_with(server: &MemoryFtpServer, config: FtpClientConfig) -> FtpClient<MemoryFtpSession> {
    let server = server.clone();
    FtpClient::connect(config, move || server.session()).expect("valid test configuration")
}

pub fn client(server: &MemoryFtpServer) -> FtpClient<MemoryFtpSession> {
    client_with(server, config(PoolConfig::default()))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
