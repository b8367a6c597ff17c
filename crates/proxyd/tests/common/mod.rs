#![allow(dead_code)]

use anyhow::Context as _;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Kill the spawned proxy when the test ends, pass or fail.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind probe port")?;
    Ok(listener.local_addr()?.port())
}

pub async fn wait_http_ok(url: &str, timeout: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(resp) = client.get(url).send().await
            && resp.status().is_success()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("timed out waiting for {url}")
}

pub struct SpawnedProxy {
    pub child: KillOnDrop,
    pub base: String,
}

/// Write a config file and start the proxy binary against it.
pub async fn spawn_proxyd(
    dir: &tempfile::TempDir,
    config_yaml: &str,
) -> anyhow::Result<SpawnedProxy> {
    let config_path = dir.path().join("proxy.yaml");
    std::fs::write(&config_path, config_yaml).context("write proxy config")?;

    let port = pick_unused_port()?;
    let bind = format!("127.0.0.1:{port}");

    let bin = env!("CARGO_BIN_EXE_edgeline-proxyd");
    let child = Command::new(bin)
        .arg("--config")
        .arg(&config_path)
        .arg("--bind")
        .arg(&bind)
        .arg("--log-level")
        .arg("info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .context("spawn edgeline-proxyd")?;

    let base = format!("http://{bind}");
    wait_http_ok(&format!("{base}/healthz"), Duration::from_secs(10)).await?;
    Ok(SpawnedProxy {
        child: KillOnDrop(child),
        base,
    })
}

pub async fn post_mcp(
    client: &reqwest::Client,
    base: &str,
    body: serde_json::Value,
) -> anyhow::Result<(u16, serde_json::Value)> {
    let resp = client
        .post(format!("{base}/mcp"))
        .header("Content-Type", "application/json")
        .header("Accept", "application/json, text/event-stream")
        .json(&body)
        .send()
        .await
        .context("POST /mcp")?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.context("read body")?;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).context("parse body")?
    };
    Ok((status, value))
}
