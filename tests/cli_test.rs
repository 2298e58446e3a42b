use mockito::{Server, ServerGuard};
use shelfwalk::sink::CsvSink;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;

fn write_config(dir: &TempDir, server: &ServerGuard) -> PathBuf {
    let path = dir.path().join("shelfwalk.toml");
    let body = format!(
        r#"
base_url = "{}"
root_path = "/in/Menu-Addons"
fetch_details = false

[retry]
max_retries = 1
base_backoff_ms = 1
max_backoff_ms = 5

[rate_limit]
min_delay_ms = 0
max_delay_ms = 0
"#,
        server.url()
    );
    std::fs::write(&path, body).unwrap();
    path
}

async fn shelfwalk(config: &Path, output: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shelfwalk"))
        .arg("--config")
        .arg(config)
        .arg("--output")
        .arg(output)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .output()
        .await
        .unwrap()
}

fn card(slug: &str, name: &str, price: &str) -> String {
    format!(
        r#"<div class="product-card"><a href="/in/p/{slug}">{name}</a><div class="price">{price}</div></div>"#
    )
}

#[tokio::test]
async fn test_run_with_failed_page_exits_zero_and_logs_the_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/in/Menu-Addons")
        .with_body(r#"<html><body><nav><a href="/in/frozen">Frozen Desserts</a></nav></body></html>"#)
        .create_async()
        .await;
    server
        .mock("GET", "/in/frozen")
        .with_body(format!(
            r#"<html><body>{}<a rel="next" href="/in/frozen/page/2">Next</a></body></html>"#,
            card("walnut-brownie", "Walnut Brownie, 720 gm", "₹190")
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/in/frozen/page/2")
        .with_body(format!(
            r#"<html><body>{}<a rel="next" href="/in/frozen/page/3">Next</a></body></html>"#,
            card("red-velvet", "Red Velvet Pastry", "₹95")
        ))
        .create_async()
        .await;
    let broken = server
        .mock("GET", "/in/frozen/page/3")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &server);
    let output_path = dir.path().join("products.csv");
    let output = shelfwalk(&config, &output_path).await;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    broken.assert_async().await;

    assert!(stdout.contains("Products written: 2"), "stdout: {stdout}");
    assert!(stdout.contains("Frozen Desserts: 2"), "stdout: {stdout}");
    assert!(stderr.contains("Retries exhausted"), "stderr: {stderr}");
    assert!(stderr.contains("/in/frozen/page/3"), "stderr: {stderr}");
    assert_eq!(CsvSink::read(&output_path).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreachable_root_exits_non_zero() {
    let mut server = Server::new_async().await;
    let root = server
        .mock("GET", "/in/Menu-Addons")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &server);
    let output_path = dir.path().join("products.csv");
    let output = shelfwalk(&config, &output_path).await;

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("run could not start"), "stderr: {stderr}");
    root.assert_async().await;
    assert!(!output_path.exists());
}

#[tokio::test]
async fn test_missing_config_file_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("products.csv");
    let output = shelfwalk(&dir.path().join("absent.toml"), &output_path).await;

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("loading configuration"), "stderr: {stderr}");
    assert!(!output_path.exists());
}
