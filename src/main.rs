#[tokio::main]
async fn main() -> anyhow::Result<()> {
    enrollment_sync_lib::run().await
}
