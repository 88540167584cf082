#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tank_server::serve().await
}
