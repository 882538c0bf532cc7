use anyhow::Result;
use disco::run;

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}
