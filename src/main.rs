#[tokio::main]
async fn main() -> anyhow::Result<()> {
    activity_planner_lib::run().await
}
